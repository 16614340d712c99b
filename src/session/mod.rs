//! Device session: the state machine around the single physical sensor.
//!
//! This module provides:
//! - The typed sensor configuration via [`ConfigurationProfile`]
//! - The `Idle -> Connected -> Streaming` machine via [`DeviceSession`]
//! - The session-wide lock shared by RPC handlers and auto-capture via [`SharedSession`]

mod errors;
mod profile;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

pub use errors::{ErrorKind, SessionError};
pub use profile::{
    AvailableModes, ColorResolution, ConfigurationProfile, DepthMode, FrameRate, ProfileError,
};
pub use state::{ConnectInfo, DeviceInfo, DeviceSession, SessionPhase};

/// Default time a request waits for the session lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// The session behind its session-wide lock.
///
/// Every mutating call holds the lock for its full duration. Waiting for the
/// lock is bounded separately from any capture timeout.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<DeviceSession>>,
    lock_timeout: Duration,
}

impl SharedSession {
    pub fn new(session: DeviceSession, lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
            lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Wait up to the configured lock timeout for exclusive access.
    pub async fn acquire(&self) -> Result<OwnedMutexGuard<DeviceSession>, SessionError> {
        self.acquire_within(self.lock_timeout).await
    }

    pub async fn acquire_within(
        &self,
        wait: Duration,
    ) -> Result<OwnedMutexGuard<DeviceSession>, SessionError> {
        tokio::time::timeout(wait, Arc::clone(&self.inner).lock_owned())
            .await
            .map_err(|_| SessionError::SessionBusy {
                waited_ms: wait.as_millis() as u64,
            })
    }

    /// Run a blocking session operation on the blocking pool while holding
    /// the lock.
    pub async fn run<T, F>(&self, op: F) -> Result<T, SessionError>
    where
        F: FnOnce(&mut DeviceSession) -> Result<T, SessionError> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.acquire().await?;
        Self::run_locked(guard, op).await
    }

    /// Like [`run`](Self::run) with a guard the caller already holds.
    pub async fn run_locked<T, F>(
        mut guard: OwnedMutexGuard<DeviceSession>,
        op: F,
    ) -> Result<T, SessionError>
    where
        F: FnOnce(&mut DeviceSession) -> Result<T, SessionError> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || op(&mut guard))
            .await
            .map_err(|e| SessionError::Driver(format!("session task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedDriver;

    fn shared(lock_timeout: Duration) -> SharedSession {
        SharedSession::new(
            DeviceSession::new(Arc::new(SimulatedDriver::default())),
            lock_timeout,
        )
    }

    #[tokio::test]
    async fn test_run_executes_under_lock() {
        let session = shared(DEFAULT_LOCK_TIMEOUT);
        let phase = session
            .run(|s| {
                s.connect_value(serde_json::Value::Null)?;
                Ok(s.phase())
            })
            .await
            .unwrap();
        assert_eq!(phase, SessionPhase::Connected);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_held() {
        let session = shared(Duration::from_millis(20));
        let _held = session.acquire().await.unwrap();
        let err = session.acquire().await.unwrap_err();
        assert_eq!(err, SessionError::SessionBusy { waited_ms: 20 });
    }

    #[tokio::test]
    async fn test_lock_released_after_run() {
        let session = shared(Duration::from_millis(50));
        session.run(|s| Ok(s.phase())).await.unwrap();
        assert!(session.acquire().await.is_ok());
    }
}
