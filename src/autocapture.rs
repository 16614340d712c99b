//! Background auto-capture loop and its single-slot latest-frame cache.
//!
//! The loop is one tokio task that, every interval, takes the session lock
//! and performs a short `get_capture`. Successful captures overwrite the
//! [`LatestFrameCache`]; failures are logged and retried on the next tick.
//! Readers of the cache never touch the session lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::driver::{Capture, CaptureSummary};
use crate::session::{SessionError, SessionPhase, SharedSession};

/// Default loop interval (about 30 fps).
pub const DEFAULT_INTERVAL_MS: u64 = 33;

/// How long a single tick waits for a frame.
const TICK_CAPTURE_TIMEOUT: Duration = Duration::from_millis(200);

/// A capture as published by the loop.
#[derive(Debug, Clone)]
pub struct CachedFrame {
    pub capture: Arc<Capture>,
    pub published_at: Instant,
}

impl CachedFrame {
    /// Capture summary with `age_ms` filled in.
    pub fn summary(&self) -> CaptureSummary {
        let mut summary = self.capture.summary();
        summary.age_ms = Some(self.published_at.elapsed().as_millis() as u64);
        summary
    }
}

/// Single-slot store holding the most recent auto-captured frame.
///
/// One writer (the loop), any number of readers. Reads never block on the
/// session lock.
#[derive(Debug, Default)]
pub struct LatestFrameCache {
    slot: RwLock<Option<CachedFrame>>,
    published: AtomicU64,
}

impl LatestFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, capture: Arc<Capture>) {
        let frame = CachedFrame {
            capture,
            published_at: Instant::now(),
        };
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(frame);
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    /// `None` until the first successful tick.
    pub fn latest(&self) -> Option<CachedFrame> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Total number of publishes since creation.
    pub fn publish_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

/// Reported by `start_auto_capture`, `stop_auto_capture` and device info.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCaptureStatus {
    pub running: bool,
    pub interval_ms: Option<u64>,
    pub ticks: u64,
    pub captures: u64,
    pub failures: u64,
    /// Set when `start` found a loop already running
    #[serde(default)]
    pub already_running: bool,
}

#[derive(Debug, Default)]
struct LoopStats {
    ticks: AtomicU64,
    captures: AtomicU64,
    failures: AtomicU64,
}

struct Worker {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
    interval_ms: u64,
    stats: Arc<LoopStats>,
}

impl Worker {
    fn status(&self, running: bool) -> AutoCaptureStatus {
        AutoCaptureStatus {
            running,
            interval_ms: Some(self.interval_ms),
            ticks: self.stats.ticks.load(Ordering::SeqCst),
            captures: self.stats.captures.load(Ordering::SeqCst),
            failures: self.stats.failures.load(Ordering::SeqCst),
            already_running: false,
        }
    }
}

/// Owner of the (at most one) background capture loop.
pub struct AutoCapture {
    session: SharedSession,
    cache: Arc<LatestFrameCache>,
    worker: Mutex<Option<Worker>>,
}

impl AutoCapture {
    pub fn new(session: SharedSession) -> Self {
        Self {
            session,
            cache: Arc::new(LatestFrameCache::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<LatestFrameCache> {
        &self.cache
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn status(&self) -> AutoCaptureStatus {
        match self.worker.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(w) => w.status(!w.handle.is_finished()),
            None => AutoCaptureStatus::default(),
        }
    }

    /// Start the loop.
    ///
    /// A second call while the loop runs spawns nothing and returns the
    /// running loop's status with `already_running` set.
    ///
    /// # Errors
    /// * `InvalidArgument` - `interval_ms` is zero
    /// * `NotStreaming` / `NotConnected` - the device is not streaming
    pub async fn start(&self, interval_ms: u64) -> Result<AutoCaptureStatus, SessionError> {
        if interval_ms == 0 {
            return Err(SessionError::InvalidArgument(
                "interval_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(status) = self.running_status() {
            return Ok(status);
        }

        match self.session.acquire().await?.phase() {
            SessionPhase::Streaming => {}
            SessionPhase::Connected => return Err(SessionError::NotStreaming),
            SessionPhase::Idle => return Err(SessionError::NotConnected),
        }

        let mut slot = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(w) = slot.as_ref() {
            if !w.handle.is_finished() {
                return Ok(AutoCaptureStatus {
                    already_running: true,
                    ..w.status(true)
                });
            }
        }

        self.cache.clear();
        let worker = self.spawn_worker(interval_ms, Arc::new(LoopStats::default()));
        log::info!("Auto-capture started every {} ms", interval_ms);
        let status = worker.status(true);
        *slot = Some(worker);
        Ok(status)
    }

    fn spawn_worker(&self, interval_ms: u64, stats: Arc<LoopStats>) -> Worker {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let handle = tokio::spawn(run_loop(
            self.session.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&stats),
            Duration::from_millis(interval_ms),
            shutdown_rx,
        ));
        Worker {
            shutdown_tx,
            handle,
            interval_ms,
            stats,
        }
    }

    fn running_status(&self) -> Option<AutoCaptureStatus> {
        let slot = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .filter(|w| !w.handle.is_finished())
            .map(|w| AutoCaptureStatus {
                already_running: true,
                ..w.status(true)
            })
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// Once this returns the cache receives no further writes. Stopping an
    /// idle engine is a no-op.
    pub async fn stop(&self) -> AutoCaptureStatus {
        match self.pause().await {
            Some(paused) => paused.status(),
            None => AutoCaptureStatus::default(),
        }
    }

    /// Stop the loop like [`stop`](Self::stop) but keep what is needed to
    /// [`resume`](Self::resume) it. `None` when no loop was running.
    pub async fn pause(&self) -> Option<PausedLoop> {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        let Worker {
            shutdown_tx,
            handle,
            interval_ms,
            stats,
        } = worker;
        drop(shutdown_tx);
        if let Err(e) = handle.await {
            log::error!("Auto-capture task ended abnormally: {}", e);
        }
        log::info!("Auto-capture stopped");
        Some(PausedLoop { interval_ms, stats })
    }

    /// Restart a paused loop with its interval and counters.
    ///
    /// Skips the streaming check and keeps the cache. Does nothing if a loop
    /// was started in the meantime.
    pub fn resume(&self, paused: PausedLoop) {
        let mut slot = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return;
        }
        log::info!("Auto-capture resumed every {} ms", paused.interval_ms);
        *slot = Some(self.spawn_worker(paused.interval_ms, paused.stats));
    }
}

/// A loop stopped by [`AutoCapture::pause`].
#[derive(Debug)]
pub struct PausedLoop {
    interval_ms: u64,
    stats: Arc<LoopStats>,
}

impl PausedLoop {
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn status(&self) -> AutoCaptureStatus {
        AutoCaptureStatus {
            running: false,
            interval_ms: Some(self.interval_ms),
            ticks: self.stats.ticks.load(Ordering::SeqCst),
            captures: self.stats.captures.load(Ordering::SeqCst),
            failures: self.stats.failures.load(Ordering::SeqCst),
            already_running: false,
        }
    }
}

async fn run_loop(
    session: SharedSession,
    cache: Arc<LatestFrameCache>,
    stats: Arc<LoopStats>,
    interval: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failing = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                stats.ticks.fetch_add(1, Ordering::SeqCst);
                match session.run(|s| s.get_capture(TICK_CAPTURE_TIMEOUT)).await {
                    Ok(capture) => {
                        cache.publish(capture);
                        stats.captures.fetch_add(1, Ordering::SeqCst);
                        if failing {
                            log::info!("Auto-capture recovered");
                            failing = false;
                        }
                    }
                    Err(e) => {
                        stats.failures.fetch_add(1, Ordering::SeqCst);
                        if failing {
                            log::debug!("Auto-capture tick failed: {}", e);
                        } else {
                            log::warn!("Auto-capture tick failed: {}", e);
                            failing = true;
                        }
                    }
                }
            }
        }
    }
}
