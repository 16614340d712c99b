//! Ctrl+C / SIGTERM handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tokio::sync::watch;

static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);
static SIGNAL_TX: OnceLock<watch::Sender<bool>> = OnceLock::new();

/// Whether a shutdown signal has arrived.
pub fn signal_received() -> bool {
    SIGNAL_RECEIVED.load(Ordering::SeqCst)
}

/// Install the process-wide handler. Call once at startup.
pub fn install_handler() -> Result<(), ctrlc::Error> {
    SIGNAL_TX.get_or_init(|| watch::channel(false).0);
    ctrlc::set_handler(|| {
        if SIGNAL_RECEIVED.swap(true, Ordering::SeqCst) {
            return;
        }
        eprintln!("\nReceived shutdown signal, stopping...");
        if let Some(tx) = SIGNAL_TX.get() {
            tx.send_replace(true);
        }
    })
}

/// Resolves once a shutdown signal arrives.
///
/// Never resolves if [`install_handler`] was not called.
pub async fn wait_for_signal() {
    let mut rx = SIGNAL_TX.get_or_init(|| watch::channel(false).0).subscribe();
    if *rx.borrow_and_update() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await
}
