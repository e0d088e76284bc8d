//! Stop token handed to `ServiceHooks::started`.
//!
//! OS termination requests (SIGTERM/SIGINT/SIGHUP on Unix, console control
//! events and SCM stop requests on Windows) are recorded in a process-wide
//! atomic by async-signal-safe handlers and observed by every `ShutdownSignal`
//! through coarse polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};

/// Poll interval for OS signals while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

// Polling-based signal handling (lock-free).
static RECEIVED_SIGNAL: AtomicUsize = AtomicUsize::new(0);

/// Record an external termination request. Safe to call from a signal or
/// console-control handler.
pub(crate) fn notify_external(code: usize) {
    // 0 means "nothing received", keep the slot non-zero.
    RECEIVED_SIGNAL.store(code.max(1), Ordering::SeqCst);
}

/// Raw code of the last external request, if any.
pub fn external_request() -> Option<usize> {
    match RECEIVED_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        code => Some(code),
    }
}

/// Cloneable "please stop" token.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    /// Ask the running service to stop.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_requested(&self) -> bool {
        if self.requested.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(code) = external_request() {
            log::info!("termination request ({code}) received, orderly shutdown");
            self.requested.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// Block until a stop is requested.
    pub fn wait(&self) {
        let ticker = tick(POLL_INTERVAL);
        while !self.is_requested() {
            select! {
                recv(self.wake_rx) -> _ => {}
                recv(ticker) -> _ => {}
            }
        }
        // Let other waiters on the same token wake promptly too.
        let _ = self.wake_tx.try_send(());
    }

    /// Block for at most `timeout`; returns whether a stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let ticker = tick(POLL_INTERVAL.min(timeout.max(Duration::from_millis(1))));
        while !self.is_requested() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;
            select! {
                recv(self.wake_rx) -> _ => {}
                recv(ticker) -> _ => {}
                default(remaining) => {}
            }
        }
        let _ = self.wake_tx.try_send(());
        true
    }
}

/// Route SIGTERM, SIGINT and SIGHUP into the shutdown flag instead of the
/// default terminate action, so exit cleanup gets a chance to run.
#[cfg(unix)]
pub fn install_signal_handlers() -> crate::error::Result<()> {
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

    extern "C" fn handler(sig: i32) {
        notify_external(sig as usize);
    }

    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP] {
        // SAFETY: the handler only performs an atomic store.
        unsafe { signal::sigaction(sig, &action) }.map_err(|e| {
            crate::error::ServiceError::OperationFailed(format!(
                "failed to register {sig} handler: {e}"
            ))
        })?;
    }
    Ok(())
}

/// Console events are wired by the Windows backend.
#[cfg(not(unix))]
pub fn install_signal_handlers() -> crate::error::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn request_is_visible_to_clones() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_requested());
        signal.request();
        assert!(clone.is_requested());
    }

    #[test]
    fn wait_returns_after_request_from_other_thread() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.request();
        });
        let started = Instant::now();
        signal.wait();
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_without_request() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        signal.request();
        assert!(signal.wait_timeout(Duration::from_millis(30)));
    }
}
