//! Cooperative shutdown coordination.
//!
//! A [`ShutdownToken`] is handed to the server engine, to every connection
//! handler and to the signal callback. Triggering any clone is observed by
//! all of them; the token never resets.

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::info;

/// Shared, write-once cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    triggered: Arc<AtomicBool>,
}

impl ShutdownToken {
    /// Create a token in the untriggered state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` if this call performed the transition.
    pub fn trigger(&self) -> bool {
        !self.triggered.swap(true, Ordering::SeqCst)
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// Route SIGINT and SIGTERM to `token`.
///
/// Signals are received on a dedicated `signals` thread whose only side
/// effect is triggering the token. Every other signal keeps its default
/// disposition.
pub fn install_signal_handler(token: ShutdownToken) -> io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                if token.trigger() {
                    info!(signal, "Shutdown signal received");
                }
            }
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_hook::consts::SIGHUP;
    use signal_hook::low_level::raise;
    use std::time::{Duration, Instant};

    #[test]
    fn test_trigger_is_write_once() {
        let token = ShutdownToken::new();
        assert!(!token.is_triggered());

        assert!(token.trigger());
        assert!(token.is_triggered());

        // Second trigger is a no-op
        assert!(!token.trigger());
        assert!(token.is_triggered());
    }

    #[test]
    fn test_clones_share_state() {
        let token = ShutdownToken::new();
        let remote = token.clone();

        thread::spawn(move || {
            remote.trigger();
        })
        .join()
        .unwrap();

        assert!(token.is_triggered());
    }

    #[test]
    fn test_only_interrupt_and_terminate_trigger() {
        let token = ShutdownToken::new();
        install_signal_handler(token.clone()).unwrap();

        // Keep SIGHUP from killing the test process
        let hangup = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGHUP, Arc::clone(&hangup)).unwrap();

        raise(SIGHUP).unwrap();
        assert!(hangup.load(Ordering::SeqCst));
        thread::sleep(Duration::from_millis(100));
        assert!(!token.is_triggered());

        raise(SIGTERM).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !token.is_triggered() {
            assert!(Instant::now() < deadline, "SIGTERM did not trigger shutdown");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
