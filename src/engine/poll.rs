//! Pan schedule polling
//!
//! While a session plays, the controller's `tick()` has to run on a fixed
//! wall-clock interval. `PanPoller` drives it from a timer thread. Each
//! session carries a [`CancellationToken`]; the poller re-checks it after
//! taking the controller lock, so once `stop()` has returned no further
//! tick can run for that session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::tick;
use tracing::{debug, trace};

use crate::engine::transport::PlaybackController;
use crate::error::EngineError;

/// Cooperative cancellation flag shared between a session and its poller
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Controller shared between the caller and a poll thread
pub type SharedController = Arc<Mutex<PlaybackController>>;

/// Background thread calling `tick()` for one session
pub struct PanPoller {
    token: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl PanPoller {
    /// Start polling the controller's current session every `interval`
    ///
    /// # Errors
    /// `InvalidTransition` if no session is playing or paused.
    pub fn spawn(controller: SharedController, interval: Duration) -> Result<Self, EngineError> {
        let token = {
            let guard = controller.lock().unwrap_or_else(PoisonError::into_inner);
            guard
                .session_token()
                .ok_or_else(|| EngineError::InvalidTransition {
                    from: guard.state().to_string(),
                    action: "poll",
                })?
        };

        let thread_token = token.clone();
        let handle = thread::Builder::new()
            .name("reverie-pan-poll".to_string())
            .spawn(move || poll_loop(controller, thread_token, interval))
            .map_err(|e| EngineError::DeviceUnavailable {
                reason: format!("failed to start poll thread: {}", e),
            })?;

        Ok(Self {
            token,
            handle: Some(handle),
        })
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stop polling without waiting for the thread
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the thread to exit, returning how many ticks it ran
    ///
    /// Blocks until the session's token is cancelled.
    pub fn join(mut self) -> u64 {
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for PanPoller {
    fn drop(&mut self) {
        // Joining here could deadlock against a caller holding the
        // controller lock, so only signal.
        self.token.cancel();
    }
}

fn poll_loop(controller: SharedController, token: CancellationToken, interval: Duration) -> u64 {
    let ticker = tick(interval);
    let mut ticks = 0;
    debug!(interval_ms = interval.as_millis() as u64, "pan poll started");

    while ticker.recv().is_ok() {
        if token.is_cancelled() {
            break;
        }
        let mut guard = controller.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            break;
        }
        let state = guard.tick();
        ticks += 1;
        trace!(%state, "pan poll tick");
    }

    debug!(ticks, "pan poll stopped");
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
