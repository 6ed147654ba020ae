//! Interrupt coordinator: atomic cancellation of all in-flight work
//!
//! The chat and synthesis cancellation tokens are deliberately separate:
//! merging them would let a new chat turn cancel still-playing audio
//! from a prior, unrelated turn.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::playback::PlaybackScheduler;
use crate::session::{SessionController, SessionState};

/// Cancels submission and playback work and resets scheduler state
pub struct InterruptCoordinator {
    session: Arc<SessionController>,
    scheduler: Arc<PlaybackScheduler>,
    chat_cancel: Mutex<Option<CancellationToken>>,
    grace: Mutex<Option<JoinHandle<()>>>,
}

impl InterruptCoordinator {
    /// Create a coordinator over the given scheduler
    #[must_use]
    pub fn new(session: Arc<SessionController>, scheduler: Arc<PlaybackScheduler>) -> Self {
        Self {
            session,
            scheduler,
            chat_cancel: Mutex::new(None),
            grace: Mutex::new(None),
        }
    }

    /// Register the cancellation token of the in-flight chat request
    pub fn install_chat_token(&self, token: CancellationToken) {
        *self.chat_cancel.lock().unwrap() = Some(token);
    }

    /// Stop everything: cancel in-flight requests, drain the playback
    /// scheduler, and return the floor to the user
    ///
    /// Idempotent. The interrupt flag stays raised for a short grace
    /// period so residual asynchronous events (late chunk-completion
    /// callbacks, trailing stream reads) still observe the interrupt and
    /// cannot resurrect stale state.
    pub fn stop_playback(&self) {
        self.cancel_grace();
        self.halt();

        let session = Arc::clone(&self.session);
        let grace_ms = self.session.policy().interrupt_grace_ms;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(grace_ms)).await;
            session.set_interrupted(false);
        });
        *self.grace.lock().unwrap() = Some(handle);
    }

    /// Playback-stop path used by the submission pipeline before a new
    /// turn: identical teardown, but the interrupt flag is lowered
    /// immediately so the new turn's own audio is not absorbed
    pub fn yield_floor(&self) {
        self.cancel_grace();
        self.halt();
        self.session.set_interrupted(false);
    }

    fn halt(&self) {
        tracing::debug!("interrupting all in-flight work");
        self.session.set_interrupted(true);

        if let Some(token) = self.chat_cancel.lock().unwrap().take() {
            token.cancel();
        }
        self.scheduler.reset();
        self.session.set_state(SessionState::Listening);
    }

    fn cancel_grace(&self) {
        if let Some(previous) = self.grace.lock().unwrap().take() {
            previous.abort();
        }
    }
}
