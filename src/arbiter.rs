//! Commit arbiter: decides when an utterance becomes a committed turn
//!
//! Interim transcripts are advisory and may arrive late; the backend
//! `commit` signal is authoritative but carries no text. The client's
//! own transcript buffer is the commit payload — if it is empty or
//! stale when `commit` arrives, no turn is submitted. That coupling is
//! a contract, not a bug.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::session::{SessionController, SessionState};
use crate::submit::{PendingCommit, SubmissionPipeline};

/// Turns interim transcript text and backend commit events into turns
pub struct CommitArbiter {
    session: Arc<SessionController>,
    submission: Arc<SubmissionPipeline>,
    pending: Arc<PendingCommit>,
}

impl CommitArbiter {
    /// Create an arbiter feeding `submission`
    #[must_use]
    pub fn new(
        session: Arc<SessionController>,
        submission: Arc<SubmissionPipeline>,
        pending: Arc<PendingCommit>,
    ) -> Self {
        Self {
            session,
            submission,
            pending,
        }
    }

    /// Absorb one interim transcript update from the recognizer
    ///
    /// The whole transcript is replaced, never appended. Updates are
    /// discarded while the agent is speaking and during the absorption
    /// window after a submission, when the recognizer may still emit
    /// results for speech already consumed into the submitted turn.
    pub fn on_interim(&self, text: &str) {
        if self.session.state() == SessionState::Speaking {
            return;
        }
        if self.session.in_absorption_window() {
            tracing::debug!("absorbing late recognizer output");
            return;
        }
        if !text.trim().is_empty() {
            self.pending.set_transcript(text);
        }
    }

    /// Handle a backend commit signal
    ///
    /// Pause-detection authority rests with the backend, so execution is
    /// scheduled with zero added delay; the scheduled task still
    /// re-validates and can be cancelled by a competing submission.
    pub fn on_commit(self: &Arc<Self>) {
        self.pending.cancel();

        let trimmed = self.pending.transcript().trim().to_string();
        let min_chars = self.session.policy().min_commit_chars;

        if trimmed.chars().count() < min_chars {
            if !trimmed.is_empty() {
                tracing::debug!(text = %trimmed, "discarding short transcript as noise");
            }
            self.pending.clear_transcript();
            return;
        }
        if self.session.is_submitting() {
            tracing::debug!("commit dropped, submission in flight");
            return;
        }

        tracing::debug!(text = %trimmed, "commit accepted");

        let (armed_tx, armed_rx) = oneshot::channel::<()>();
        let arbiter = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // run only once our abort handle is registered, then take it
            // back out: the submission pipeline cancels the pending
            // dispatch when it accepts a turn, and that must never abort
            // the very task doing the submitting
            if armed_rx.await.is_err() {
                return;
            }
            arbiter.pending.disarm();

            let text = arbiter.pending.take_transcript();
            let min_chars = arbiter.session.policy().min_commit_chars;
            if text.trim().chars().count() < min_chars || arbiter.session.is_submitting() {
                return;
            }
            arbiter.submission.submit_turn(&text).await;
        });
        self.pending.install(handle.abort_handle());
        let _ = armed_tx.send(());
    }

    /// Current transcript buffer contents
    #[must_use]
    pub fn interim_snapshot(&self) -> String {
        self.pending.transcript()
    }
}
