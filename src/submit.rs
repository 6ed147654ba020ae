//! Submission pipeline: one committed turn in, one streamed response out
//!
//! At most one submission is in flight at any time. The streamed
//! response is newline-delimited JSON; text deltas go to the display
//! collaborator and speech cues to the playback scheduler.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::interrupt::InterruptCoordinator;
use crate::playback::{PlaybackScheduler, SpeechCue};
use crate::recognizer::Recognizer;
use crate::session::{SessionController, SessionState, Turn};
use crate::{Error, Result};

/// Events for the display collaborator (chat surface)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// A user turn was accepted and submitted
    UserTurn(String),
    /// Incremental agent response text
    AssistantDelta(String),
}

/// Request body for the chat endpoint
#[derive(Serialize)]
struct ChatRequest<'a> {
    text: &'a str,
    language: String,
}

/// One newline-delimited record of the streamed chat response
///
/// Malformed or unrecognized lines are dropped silently.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamRecord {
    /// Incremental response-text delta
    Text { content: String },
    /// Response text designated for speech synthesis
    AudioText { content: String, lang: String },
}

/// Shared commit state between the arbiter and the submission pipeline
///
/// Holds the interim transcript buffer and the abort handle of the
/// currently scheduled (not yet executed) commit dispatch. The arbiter
/// installs dispatch tasks and maintains the transcript; the submission
/// pipeline cancels the dispatch and clears the transcript whenever a
/// turn is accepted through any path.
#[derive(Default)]
pub struct PendingCommit {
    slot: Mutex<Option<AbortHandle>>,
    transcript: Mutex<String>,
}

impl PendingCommit {
    /// Replace the pending dispatch, aborting any previous one
    pub fn install(&self, handle: AbortHandle) {
        if let Some(previous) = self.slot.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the pending dispatch, if any
    pub fn cancel(&self) {
        if let Some(handle) = self.slot.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Drop the pending dispatch without aborting it
    ///
    /// The dispatch task calls this once it starts running, so a
    /// cancellation issued on its own behalf cannot abort it mid-turn.
    pub fn disarm(&self) {
        self.slot.lock().unwrap().take();
    }

    /// Replace the transcript buffer
    pub fn set_transcript(&self, text: &str) {
        *self.transcript.lock().unwrap() = text.to_string();
    }

    /// Current transcript buffer contents
    #[must_use]
    pub fn transcript(&self) -> String {
        self.transcript.lock().unwrap().clone()
    }

    /// Take the transcript, leaving the buffer empty
    pub fn take_transcript(&self) -> String {
        std::mem::take(&mut *self.transcript.lock().unwrap())
    }

    /// Clear the transcript buffer
    pub fn clear_transcript(&self) {
        self.transcript.lock().unwrap().clear();
    }
}

/// Streams chat responses for committed turns
pub struct SubmissionPipeline {
    session: Arc<SessionController>,
    coordinator: Arc<InterruptCoordinator>,
    scheduler: Arc<PlaybackScheduler>,
    recognizer: Arc<dyn Recognizer>,
    pending: Arc<PendingCommit>,
    http: reqwest::Client,
    chat_url: String,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
}

impl SubmissionPipeline {
    /// Create a pipeline posting to `chat_url`
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<SessionController>,
        coordinator: Arc<InterruptCoordinator>,
        scheduler: Arc<PlaybackScheduler>,
        recognizer: Arc<dyn Recognizer>,
        pending: Arc<PendingCommit>,
        http: reqwest::Client,
        chat_url: String,
        ui_tx: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            session,
            coordinator,
            scheduler,
            recognizer,
            pending,
            http,
            chat_url,
            ui_tx,
        }
    }

    /// Submit one turn and stream its response to completion
    ///
    /// Fails fast and silently when any admission guard rejects the
    /// text; guard rejections are policy decisions, not errors.
    pub async fn submit_turn(&self, text: &str) {
        let normalized = text.trim().to_lowercase();

        let submitted_at = match self.session.try_begin_submission(&normalized) {
            Ok(at) => at,
            Err(rejection) => {
                tracing::debug!(?rejection, text = %normalized, "submission rejected");
                return;
            }
        };
        let turn = Turn {
            text: text.to_string(),
            submitted_at,
        };

        tracing::info!(text = %turn.text, "submitting turn");

        self.pending.cancel();
        // the transcript buffer may still hold speech already consumed
        // into this turn
        self.pending.clear_transcript();
        // the recognizer may hold a partial transcript of this same turn
        self.recognizer.stop();
        // the agent yields the floor before the new turn begins
        self.coordinator.yield_floor();

        let _ = self.ui_tx.send(UiEvent::UserTurn(turn.text.clone()));

        let token = CancellationToken::new();
        self.coordinator.install_chat_token(token.clone());

        match self.stream_response(&turn, &token).await {
            Ok(()) => {}
            // deliberate cancellation is expected and silent
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::warn!(error = %e, "chat stream failed"),
        }

        self.session.end_submission();
        // if playback already holds the floor, it owns the transition
        // back to listening once its last source finishes
        if !self.session.is_interrupted() && self.session.state() != SessionState::Speaking {
            self.session.set_state(SessionState::Listening);
        }
    }

    async fn stream_response(&self, turn: &Turn, token: &CancellationToken) -> Result<()> {
        let request = self.http.post(&self.chat_url).json(&ChatRequest {
            text: &turn.text,
            language: self.session.language(),
        });

        let response = tokio::select! {
            () = token.cancelled() => return Err(Error::Cancelled),
            response = request.send() => response?,
        };

        let mut stream = response.bytes_stream();
        // incomplete trailing bytes are buffered until a newline
        // completes them
        let mut partial: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                () = token.cancelled() => return Err(Error::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            if self.session.is_interrupted() {
                return Err(Error::Cancelled);
            }

            partial.extend_from_slice(&chunk?);
            while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = partial.drain(..=pos).collect();
                if let Ok(text) = std::str::from_utf8(&line) {
                    self.handle_line(text.trim());
                }
            }
        }

        Ok(())
    }

    fn handle_line(&self, line: &str) {
        if line.is_empty() || self.session.is_interrupted() {
            return;
        }
        let Ok(record) = serde_json::from_str::<StreamRecord>(line) else {
            return;
        };

        match record {
            StreamRecord::Text { content } => {
                let _ = self.ui_tx.send(UiEvent::AssistantDelta(content));
            }
            StreamRecord::AudioText { content, lang } => {
                self.scheduler.enqueue(SpeechCue {
                    text: content,
                    lang,
                });
                self.scheduler.start();
            }
        }
    }
}
