//! The assembled voice client
//!
//! [`VoiceClient`] wires the session controller, playback scheduler,
//! interrupt coordinator, submission pipeline, commit arbiter, signal
//! channel, and capture pipeline together and exposes the small surface
//! an embedding application needs: text submission, language and mute
//! control, session reset, and the stream of display events.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::arbiter::CommitArbiter;
use crate::capture::CapturePipeline;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::interrupt::InterruptCoordinator;
use crate::playback::{AudioSink, CpalSink, PlaybackScheduler, SourceId};
use crate::recognizer::{NullRecognizer, Recognizer};
use crate::session::SessionController;
use crate::signal::{OutboundSignal, SignalChannel};
use crate::submit::{PendingCommit, SubmissionPipeline, UiEvent};
use crate::{Error, Result};

/// A connected voice conversation client
pub struct VoiceClient {
    session: Arc<SessionController>,
    scheduler: Arc<PlaybackScheduler>,
    coordinator: Arc<InterruptCoordinator>,
    submission: Arc<SubmissionPipeline>,
    arbiter: Arc<CommitArbiter>,
    signal_tx: mpsc::UnboundedSender<OutboundSignal>,
    ui_rx: Mutex<Option<mpsc::UnboundedReceiver<UiEvent>>>,
    capture: Option<CapturePipeline>,
    http: reqwest::Client,
    reset_url: String,
}

impl VoiceClient {
    /// Open the microphone and speaker, connect the signal channel, and
    /// start the session
    ///
    /// # Errors
    ///
    /// Returns an error if audio device setup fails. Network failures
    /// are not errors here; the signal channel connects and reconnects
    /// in the background.
    pub fn new(config: &Config) -> Result<Self> {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn AudioSink> = Arc::new(CpalSink::new(completions_tx)?);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let capture = CapturePipeline::start(frames_tx, config.muted)?;

        let (mut client, signal) = Self::wire(
            config,
            Arc::new(SystemClock),
            sink,
            Arc::new(NullRecognizer),
            completions_rx,
            frames_rx,
        );
        client.capture = Some(capture);
        tokio::spawn(signal.run());

        Ok(client)
    }

    /// Assemble a client from injected collaborators, without touching
    /// audio hardware or connecting the signal channel
    ///
    /// The caller decides whether to run the returned [`SignalChannel`].
    #[must_use]
    pub fn with_parts(
        config: &Config,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AudioSink>,
        recognizer: Arc<dyn Recognizer>,
        completions_rx: mpsc::UnboundedReceiver<SourceId>,
    ) -> (Self, SignalChannel) {
        let (_frames_tx, frames_rx) = mpsc::unbounded_channel();
        Self::wire(config, clock, sink, recognizer, completions_rx, frames_rx)
    }

    fn wire(
        config: &Config,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AudioSink>,
        recognizer: Arc<dyn Recognizer>,
        completions_rx: mpsc::UnboundedReceiver<SourceId>,
        frames_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> (Self, SignalChannel) {
        let session = Arc::new(SessionController::new(
            clock,
            config.timing(),
            &config.language,
        ));
        let http = reqwest::Client::new();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let scheduler = Arc::new(PlaybackScheduler::new(
            Arc::clone(&session),
            sink,
            http.clone(),
            config.endpoints.tts_url.clone(),
            signal_tx.clone(),
            Arc::clone(&recognizer),
        ));
        scheduler.spawn_completion_pump(completions_rx);

        let coordinator = Arc::new(InterruptCoordinator::new(
            Arc::clone(&session),
            Arc::clone(&scheduler),
        ));
        let pending = Arc::new(PendingCommit::default());

        let submission = Arc::new(SubmissionPipeline::new(
            Arc::clone(&session),
            Arc::clone(&coordinator),
            Arc::clone(&scheduler),
            recognizer,
            Arc::clone(&pending),
            http.clone(),
            config.endpoints.chat_url.clone(),
            ui_tx,
        ));
        let arbiter = Arc::new(CommitArbiter::new(
            Arc::clone(&session),
            Arc::clone(&submission),
            pending,
        ));

        let signal = SignalChannel::new(
            config.endpoints.signal_url.clone(),
            Arc::clone(&session),
            Arc::clone(&coordinator),
            Arc::clone(&arbiter),
            signal_rx,
            frames_rx,
        );

        let client = Self {
            session,
            scheduler,
            coordinator,
            submission,
            arbiter,
            signal_tx,
            ui_rx: Mutex::new(Some(ui_rx)),
            capture: None,
            http,
            reset_url: config.endpoints.reset_url.clone(),
        };
        (client, signal)
    }

    /// Submit typed text as a turn, bypassing speech recognition
    ///
    /// Blank input is ignored. The text still passes every admission
    /// guard a spoken turn would.
    pub async fn submit_text(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.submission.submit_turn(text).await;
    }

    /// Change the response language and notify the backend
    pub fn set_language(&self, lang: &str) {
        self.session.set_language(lang);
        let _ = self.signal_tx.send(OutboundSignal::LangUpdate {
            lang: lang.to_string(),
        });
    }

    /// Mute or unmute the microphone
    pub fn set_muted(&self, muted: bool) {
        if let Some(capture) = &self.capture {
            capture.set_muted(muted);
        }
    }

    /// Whether the microphone is muted
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.capture.as_ref().is_some_and(CapturePipeline::is_muted)
    }

    /// Stop playback, cancel in-flight work, and ask the backend to
    /// clear its conversation state
    ///
    /// The backend reset is fire-and-forget; its outcome does not gate
    /// the local teardown.
    pub fn reset(&self) {
        self.coordinator.stop_playback();

        let http = self.http.clone();
        let url = self.reset_url.clone();
        tokio::spawn(async move {
            if let Err(e) = http.post(&url).send().await {
                tracing::warn!(error = %e, "backend reset failed");
            }
        });
    }

    /// Take the stream of display events
    ///
    /// # Errors
    ///
    /// Returns an error if the stream was already taken.
    pub fn ui_events(&self) -> Result<mpsc::UnboundedReceiver<UiEvent>> {
        self.ui_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Config("display event stream already taken".to_string()))
    }

    /// End the session; the signal channel stops reconnecting
    pub fn shutdown(&self) {
        self.session.deactivate();
        self.coordinator.stop_playback();
    }

    /// The session controller (state and guard inspection)
    #[must_use]
    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    /// The playback scheduler (queue and clock inspection)
    #[must_use]
    pub fn scheduler(&self) -> &Arc<PlaybackScheduler> {
        &self.scheduler
    }

    /// The interrupt coordinator
    #[must_use]
    pub fn coordinator(&self) -> &Arc<InterruptCoordinator> {
        &self.coordinator
    }

    /// The commit arbiter, for feeding recognizer output
    #[must_use]
    pub fn arbiter(&self) -> &Arc<CommitArbiter> {
        &self.arbiter
    }
}
