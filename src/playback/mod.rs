//! Gapless streaming playback of speech cues
//!
//! A single consumer loop drains the cue queue strictly in order,
//! streams synthesized PCM for each cue, and schedules decoded chunks
//! back-to-back on a virtual output clock. The queue, prefetch cache,
//! active-source set, and virtual clock are owned here exclusively;
//! other components may only enqueue cues or request a full reset
//! through the interrupt coordinator.

mod pcm;
mod sink;

pub use pcm::PcmDecoder;
pub use sink::{AudioSink, CpalSink, SourceId};

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PLAYBACK_SAMPLE_RATE;
use crate::recognizer::Recognizer;
use crate::session::{SessionController, SessionState};
use crate::signal::{AiStatus, OutboundSignal};
use crate::{Error, Result};

/// Minimum scheduling lead so jitter cannot collide with the playhead
const MIN_LEAD_SECS: f64 = 0.02;

/// One unit of response text designated for synthesis and playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechCue {
    /// Text to synthesize
    pub text: String,
    /// Synthesis language code
    pub lang: String,
}

/// Request body for the speech-synthesis endpoint
#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    lang: &'a str,
}

/// A pending synthesis response fetched ahead of its cue
struct PrefetchEntry {
    text: String,
    handle: JoinHandle<Result<reqwest::Response>>,
}

/// Orders, fetches, and schedules speech-cue audio
pub struct PlaybackScheduler {
    session: Arc<SessionController>,
    sink: Arc<dyn AudioSink>,
    http: reqwest::Client,
    tts_url: String,
    signal_tx: mpsc::UnboundedSender<OutboundSignal>,
    recognizer: Arc<dyn Recognizer>,
    queue: Mutex<VecDeque<SpeechCue>>,
    prefetch: Mutex<Option<PrefetchEntry>>,
    next_start: Mutex<f64>,
    active: Mutex<HashSet<SourceId>>,
    loop_running: AtomicBool,
    tts_cancel: Mutex<Option<CancellationToken>>,
}

impl PlaybackScheduler {
    /// Create a scheduler rendering through `sink`
    #[must_use]
    pub fn new(
        session: Arc<SessionController>,
        sink: Arc<dyn AudioSink>,
        http: reqwest::Client,
        tts_url: String,
        signal_tx: mpsc::UnboundedSender<OutboundSignal>,
        recognizer: Arc<dyn Recognizer>,
    ) -> Self {
        Self {
            session,
            sink,
            http,
            tts_url,
            signal_tx,
            recognizer,
            queue: Mutex::new(VecDeque::new()),
            prefetch: Mutex::new(None),
            next_start: Mutex::new(0.0),
            active: Mutex::new(HashSet::new()),
            loop_running: AtomicBool::new(false),
            tts_cancel: Mutex::new(None),
        }
    }

    /// Append a cue to the playback queue
    pub fn enqueue(&self, cue: SpeechCue) {
        self.queue.lock().unwrap().push_back(cue);
    }

    /// Start the consumer loop; a no-op while one is already running
    pub fn start(self: &Arc<Self>) {
        if self.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run_loop().await;
            scheduler.loop_running.store(false, Ordering::SeqCst);
            // sources may already have drained while the loop ran
            scheduler.maybe_finish_speaking();
        });
    }

    /// Consume completion events from the sink
    ///
    /// Completions fire after real-time playback of a source finishes,
    /// never synchronously with scheduling.
    pub fn spawn_completion_pump(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<SourceId>) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                scheduler.on_source_ended(id);
            }
        });
    }

    /// Cancel synthesis work and wipe all scheduler state
    ///
    /// Only the interrupt coordinator calls this; it is the single path
    /// that resets the virtual clock to zero.
    pub fn reset(&self) {
        if let Some(token) = self.tts_cancel.lock().unwrap().take() {
            token.cancel();
        }
        self.queue.lock().unwrap().clear();
        if let Some(entry) = self.prefetch.lock().unwrap().take() {
            entry.handle.abort();
        }
        *self.next_start.lock().unwrap() = 0.0;
        self.sink.stop_all();
        self.active.lock().unwrap().clear();
    }

    /// Number of queued cues
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Number of scheduled sources that have not finished playing
    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Current virtual clock value in seconds
    #[must_use]
    pub fn next_start(&self) -> f64 {
        *self.next_start.lock().unwrap()
    }

    /// Whether a prefetched synthesis response is being held
    #[must_use]
    pub fn has_prefetch(&self) -> bool {
        self.prefetch.lock().unwrap().is_some()
    }

    async fn run_loop(&self) {
        loop {
            if self.session.is_interrupted() {
                return;
            }
            let Some(cue) = self.queue.lock().unwrap().pop_front() else {
                break;
            };

            match self.play_cue(cue).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return,
                Err(e) => tracing::warn!(error = %e, "speech cue playback failed"),
            }
        }

        // natural completion: the synthesis token has no more work bound
        // to it
        self.tts_cancel.lock().unwrap().take();
    }

    async fn play_cue(&self, cue: SpeechCue) -> Result<()> {
        self.session.set_state(SessionState::Speaking);
        self.announce(AiStatus::Speaking);

        let token = self.tts_token();
        let response = match self.take_prefetched(&cue.text) {
            Some(handle) => match handle.await {
                Ok(result) => result?,
                // aborted mid-flight by an interrupt
                Err(_) => return Err(Error::Cancelled),
            },
            None => self.fetch(&cue, &token).await?,
        };

        self.prefetch_next(&token);

        let mut stream = response.bytes_stream();
        let mut decoder = PcmDecoder::new();

        loop {
            if self.session.is_interrupted() {
                return Err(Error::Cancelled);
            }
            // refresh backend voice-activity gating on every chunk
            self.announce(AiStatus::Speaking);

            let chunk = tokio::select! {
                () = token.cancelled() => return Err(Error::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };

            let samples = decoder.decode(&chunk?);
            if !samples.is_empty() {
                self.schedule_chunk(samples);
            }
        }

        Ok(())
    }

    async fn fetch(&self, cue: &SpeechCue, token: &CancellationToken) -> Result<reqwest::Response> {
        let request = self.http.post(&self.tts_url).json(&SynthesisRequest {
            text: &cue.text,
            lang: &cue.lang,
        });

        tokio::select! {
            () = token.cancelled() => Err(Error::Cancelled),
            response = request.send() => Ok(response?),
        }
    }

    /// Consume the prefetch entry when it matches this cue's text
    fn take_prefetched(&self, text: &str) -> Option<JoinHandle<Result<reqwest::Response>>> {
        let mut slot = self.prefetch.lock().unwrap();
        if slot.as_ref().is_some_and(|entry| entry.text == text) {
            slot.take().map(|entry| entry.handle)
        } else {
            None
        }
    }

    /// Opportunistically fetch synthesis for the next queued cue
    ///
    /// At most one entry is retained; the fetch is not awaited.
    fn prefetch_next(&self, token: &CancellationToken) {
        let Some(next) = self.queue.lock().unwrap().front().cloned() else {
            return;
        };

        let mut slot = self.prefetch.lock().unwrap();
        if slot.as_ref().is_some_and(|entry| entry.text == next.text) {
            return;
        }
        if let Some(stale) = slot.take() {
            stale.handle.abort();
        }

        tracing::debug!(text = %next.text, "prefetching next cue");

        let http = self.http.clone();
        let url = self.tts_url.clone();
        let token = token.clone();
        let text = next.text.clone();
        let handle = tokio::spawn(async move {
            let request = http.post(&url).json(&SynthesisRequest {
                text: &next.text,
                lang: &next.lang,
            });
            tokio::select! {
                () = token.cancelled() => Err(Error::Cancelled),
                response = request.send() => Ok(response?),
            }
        });

        *slot = Some(PrefetchEntry { text, handle });
    }

    /// Schedule one decoded chunk gaplessly after the previous one
    fn schedule_chunk(&self, samples: Vec<f32>) {
        #[allow(clippy::cast_precision_loss)]
        let duration = samples.len() as f64 / f64::from(PLAYBACK_SAMPLE_RATE);

        let mut next_start = self.next_start.lock().unwrap();
        let start = (self.sink.current_time() + MIN_LEAD_SECS).max(*next_start);
        let id = self.sink.schedule(samples, start);
        self.active.lock().unwrap().insert(id);
        *next_start = start + duration;
    }

    fn on_source_ended(&self, id: SourceId) {
        self.active.lock().unwrap().remove(&id);
        self.maybe_finish_speaking();
    }

    /// Yield the floor once everything scheduled has actually played out
    fn maybe_finish_speaking(&self) {
        if self.loop_running.load(Ordering::SeqCst)
            || self.session.is_interrupted()
            || self.session.state() != SessionState::Speaking
            || !self.active.lock().unwrap().is_empty()
            || !self.queue.lock().unwrap().is_empty()
        {
            return;
        }

        self.session.set_state(SessionState::Listening);
        self.session.mark_playback_complete();
        // the recognizer may still be holding agent speech; force a restart
        self.recognizer.stop();
        self.announce(AiStatus::Listening);
    }

    fn tts_token(&self) -> CancellationToken {
        self.tts_cancel
            .lock()
            .unwrap()
            .get_or_insert_with(CancellationToken::new)
            .clone()
    }

    fn announce(&self, status: AiStatus) {
        let _ = self.signal_tx.send(OutboundSignal::AiState { status });
    }
}
