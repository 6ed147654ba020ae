//! Shared test utilities
//!
//! A scripted audio sink, a local fixture backend, and a harness that
//! assembles a client without audio hardware or a live signal channel.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use samvad::{
    AudioSink, Clock, Config, Endpoints, ManualClock, Recognizer, SignalChannel, SourceId,
    VoiceClient,
};

/// One scheduled source, as the sink saw it
#[derive(Debug, Clone)]
pub struct Scheduled {
    pub id: SourceId,
    pub start: f64,
    pub samples: Vec<f32>,
}

/// Audio sink with a scripted clock and test-driven completions
pub struct MockSink {
    now: Mutex<f64>,
    next_id: AtomicU64,
    schedules: Mutex<Vec<Scheduled>>,
    stop_calls: AtomicU64,
    completions: mpsc::UnboundedSender<SourceId>,
}

impl MockSink {
    pub fn new(completions: mpsc::UnboundedSender<SourceId>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(0.0),
            next_id: AtomicU64::new(1),
            schedules: Mutex::new(Vec::new()),
            stop_calls: AtomicU64::new(0),
            completions,
        })
    }

    pub fn set_time(&self, seconds: f64) {
        *self.now.lock().unwrap() = seconds;
    }

    pub fn schedules(&self) -> Vec<Scheduled> {
        self.schedules.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Report real-time completion of every scheduled source
    pub fn complete_all(&self) {
        for scheduled in self.schedules.lock().unwrap().iter() {
            let _ = self.completions.send(scheduled.id);
        }
    }
}

impl AudioSink for MockSink {
    fn current_time(&self) -> f64 {
        *self.now.lock().unwrap()
    }

    fn schedule(&self, samples: Vec<f32>, start: f64) -> SourceId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.schedules
            .lock()
            .unwrap()
            .push(Scheduled { id, start, samples });
        id
    }

    fn stop_all(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recognizer that counts restart requests
#[derive(Default)]
pub struct RecordingRecognizer {
    stops: AtomicUsize,
}

impl RecordingRecognizer {
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Recognizer for RecordingRecognizer {
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A running fixture backend with chat, synthesis, and reset routes
pub struct Backend {
    pub base: String,
    pub chat_requests: Arc<Mutex<Vec<Value>>>,
    pub tts_requests: Arc<Mutex<Vec<String>>>,
    pub resets: Arc<AtomicUsize>,
}

impl Backend {
    pub fn chat_hits(&self) -> usize {
        self.chat_requests.lock().unwrap().len()
    }

    pub fn tts_texts(&self) -> Vec<String> {
        self.tts_requests.lock().unwrap().clone()
    }
}

/// Sample value the fixture synthesizer emits for `text`
pub fn marker_sample(text: &str) -> f32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let marker = text.chars().count() as i16;
    f32::from(marker) / 32768.0
}

fn pcm_body(text: &str, samples: usize) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let marker = text.chars().count() as i16;
    let mut bytes = Vec::with_capacity(samples * 2);
    for _ in 0..samples {
        bytes.extend_from_slice(&marker.to_le_bytes());
    }
    bytes
}

/// Number of PCM samples the fixture synthesizer returns per request
pub const TTS_SAMPLES: usize = 441;

/// Spawn a fixture backend whose chat route streams `chat_chunks` one
/// HTTP chunk at a time and whose synthesis route returns marker PCM
pub async fn spawn_backend(chat_chunks: Vec<String>) -> Backend {
    spawn_backend_paced(chat_chunks, 5).await
}

/// [`spawn_backend`] with a configurable gap between chat chunks
pub async fn spawn_backend_paced(chat_chunks: Vec<String>, chunk_gap_ms: u64) -> Backend {
    let chat_requests: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let tts_requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let resets = Arc::new(AtomicUsize::new(0));

    let chat_state = Arc::clone(&chat_requests);
    let chat = move |Json(body): Json<Value>| {
        let chat_state = Arc::clone(&chat_state);
        let chunks = chat_chunks.clone();
        async move {
            chat_state.lock().unwrap().push(body);
            let stream = futures::stream::iter(chunks).then(move |chunk| async move {
                tokio::time::sleep(Duration::from_millis(chunk_gap_ms)).await;
                Ok::<_, std::io::Error>(Bytes::from(chunk))
            });
            Body::from_stream(stream)
        }
    };

    let tts_state = Arc::clone(&tts_requests);
    let tts = move |Json(body): Json<Value>| {
        let tts_state = Arc::clone(&tts_state);
        async move {
            let text = body["text"].as_str().unwrap_or_default().to_string();
            tts_state.lock().unwrap().push(text.clone());
            pcm_body(&text, TTS_SAMPLES)
        }
    };

    let reset_state = Arc::clone(&resets);
    let reset = move || {
        let reset_state = Arc::clone(&reset_state);
        async move {
            reset_state.fetch_add(1, Ordering::SeqCst);
        }
    };

    let router = Router::new()
        .route("/api/stream_chat", post(chat))
        .route("/api/v1/generate", post(tts))
        .route("/api/reset", post(reset));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture backend");
    let addr = listener.local_addr().expect("fixture backend addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fixture backend");
    });

    Backend {
        base: format!("http://{addr}"),
        chat_requests,
        tts_requests,
        resets,
    }
}

pub const CLOCK_BASE: u64 = 1_000_000;

/// Assembled client over a fixture backend, signal channel not running
pub struct Harness {
    pub client: VoiceClient,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<MockSink>,
    pub recognizer: Arc<RecordingRecognizer>,
    // held so outbound sends stay deliverable
    _signal: SignalChannel,
}

pub fn harness(base: &str) -> Harness {
    let config = Config {
        endpoints: Endpoints::from_base(base),
        language: "en".to_string(),
        muted: false,
    };

    let clock = Arc::new(ManualClock::new(CLOCK_BASE));
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let sink = MockSink::new(completions_tx);
    let recognizer = Arc::new(RecordingRecognizer::default());

    let (client, signal) = VoiceClient::with_parts(
        &config,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&sink) as Arc<dyn AudioSink>,
        Arc::clone(&recognizer) as Arc<dyn Recognizer>,
        completions_rx,
    );

    Harness {
        client,
        clock,
        sink,
        recognizer,
        _signal: signal,
    }
}

/// Poll `condition` until it holds or two seconds elapse
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
