//! Samvad - real-time turn-taking client for voice conversational agents
//!
//! This library provides the client-side core of a spoken conversation:
//! - Turn admission guards (debounce, duplicate, post-agent echo)
//! - Backend-driven commit arbitration over a WebSocket signal channel
//! - Streamed chat submission with incremental display events
//! - Gapless streamed speech playback with one-ahead prefetch
//! - Hard interruption that cancels every in-flight stage atomically
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     VoiceClient                      │
//! │  Capture  │  Signal Channel  │  Submission  │  UI    │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │                 SessionController                     │
//! │   State  │  Admission Guards  │  Timing Policy       │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │   Commit Arbiter → Submission → Playback Scheduler   │
//! │           Interrupt Coordinator (cancels all)        │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod arbiter;
pub mod capture;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod playback;
pub mod recognizer;
pub mod session;
pub mod signal;
pub mod submit;

pub use arbiter::CommitArbiter;
pub use capture::CapturePipeline;
pub use client::VoiceClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CAPTURE_SAMPLE_RATE, Config, Endpoints, FRAME_SAMPLES, PLAYBACK_SAMPLE_RATE};
pub use error::{Error, Result};
pub use interrupt::InterruptCoordinator;
pub use playback::{AudioSink, CpalSink, PcmDecoder, PlaybackScheduler, SourceId, SpeechCue};
pub use recognizer::{NullRecognizer, Recognizer};
pub use session::{Rejection, SessionController, SessionState, TimingPolicy, Turn};
pub use signal::{AiStatus, InboundSignal, OutboundSignal, SignalChannel};
pub use submit::{PendingCommit, SubmissionPipeline, UiEvent};
