//! Configuration for the samvad client

use std::path::Path;

use serde::Deserialize;

use crate::session::TimingPolicy;
use crate::{Error, Result};

/// Samples per captured audio frame (32 ms at 16 kHz)
pub const FRAME_SAMPLES: usize = 512;

/// Sample rate for microphone capture (matches backend VAD)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized speech from the TTS endpoint
pub const PLAYBACK_SAMPLE_RATE: u32 = 22_050;

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend endpoints
    pub endpoints: Endpoints,

    /// Initial response language code (e.g. "en", "hi", "mr")
    pub language: String,

    /// Start with the microphone muted
    pub muted: bool,
}

/// Backend endpoint URLs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// WebSocket control channel carrying voice-activity and commit events
    pub signal_url: String,

    /// Streaming chat endpoint (newline-delimited JSON response)
    pub chat_url: String,

    /// Speech-synthesis endpoint (raw 16-bit LE PCM response)
    pub tts_url: String,

    /// Fire-and-forget session reset endpoint
    pub reset_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::from_base("http://127.0.0.1:8000")
    }
}

impl Endpoints {
    /// Derive all endpoints from a backend base URL
    #[must_use]
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{base}")
        };

        Self {
            signal_url: format!("{ws_base}/ws/audio"),
            chat_url: format!("{base}/api/stream_chat"),
            tts_url: format!("{base}/api/v1/generate"),
            reset_url: format!("{base}/api/reset"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            language: "en".to_string(),
            muted: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Ok(toml::from_str(&raw)?)
    }

    /// The timing policy for turn guards and cooldown windows
    ///
    /// Durations are part of the client's contract with the backend and
    /// are not configurable.
    #[must_use]
    pub fn timing(&self) -> TimingPolicy {
        TimingPolicy::default()
    }
}
