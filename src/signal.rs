//! Signal channel: the bidirectional low-latency control link to the backend
//!
//! Carries voice-activity and commit events inbound, turn-state
//! synchronization outbound, and raw microphone frames as binary
//! messages. Inbound messages are processed in arrival order; there is
//! no ordering guarantee across reconnects.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::Result;
use crate::arbiter::CommitArbiter;
use crate::interrupt::InterruptCoordinator;
use crate::session::SessionController;

/// Control messages from the backend
///
/// Unrecognized types deserialize to [`InboundSignal::Unknown`] and are
/// ignored; `commit` carries no text — the client's own transcript
/// buffer is the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundSignal {
    /// Hard interruption: cancel all in-flight work
    Interrupt,
    /// Stop agent audio (same effect as interrupt)
    StopAudio,
    /// Backend-authoritative "the user has stopped speaking"
    Commit,
    /// Any other message type, ignored
    #[serde(other)]
    Unknown,
}

/// Agent floor state reported to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AiStatus {
    /// Agent audio is playing
    Speaking,
    /// Microphone has the floor
    Listening,
}

/// Control messages to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundSignal {
    /// Turn-state synchronization; re-announced per playback chunk to
    /// keep backend voice-activity gating refreshed
    AiState {
        /// Current floor owner
        status: AiStatus,
    },
    /// Response-language change
    LangUpdate {
        /// New language code
        lang: String,
    },
}

/// WebSocket client for the backend control channel
pub struct SignalChannel {
    url: String,
    session: Arc<SessionController>,
    coordinator: Arc<InterruptCoordinator>,
    arbiter: Arc<CommitArbiter>,
    outbound: mpsc::UnboundedReceiver<OutboundSignal>,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl SignalChannel {
    /// Create a signal channel; call [`SignalChannel::run`] to connect
    #[must_use]
    pub fn new(
        url: String,
        session: Arc<SessionController>,
        coordinator: Arc<InterruptCoordinator>,
        arbiter: Arc<CommitArbiter>,
        outbound: mpsc::UnboundedReceiver<OutboundSignal>,
        frames: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            url,
            session,
            coordinator,
            arbiter,
            outbound,
            frames,
        }
    }

    /// Connect and pump messages until the session is deactivated
    ///
    /// On connection loss the channel reconnects after a fixed delay
    /// while the session remains active. Socket failures are transient:
    /// logged at warn, never surfaced.
    pub async fn run(mut self) {
        while self.session.is_active() {
            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    tracing::info!(url = %self.url, "signal channel connected");
                    match self.pump(stream).await {
                        Ok(()) => tracing::warn!("signal channel closed"),
                        Err(e) => tracing::warn!(error = %e, "signal channel error"),
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "signal channel connect failed");
                }
            }

            if !self.session.is_active() {
                break;
            }
            let delay = self.session.policy().reconnect_delay_ms;
            tracing::debug!(delay_ms = delay, "signal channel reconnecting");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    async fn pump(&mut self, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Result<()> {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
                Some(signal) = self.outbound.recv() => {
                    let json = serde_json::to_string(&signal)?;
                    write.send(Message::Text(json.into())).await?;
                }
                Some(frame) = self.frames.recv() => {
                    write.send(Message::Binary(frame.into())).await?;
                }
            }
        }
    }

    /// Route one inbound control message; malformed payloads are
    /// dropped silently and the channel stays open
    fn dispatch(&self, raw: &str) {
        let Ok(signal) = serde_json::from_str::<InboundSignal>(raw) else {
            return;
        };

        match signal {
            InboundSignal::Interrupt | InboundSignal::StopAudio => {
                tracing::debug!(?signal, "stop signal received");
                self.coordinator.stop_playback();
            }
            InboundSignal::Commit => self.arbiter.on_commit(),
            InboundSignal::Unknown => {}
        }
    }
}
