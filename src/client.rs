//! # Relay Client
//!
//! A Rust client for the relay's WebSocket protocol, used by tools and the
//! end-to-end tests.
//!
//! ## Audio path:
//! Captured float samples at any rate are resampled to 16 kHz and quantized to
//! PCM16 before they are sent as `audio_input`, the same conversion a browser
//! client performs.
//!
//! ## Reconnects:
//! `ReconnectPolicy` is explicit and owned by the caller. The relay never
//! reconnects a session itself; a reconnect here is a brand-new session.

use crate::audio::AudioFrame;
use crate::error::RelayError;
use crate::protocol::{AudioPayload, ClientMessage, RelayMessage};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Exponential backoff for connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay after the given failed attempt (1-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

pub struct RelayClient {
    url: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let (stream, _response) = connect_async(url).await?;
        debug!(url = %url, "Connected to relay");
        Ok(Self {
            url: url.to_string(),
            stream,
        })
    }

    /// Connect, retrying per `policy`. Returns the last error once attempts run out.
    pub async fn connect_with_retry(url: &str, policy: &ReconnectPolicy) -> Result<Self, RelayError> {
        let mut attempt = 1;
        loop {
            match Self::connect(url).await {
                Ok(client) => return Ok(client),
                Err(e) if attempt >= policy.max_attempts => return Err(e),
                Err(e) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Relay connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), RelayError> {
        let json = serde_json::to_string(message)
            .map_err(|e| RelayError::Protocol(format!("failed to encode message: {}", e)))?;
        self.stream.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Convert captured float audio and send it as one `audio_input`.
    pub async fn send_capture(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), RelayError> {
        let frame = AudioFrame::from_capture(samples, sample_rate)?;
        self.send_pcm16(frame.as_bytes()).await
    }

    /// Send PCM16 bytes as they are. The relay validates them.
    pub async fn send_pcm16(&mut self, bytes: &[u8]) -> Result<(), RelayError> {
        self.send(&ClientMessage::AudioInput {
            audio: AudioPayload::from_bytes(bytes),
        })
        .await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), RelayError> {
        self.send(&ClientMessage::TextInput { text: text.into() }).await
    }

    pub async fn interrupt(&mut self) -> Result<(), RelayError> {
        self.send(&ClientMessage::Interrupt).await
    }

    pub async fn playback_complete(&mut self) -> Result<(), RelayError> {
        self.send(&ClientMessage::PlaybackComplete).await
    }

    /// Next message from the relay, or None once the relay closed the connection.
    pub async fn next_message(&mut self) -> Result<Option<RelayMessage>, RelayError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => {
                    let message = serde_json::from_str(&text)
                        .map_err(|e| RelayError::Protocol(format!("invalid relay message: {}", e)))?;
                    return Ok(Some(message));
                }
                Message::Close(_) => return Ok(None),
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), RelayError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
