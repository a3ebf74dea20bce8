//! # Client Message Protocol
//!
//! One JSON object per WebSocket text frame; the `type` field selects the shape.
//!
//! ## Client → Relay:
//! - `audio_input` `{audio}`: PCM16 bytes, as a JSON byte array or a base64 string
//! - `text_input` `{text}`: a typed user turn
//! - `interrupt`: cancel the response currently being spoken
//! - `playback_complete`: local playback of the last response finished
//!
//! ## Relay → Client:
//! - `session_started` `{message}`, `transcript` `{text}`, `text_response` `{text}`,
//!   `audio_response` `{data, mimeType}`, `interrupted`, `error` `{message}`

use crate::error::RelayError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Messages the relay sends to its client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// The backend acknowledged setup; the session accepts input.
    SessionStarted { message: String },

    /// Echo of the user text forwarded to the backend.
    Transcript { text: String },

    /// Text part of a backend turn.
    TextResponse { text: String },

    /// Audio part of a backend turn, base64 data passed through as received.
    AudioResponse {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Interruption acknowledged; the client should stop playback now.
    Interrupted,

    /// Any failure, recoverable or not.
    Error { message: String },
}

impl RelayMessage {
    pub fn error(err: &RelayError) -> Self {
        RelayMessage::Error {
            message: err.message().to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::SessionStarted { .. } => "session_started",
            RelayMessage::Transcript { .. } => "transcript",
            RelayMessage::TextResponse { .. } => "text_response",
            RelayMessage::AudioResponse { .. } => "audio_response",
            RelayMessage::Interrupted => "interrupted",
            RelayMessage::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant holds only strings, serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"failed to encode message"}"#.to_string()
        })
    }
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    AudioInput { audio: AudioPayload },
    TextInput { text: String },
    Interrupt,
    PlaybackComplete,
}

impl ClientMessage {
    /// Parse one text frame. Bad JSON and unknown `type` values are Protocol errors.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        serde_json::from_str(raw).map_err(|e| RelayError::Protocol(format!("invalid message: {}", e)))
    }
}

/// Audio bytes as browsers send them: `Array.from(Uint8Array)` or base64.
///
/// Byte arrays are read as `u16` so out-of-range values become a Codec error
/// instead of failing the whole message parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AudioPayload {
    Bytes(Vec<u16>),
    Base64(String),
}

impl AudioPayload {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        AudioPayload::Base64(STANDARD.encode(bytes))
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, RelayError> {
        match self {
            AudioPayload::Bytes(values) => values
                .into_iter()
                .map(|value| {
                    u8::try_from(value).map_err(|_| {
                        RelayError::Codec(format!("audio byte value {} is out of range", value))
                    })
                })
                .collect(),
            AudioPayload::Base64(encoded) => Ok(STANDARD.decode(encoded.as_bytes())?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_message_serialization() {
        let json = RelayMessage::AudioResponse {
            data: "AAAA".into(),
            mime_type: "audio/pcm;rate=24000".into(),
        }
        .to_json();
        assert_eq!(
            json,
            r#"{"type":"audio_response","data":"AAAA","mimeType":"audio/pcm;rate=24000"}"#
        );

        assert_eq!(RelayMessage::Interrupted.to_json(), r#"{"type":"interrupted"}"#);
    }

    #[test]
    fn test_parse_client_messages() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"text_input","text":"range?"}"#).unwrap(),
            ClientMessage::TextInput { text: "range?".into() }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"interrupt"}"#).unwrap(),
            ClientMessage::Interrupt
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"playback_complete"}"#).unwrap(),
            ClientMessage::PlaybackComplete
        );
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = ClientMessage::parse(r#"{"type":"dance"}"#).unwrap_err();
        assert!(matches!(err, RelayError::Protocol(_)));
        assert!(matches!(ClientMessage::parse("{not json"), Err(RelayError::Protocol(_))));
    }

    #[test]
    fn test_audio_payload_forms() {
        let array = ClientMessage::parse(r#"{"type":"audio_input","audio":[1,0,255,127]}"#).unwrap();
        match array {
            ClientMessage::AudioInput { audio } => assert_eq!(audio.into_bytes().unwrap(), vec![1, 0, 255, 127]),
            other => panic!("unexpected message {:?}", other),
        }

        let base64 = ClientMessage::parse(r#"{"type":"audio_input","audio":"AQACAA=="}"#).unwrap();
        match base64 {
            ClientMessage::AudioInput { audio } => assert_eq!(audio.into_bytes().unwrap(), vec![1, 0, 2, 0]),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_audio_payload_bad_values_are_codec_errors() {
        assert!(matches!(
            AudioPayload::Bytes(vec![1, 300]).into_bytes(),
            Err(RelayError::Codec(_))
        ));
        assert!(matches!(
            AudioPayload::Base64("!!!".into()).into_bytes(),
            Err(RelayError::Codec(_))
        ));
    }
}
