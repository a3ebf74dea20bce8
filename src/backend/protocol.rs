//! # Backend Wire Protocol
//!
//! JSON frames exchanged with the streaming voice backend.
//!
//! ## Outbound (relay → backend):
//! 1. Exactly one setup frame: `{"setup": {model, systemInstruction, generationConfig}}`
//! 2. Then any number of `{"realtimeInput": ...}` frames carrying audio chunks,
//!    a user text turn, or an interrupt directive
//!
//! ## Inbound (backend → relay):
//! - `{"setupComplete": {}}` once
//! - `{"serverContent": {"modelTurn": {"parts": [...]}}}` zero or more times per turn,
//!   optionally flagged with `turnComplete` / `interrupted`
//! - `{"error": ...}` when the backend rejects something

use crate::audio::{AudioFrame, BACKEND_AUDIO_MIME};
use crate::config::BackendConfig;
use crate::error::RelayError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SetupFrame {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub system_instruction: Content,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl SetupFrame {
    /// Build the setup frame for the configured model, persona, and voice.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            setup: Setup {
                model: format!("models/{}", config.active_model()),
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: config.system_instruction.clone(),
                    }],
                },
                generation_config: GenerationConfig {
                    response_modalities: config.response_modalities.clone(),
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice_name.clone(),
                            },
                        },
                    },
                },
            },
        }
    }
}

/// Session vocabulary translated into `realtimeInput` frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCommand {
    Audio(AudioFrame),
    Text(String),
    Interrupt,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputFrame {
    realtime_input: RealtimeInput,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    media_chunks: Option<Vec<MediaChunk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_input: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interrupt: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: &'static str,
    data: String,
}

impl BackendCommand {
    /// Serialize into the JSON text frame the backend expects.
    pub fn to_frame(&self) -> Result<String, RelayError> {
        let realtime_input = match self {
            BackendCommand::Audio(frame) => RealtimeInput {
                media_chunks: Some(vec![MediaChunk {
                    mime_type: BACKEND_AUDIO_MIME,
                    data: STANDARD.encode(frame.as_bytes()),
                }]),
                ..Default::default()
            },
            BackendCommand::Text(text) => RealtimeInput {
                user_input: Some(Content {
                    parts: vec![TextPart { text: text.clone() }],
                }),
                ..Default::default()
            },
            BackendCommand::Interrupt => RealtimeInput {
                interrupt: Some(true),
                ..Default::default()
            },
        };

        serde_json::to_string(&RealtimeInputFrame { realtime_input })
            .map_err(|e| RelayError::Transport(format!("failed to encode backend frame: {}", e)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendCommand::Audio(_) => "audio",
            BackendCommand::Text(_) => "text",
            BackendCommand::Interrupt => "interrupt",
        }
    }
}

/// Everything the backend link reports to its session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Setup acknowledged; the link is Ready.
    SetupComplete,
    /// A text part of the current model turn.
    Text(String),
    /// An inline binary part, base64 encoded as received.
    InlineData { mime_type: String, data: String },
    /// The backend finished (or abandoned) the current turn.
    TurnComplete,
    /// The backend reported an error frame.
    Error(String),
    /// A frame that matched nothing we understand.
    Unrecognized(String),
    /// The transport failed or closed unexpectedly. Emitted once; the link is Closed.
    Failed(RelayError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

/// Demultiplex one inbound frame into events.
///
/// Parts keep their order within the frame. A part carrying both text and inline
/// data yields the text first. A turn-end marker always comes after the parts.
pub fn parse_server_frame(raw: &str) -> Vec<BackendEvent> {
    let frame: ServerFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => return vec![BackendEvent::Unrecognized(format!("invalid JSON: {}", e))],
    };

    let mut events = Vec::new();

    if frame.setup_complete.is_some() {
        events.push(BackendEvent::SetupComplete);
    }

    if let Some(content) = frame.server_content {
        for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                events.push(BackendEvent::Text(text));
            }
            if let Some(inline) = part.inline_data {
                events.push(BackendEvent::InlineData {
                    mime_type: inline.mime_type,
                    data: inline.data,
                });
            }
        }

        if content.turn_complete || content.interrupted {
            events.push(BackendEvent::TurnComplete);
        }
    }

    if let Some(error) = frame.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        events.push(BackendEvent::Error(message));
    }

    if events.is_empty() {
        events.push(BackendEvent::Unrecognized(truncate(raw, 120)));
    }

    events
}

fn truncate(raw: &str, max_chars: usize) -> String {
    raw.chars().take(max_chars).collect()
}
