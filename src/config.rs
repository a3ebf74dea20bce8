//! # Configuration Management
//!
//! Loads relay configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between sections)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT, GEMINI_API_KEY, RELAY_ENV / NODE_ENV)
//! 2. Environment variables (APP_SERVER__PORT, APP_BACKEND__VOICE_NAME, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::time::Duration;

/// Default persona for the voice assistant.
const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Rev, the AI assistant for Revolt Motors, India's leading electric motorcycle company.

Help customers with information about Revolt Motors and their electric motorcycles:
1. Only discuss Revolt Motors, electric vehicles, motorcycles, and sustainable transportation.
2. Provide accurate information about Revolt Motors' products, services, and company.
3. If asked about unrelated topics, politely redirect the conversation back to Revolt Motors.
4. Maintain a friendly, professional, and knowledgeable tone.

If you don't know specific details about current models, pricing, or availability, recommend visiting revoltmotors.com or contacting customer service.

Keep responses conversational, brief, and engaging as this is a voice interface.";

/// Main relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub performance: PerformanceConfig,
}

/// Where the relay listens for browser clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Deployment environment. Decides which backend model is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

/// Voice backend connection settings.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL of the backend; `{model}` is replaced with the active model
/// - `api_key`: appended as `?key=` when present. Never logged
/// - `model` / `production_model`: model identifiers for development and production
/// - `voice_name`: prebuilt voice used for spoken responses
/// - `setup_timeout_secs`: how long a session waits for the setup acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub environment: Environment,
    pub model: String,
    pub production_model: String,
    pub voice_name: String,
    pub response_modalities: Vec<String>,
    pub system_instruction: String,
    pub setup_timeout_secs: u64,
}

/// Capacity and liveness tuning.
///
/// ## Tuning guidelines:
/// - Every session holds one backend stream, so `max_concurrent_sessions` is also
///   the number of simultaneous backend connections
/// - `client_timeout_secs` must exceed `heartbeat_interval_secs`, otherwise healthy
///   clients are dropped between pings
/// - `max_frame_bytes` bounds one client WebSocket frame. Browsers send a whole
///   utterance as one JSON byte array, roughly 4 bytes of JSON per PCM byte
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            backend: BackendConfig {
                endpoint: "wss://generativelanguage.googleapis.com/ws/v1beta/models/{model}:streamGenerateContent".to_string(),
                api_key: None,
                environment: Environment::Development,
                model: "gemini-2.0-flash-live-001".to_string(),
                production_model: "gemini-2.5-flash-preview-native-audio-dialog".to_string(),
                voice_name: "Aoede".to_string(),
                response_modalities: vec!["AUDIO".to_string()],
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
                setup_timeout_secs: 10,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 100,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
                max_frame_bytes: 16 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=8080`: Override server port
    /// - `APP_BACKEND__VOICE_NAME=Puck`: Use a different voice
    /// - `GEMINI_API_KEY=...`: Backend API key
    /// - `RELAY_ENV=production` or `NODE_ENV=production`: Negotiate the production model
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms set these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("backend.api_key", key)?;
        }

        if let Some(environment) = env::var("RELAY_ENV").or_else(|_| env::var("NODE_ENV")).ok() {
            let environment = if environment.eq_ignore_ascii_case("production") {
                "production"
            } else {
                "development"
            };
            settings = settings.set_override("backend.environment", environment)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.heartbeat_interval_secs == 0 || self.performance.client_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval and client timeout must be greater than 0"));
        }

        if self.performance.client_timeout_secs <= self.performance.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                self.performance.client_timeout_secs,
                self.performance.heartbeat_interval_secs
            ));
        }

        if self.performance.max_frame_bytes < 64 * 1024 {
            return Err(anyhow::anyhow!(
                "Max frame size must be at least 64 KiB, got {} bytes",
                self.performance.max_frame_bytes
            ));
        }

        if self.backend.setup_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Backend setup timeout must be greater than 0"));
        }

        if self.backend.active_model().trim().is_empty() {
            return Err(anyhow::anyhow!("Backend model cannot be empty"));
        }

        if !(self.backend.endpoint.starts_with("ws://") || self.backend.endpoint.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Backend endpoint must be a ws:// or wss:// URL, got {}",
                self.backend.endpoint
            ));
        }

        Ok(())
    }

    /// Configuration as JSON with the API key replaced by a marker.
    pub fn redacted(&self) -> serde_json::Value {
        json!({
            "server": {
                "host": self.server.host,
                "port": self.server.port
            },
            "backend": {
                "endpoint": self.backend.endpoint,
                "api_key": self.backend.api_key.as_ref().map(|_| "<redacted>"),
                "environment": self.backend.environment,
                "model": self.backend.active_model(),
                "voice_name": self.backend.voice_name,
                "response_modalities": self.backend.response_modalities,
                "setup_timeout_secs": self.backend.setup_timeout_secs
            },
            "performance": {
                "max_concurrent_sessions": self.performance.max_concurrent_sessions,
                "heartbeat_interval_secs": self.performance.heartbeat_interval_secs,
                "client_timeout_secs": self.performance.client_timeout_secs,
                "max_frame_bytes": self.performance.max_frame_bytes
            }
        })
    }
}

impl BackendConfig {
    /// The model negotiated with the backend in the current environment.
    pub fn active_model(&self) -> &str {
        match self.environment {
            Environment::Production => &self.production_model,
            Environment::Development => &self.model,
        }
    }

    /// Full WebSocket URL for one backend connection, key included.
    pub fn connect_url(&self) -> String {
        let url = self.endpoint.replace("{model}", self.active_model());
        match self.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => {
                let separator = if url.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", url, separator, key)
            }
            None => url,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty() && key != "your_api_key_here")
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }
}

impl PerformanceConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}
