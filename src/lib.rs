//! # Voice Relay
//!
//! A real-time voice relay: browser clients stream microphone audio and text over
//! a WebSocket, the relay forwards it to a streaming voice backend and streams the
//! backend's text and audio back, with client-driven interruption of responses.
//!
//! ## Modules:
//! - **audio**: PCM16 framing, resampling, and quantization
//! - **backend**: the per-session backend stream and its wire format
//! - **session**: the session state machine and the live-session registry
//! - **websocket**: the per-connection actor that runs a session
//! - **server**: routes, middleware, and graceful shutdown
//! - **client**: a Rust client for the relay with reconnect backoff

pub mod audio;
pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod protocol;
pub mod server;
pub mod session;
pub mod state;
pub mod websocket;

pub use config::AppConfig;
pub use error::{AppError, RelayError};
pub use state::AppState;
