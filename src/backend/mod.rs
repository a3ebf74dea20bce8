//! # Voice Backend
//!
//! Everything that talks to the streaming voice-generation service:
//! - **protocol**: setup / realtime-input frames out, server-content frames in
//! - **link**: one WebSocket stream per session, with fail-fast readiness

pub mod link;
pub mod protocol;

pub use link::{BackendLink, ReadyState};
pub use protocol::{BackendCommand, BackendEvent};
