//! # Sessions
//!
//! One session pairs one client connection with one backend link.
//! - **machine**: the pure state machine deciding what every event does
//! - **registry**: the set of live sessions, for health reporting and shutdown

pub mod machine;
pub mod registry;

pub use machine::{Effect, PlaybackState, SessionEvent, SessionMachine, SessionState};
pub use registry::{CloseSession, SessionInfo, SessionRegistry};
