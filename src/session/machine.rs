//! # Session State Machine
//!
//! Every session decision is made here, as a pure function of
//! `(state, event) → (next state, effects)`. The WebSocket actor feeds events in
//! and carries the effects out; it holds no conversational logic of its own.
//!
//! ## States:
//! ```text
//! Connecting ──ack──▶ Ready ◀──────────────┐
//!     │                 │  backend audio    │ playback_complete / turn end / new input
//!     │                 ▼                   │
//!     │              Speaking ──interrupt──▶ Interrupted
//!     │
//!     └──────────▶ Closed ◀── (any state, on teardown)
//! ```
//!
//! - **Ready** covers listening and waiting for the backend's next turn; the two
//!   are not distinguishable by the client except through latency
//! - **Interrupted** is Ready with one extra rule: parts of the cancelled turn that
//!   are still in flight from the backend are dropped, not relayed
//!
//! ## Interruption contract:
//! `interrupt` while Speaking forwards an interrupt to the backend AND emits
//! `interrupted` to the client in the same step, without waiting for the backend.
//! `interrupt` in any other state does nothing at all.

use crate::audio::AudioFrame;
use crate::backend::protocol::BackendCommand;
use crate::error::RelayError;
use crate::protocol::RelayMessage;

/// Greeting sent with `session_started`.
pub const SESSION_STARTED_MESSAGE: &str = "Connected to Revolt Motors voice assistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the backend to acknowledge setup.
    Connecting,
    /// Accepting input; nothing is being played.
    Ready,
    /// Backend audio has been sent to the client and is playing.
    Speaking,
    /// Ready, while discarding the remainder of an interrupted turn.
    Interrupted,
    /// Terminal.
    Closed,
}

/// Whether backend audio is currently playing on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Speaking,
}

impl SessionState {
    pub fn playback(&self) -> PlaybackState {
        match self {
            SessionState::Speaking => PlaybackState::Speaking,
            _ => PlaybackState::Idle,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self == SessionState::Closed
    }

    /// Whether client input may be forwarded to the backend.
    fn accepts_input(&self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Speaking | SessionState::Interrupted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Speaking => "speaking",
            SessionState::Interrupted => "interrupted",
            SessionState::Closed => "closed",
        }
    }
}

/// Inputs to the state machine, from either endpoint or from timers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    BackendReady,
    BackendText(String),
    BackendAudio { mime_type: String, data: String },
    BackendTurnComplete,
    /// An error frame from the backend.
    BackendError(String),
    /// The link failed; it is already Closed.
    BackendFailed(RelayError),
    /// Raw PCM16 bytes from the client, not yet validated.
    ClientAudio(Vec<u8>),
    ClientText(String),
    ClientInterrupt,
    ClientPlaybackComplete,
    /// Client input that could not be understood.
    ClientInvalid(RelayError),
    /// The client connection broke (oversized or malformed frames).
    ClientFailed(RelayError),
    ClientClosed,
    SetupTimeout,
    Shutdown,
}

impl SessionEvent {
    /// The error this event carries, if any.
    pub fn error(&self) -> Option<&RelayError> {
        match self {
            SessionEvent::BackendFailed(err)
            | SessionEvent::ClientInvalid(err)
            | SessionEvent::ClientFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Side effects requested by a transition, executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SendClient(RelayMessage),
    SendBackend(BackendCommand),
    CloseBackend,
    CloseClient,
}

/// Compute the next state and the effects of one event.
pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Vec<Effect>) {
    use SessionEvent::*;
    use SessionState::*;

    if state == Closed {
        return (Closed, Vec::new());
    }

    match event {
        // Setup handshake
        BackendReady if state == Connecting => (
            Ready,
            vec![Effect::SendClient(RelayMessage::SessionStarted {
                message: SESSION_STARTED_MESSAGE.to_string(),
            })],
        ),
        BackendReady => (state, Vec::new()),

        BackendError(message) if state == Connecting => teardown(RelayError::Setup(message)),
        SetupTimeout if state == Connecting => teardown(RelayError::Setup(
            "voice backend did not acknowledge setup in time".to_string(),
        )),
        SetupTimeout => (state, Vec::new()),

        // Client input
        ClientAudio(_) | ClientText(_) if state == Connecting => (
            state,
            vec![client_error(RelayError::Setup(
                "Not connected to voice assistant yet".to_string(),
            ))],
        ),
        ClientAudio(bytes) => match AudioFrame::from_pcm16_bytes(bytes) {
            Ok(frame) => (
                resume(state),
                vec![Effect::SendBackend(BackendCommand::Audio(frame))],
            ),
            Err(err) => report(state, err),
        },
        ClientText(text) => (
            resume(state),
            vec![
                Effect::SendClient(RelayMessage::Transcript { text: text.clone() }),
                Effect::SendBackend(BackendCommand::Text(text)),
            ],
        ),
        ClientInterrupt if state == Speaking => (
            Interrupted,
            vec![
                Effect::SendBackend(BackendCommand::Interrupt),
                Effect::SendClient(RelayMessage::Interrupted),
            ],
        ),
        ClientInterrupt => (state, Vec::new()),
        ClientPlaybackComplete if state == Speaking => (Ready, Vec::new()),
        ClientPlaybackComplete => (state, Vec::new()),
        ClientInvalid(err) => report(state, err),

        // Backend output
        BackendText(_) | BackendAudio { .. } | BackendTurnComplete if !state.accepts_input() => {
            (state, Vec::new())
        }
        BackendText(_) | BackendAudio { .. } if state == Interrupted => (state, Vec::new()),
        BackendText(text) => (state, vec![Effect::SendClient(RelayMessage::TextResponse { text })]),
        BackendAudio { mime_type, data } => (
            Speaking,
            vec![Effect::SendClient(RelayMessage::AudioResponse { data, mime_type })],
        ),
        BackendTurnComplete => (resume(state), Vec::new()),
        BackendError(message) => (
            state,
            vec![Effect::SendClient(RelayMessage::Error { message })],
        ),

        // Teardown
        BackendFailed(err) | ClientFailed(err) => report(state, err),
        ClientClosed | Shutdown => (Closed, vec![Effect::CloseBackend, Effect::CloseClient]),
    }
}

/// Leave the Interrupted sub-state; other states are unchanged.
fn resume(state: SessionState) -> SessionState {
    match state {
        SessionState::Interrupted => SessionState::Ready,
        other => other,
    }
}

fn client_error(err: RelayError) -> Effect {
    Effect::SendClient(RelayMessage::error(&err))
}

/// Report an error to the client. Errors that are not recoverable also end
/// the session.
fn report(state: SessionState, err: RelayError) -> (SessionState, Vec<Effect>) {
    if err.is_recoverable() {
        (state, vec![client_error(err)])
    } else {
        teardown(err)
    }
}

/// Report a terminal error once, then close both endpoints.
fn teardown(err: RelayError) -> (SessionState, Vec<Effect>) {
    (
        SessionState::Closed,
        vec![client_error(err), Effect::CloseBackend, Effect::CloseClient],
    )
}

/// The state machine plus bookkeeping for one session.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    interruptions: u64,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            interruptions: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn interruptions(&self) -> u64 {
        self.interruptions
    }

    /// Apply one event and return the effects to execute.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        let (next, effects) = transition(self.state, event);
        if next == SessionState::Interrupted && self.state == SessionState::Speaking {
            self.interruptions += 1;
        }
        self.state = next;
        effects
    }
}
