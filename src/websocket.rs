//! # WebSocket Relay Handler
//!
//! Bridges one browser WebSocket to one backend link. Clients connect to `/ws`
//! (or `/`) and talk the JSON protocol in `crate::protocol`.
//!
//! ## Connection flow:
//! 1. **Upgrade**: refused with 503 when the session registry is full
//! 2. **Setup**: the actor opens a `BackendLink`; input is refused until the backend
//!    acknowledges setup, which produces `session_started`
//! 3. **Relay**: client input and backend output flow through the session state machine
//! 4. **Teardown**: either side closing, a setup timeout, or server shutdown closes both
//!
//! ## Actor Model:
//! One actor per connection. Client frames arrive through the WebSocket stream,
//! backend events through a second stream added in `started`. Both are handled on
//! the actor's own context, so the state machine never sees two events at once.

use crate::backend::{BackendEvent, BackendLink};
use crate::config::AppConfig;
use crate::error::{AppError, RelayError};
use crate::protocol::{ClientMessage, RelayMessage};
use crate::session::{CloseSession, Effect, SessionEvent, SessionMachine, SessionRegistry};
use crate::state::{AppState, RelayMetrics};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// WebSocket actor for one relay session.
pub struct RelaySession {
    /// Unique session ID, also the registry key
    id: String,

    machine: SessionMachine,

    /// Present from `started` until the backend is closed
    link: Option<BackendLink>,

    config: Arc<AppConfig>,
    registry: SessionRegistry,
    metrics: Arc<RelayMetrics>,

    /// Last ping or pong from the client
    last_heartbeat: Instant,
    created_at: Instant,
}

impl RelaySession {
    pub fn new(state: &AppState) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            machine: SessionMachine::new(),
            link: None,
            config: state.config.clone(),
            registry: state.registry.clone(),
            metrics: state.metrics.clone(),
            last_heartbeat: Instant::now(),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Feed one event through the state machine and carry out its effects.
    fn apply(&mut self, event: SessionEvent, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(err) = event.error() {
            warn!(session_id = %self.id, kind = err.kind(), error = %err, "Session error");
        }

        let before = self.machine.state();
        let effects = self.machine.handle(event);
        let after = self.machine.state();

        if before != after {
            debug!(
                session_id = %self.id,
                from = before.as_str(),
                to = after.as_str(),
                "Session state changed"
            );
        }

        for effect in effects {
            self.execute(effect, ctx);
        }
    }

    fn execute(&mut self, effect: Effect, ctx: &mut ws::WebsocketContext<Self>) {
        match effect {
            Effect::SendClient(message) => {
                match &message {
                    RelayMessage::Error { .. } => self.metrics.error(),
                    RelayMessage::Interrupted => {
                        self.metrics.interruption();
                        info!(session_id = %self.id, "Response interrupted by client");
                    }
                    RelayMessage::SessionStarted { .. } => {
                        if let Some(link) = self.link.as_ref() {
                            info!(
                                session_id = %self.id,
                                model = %link.model(),
                                instruction_chars = link.system_instruction().chars().count(),
                                "Session started"
                            );
                        }
                    }
                    _ => {}
                }
                debug!(session_id = %self.id, kind = message.kind(), "Sending to client");
                self.metrics.message_sent();
                ctx.text(message.to_json());
            }
            Effect::SendBackend(command) => {
                let Some(link) = self.link.as_ref() else {
                    debug!(session_id = %self.id, command = command.name(), "No backend link, dropping command");
                    return;
                };

                // A closed link has already queued its failure event, which
                // reports to the client; reporting here would duplicate it
                if let Err(e) = link.send(command) {
                    warn!(session_id = %self.id, kind = e.kind(), error = %e, "Backend send refused");
                }
            }
            Effect::CloseBackend => {
                if let Some(link) = self.link.take() {
                    link.close();
                }
            }
            Effect::CloseClient => {
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        self.metrics.client_message();
        let event = client_event(ClientMessage::parse(text));
        self.apply(event, ctx);
    }
}

/// Map a parsed client message to a session event.
fn client_event(parsed: Result<ClientMessage, RelayError>) -> SessionEvent {
    match parsed {
        Ok(ClientMessage::AudioInput { audio }) => match audio.into_bytes() {
            Ok(bytes) => SessionEvent::ClientAudio(bytes),
            Err(e) => SessionEvent::ClientInvalid(e),
        },
        Ok(ClientMessage::TextInput { text }) => SessionEvent::ClientText(text),
        Ok(ClientMessage::Interrupt) => SessionEvent::ClientInterrupt,
        Ok(ClientMessage::PlaybackComplete) => SessionEvent::ClientPlaybackComplete,
        Err(e) => SessionEvent::ClientInvalid(e),
    }
}

/// Map a backend event to a session event. Returns None for events the
/// session ignores.
fn backend_event(event: BackendEvent) -> Option<SessionEvent> {
    match event {
        BackendEvent::SetupComplete => Some(SessionEvent::BackendReady),
        BackendEvent::Text(text) => Some(SessionEvent::BackendText(text)),
        // Only audio parts are relayed
        BackendEvent::InlineData { mime_type, data } if mime_type.starts_with("audio/") => {
            Some(SessionEvent::BackendAudio { mime_type, data })
        }
        BackendEvent::InlineData { .. } => None,
        BackendEvent::TurnComplete => Some(SessionEvent::BackendTurnComplete),
        BackendEvent::Error(message) => Some(SessionEvent::BackendError(message)),
        BackendEvent::Unrecognized(_) => None,
        BackendEvent::Failed(err) => Some(SessionEvent::BackendFailed(err)),
    }
}

impl Actor for RelaySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.id, "Client connected");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.link = Some(BackendLink::open(&self.config.backend, &self.id, events_tx));
        ctx.add_stream(UnboundedReceiverStream::new(events_rx));

        ctx.run_later(self.config.backend.setup_timeout(), |act, ctx| {
            act.apply(SessionEvent::SetupTimeout, ctx);
        });

        let client_timeout = self.config.performance.client_timeout();
        ctx.run_interval(self.config.performance.heartbeat_interval(), move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > client_timeout {
                warn!(session_id = %act.id, "Client heartbeat timeout, closing session");
                act.apply(SessionEvent::ClientClosed, ctx);
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(link) = self.link.take() {
            link.close();
        }

        if self.registry.unregister(&self.id) {
            self.metrics.session_closed();
        }

        info!(
            session_id = %self.id,
            duration_secs = self.created_at.elapsed().as_secs(),
            interruptions = self.machine.interruptions(),
            "Session closed"
        );
    }
}

/// Handle events from the backend link.
impl StreamHandler<BackendEvent> for RelaySession {
    fn handle(&mut self, event: BackendEvent, ctx: &mut Self::Context) {
        match backend_event(event) {
            Some(event) => self.apply(event, ctx),
            None => debug!(session_id = %self.id, "Ignoring backend event"),
        }
    }

    // The link always reports a failure before its channel ends, so the end of
    // the stream itself carries no information.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!(session_id = %self.id, "Backend event stream ended");
    }
}

/// Handle incoming WebSocket messages.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.handle_text(&text, ctx),
            Ok(ws::Message::Binary(data)) => {
                // Raw PCM16, same as the audio field of audio_input
                self.metrics.client_message();
                self.apply(SessionEvent::ClientAudio(data.to_vec()), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.id, reason = ?reason, "Client closed connection");
                self.apply(SessionEvent::ClientClosed, ctx);
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.id, error = %err, "WebSocket protocol error");
                self.apply(
                    SessionEvent::ClientFailed(RelayError::Transport(format!(
                        "client connection failed: {}",
                        err
                    ))),
                    ctx,
                );
            }
        }
    }
}

/// Server shutdown.
///
/// The reply is sent only after the backend link has written its close frame,
/// so the server can stop right after every session has answered.
impl Handler<CloseSession> for RelaySession {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, msg: CloseSession, ctx: &mut Self::Context) -> Self::Result {
        info!(session_id = %self.id, reason = msg.reason, "Closing session on request");

        let closing = self.link.take().map(BackendLink::close_and_wait);
        self.apply(SessionEvent::Shutdown, ctx);

        Box::pin(async move {
            if let Some(closing) = closing {
                closing.await;
            }
        })
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Checks capacity, upgrades the connection, and registers the new session actor.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    debug!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    if state.registry.is_full() {
        state.metrics.session_rejected();
        warn!(capacity = state.registry.capacity(), "Rejecting connection, relay at capacity");
        return Err(AppError::ServiceUnavailable(format!(
            "Session limit of {} reached",
            state.registry.capacity()
        )));
    }

    let session = RelaySession::new(&state);
    let session_id = session.id().to_string();
    let (addr, response) = ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(state.config.performance.max_frame_bytes)
        .start_with_addr()?;

    // Another connection may have taken the last slot since the check above
    if let Err(full) = state.registry.register(&session_id, addr.clone().recipient()) {
        addr.do_send(CloseSession { reason: "capacity" });
        state.metrics.session_rejected();
        return Err(AppError::ServiceUnavailable(full.to_string()));
    }

    state.metrics.session_opened();
    Ok(response)
}
