//! # Backend Link
//!
//! Owns exactly one outbound WebSocket stream to the voice backend for one session.
//!
//! ## Lifecycle:
//! 1. **Connecting**: transport being established, setup frame sent, waiting for
//!    `setupComplete`. Sending anything now fails fast instead of queueing
//! 2. **Ready**: audio, text and interrupt submissions are forwarded in call order
//! 3. **Closed**: closed locally, or the transport failed. Terminal; the link never
//!    reconnects on its own
//!
//! ## Concurrency:
//! A single spawned task owns the socket. It multiplexes outbound frames (from an
//! unbounded channel) with inbound frames, and reports inbound events to the
//! session through another channel, in the order they were received. Dropping the
//! `BackendLink` drops the command sender, which makes the task close the socket.

use crate::backend::protocol::{parse_server_frame, BackendCommand, BackendEvent, SetupFrame};
use crate::audio::AudioFrame;
use crate::config::BackendConfig;
use crate::error::RelayError;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Connection state of a backend link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Ready,
    Closed,
}

/// Instructions from the link handle to its socket task.
#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close,
}

/// Handle to one backend stream.
pub struct BackendLink {
    session_id: String,
    model: String,
    system_instruction: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<ReadyState>,
    task: Option<JoinHandle<()>>,
}

impl BackendLink {
    /// Start connecting to the backend.
    ///
    /// Returns immediately in the Connecting state. The socket task connects,
    /// sends the setup frame, and reports `BackendEvent::SetupComplete` on
    /// `events` once the backend acknowledges it. Every later inbound event goes
    /// to the same channel.
    pub fn open(
        config: &BackendConfig,
        session_id: &str,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);
        let model = config.active_model().to_string();

        info!(session_id = %session_id, model = %model, "Opening backend link");

        let task = tokio::spawn(run_link(
            config.connect_url(),
            SetupFrame::from_config(config),
            outbound_rx,
            events,
            state_tx,
            session_id.to_string(),
        ));

        Self {
            session_id: session_id.to_string(),
            model,
            system_instruction: config.system_instruction.clone(),
            outbound: outbound_tx,
            state: state_rx,
            task: Some(task),
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /// Submit one command. Fails immediately unless the link is Ready.
    ///
    /// Success only means the frame was queued. Write failures surface later as a
    /// single `BackendEvent::Failed` on the event channel.
    pub fn send(&self, command: BackendCommand) -> Result<(), RelayError> {
        match self.ready_state() {
            ReadyState::Connecting => {
                return Err(RelayError::Setup(
                    "backend has not acknowledged setup yet".to_string(),
                ))
            }
            ReadyState::Closed => {
                return Err(RelayError::Transport("backend link is closed".to_string()))
            }
            ReadyState::Ready => {}
        }

        let name = command.name();
        let frame = command.to_frame()?;
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| RelayError::Transport("backend link is closed".to_string()))?;

        debug!(session_id = %self.session_id, command = name, "Queued backend frame");
        Ok(())
    }

    pub fn send_audio(&self, frame: AudioFrame) -> Result<(), RelayError> {
        self.send(BackendCommand::Audio(frame))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.send(BackendCommand::Text(text.into()))
    }

    pub fn send_interrupt(&self) -> Result<(), RelayError> {
        self.send(BackendCommand::Interrupt)
    }

    /// Close the stream. Idempotent; no error event is emitted for a local close.
    pub fn close(&self) {
        if self.outbound.send(Outbound::Close).is_ok() {
            debug!(session_id = %self.session_id, "Backend link close requested");
        }
    }
}

impl BackendLink {
    /// Close the stream and resolve once the socket task has sent its close
    /// frame and exited.
    ///
    /// The returned future owns everything it needs, so it can outlive the
    /// session that produced it.
    pub fn close_and_wait(mut self) -> impl Future<Output = ()> {
        self.close();
        let task = self.task.take();
        let session_id = self.session_id.clone();

        async move {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(session_id = %session_id, error = %e, "Backend link task ended abnormally");
                }
            }
        }
    }
}

impl Drop for BackendLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Socket task: connect, send setup, then pump frames both ways until closed.
async fn run_link(
    url: String,
    setup: SetupFrame,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<BackendEvent>,
    state: watch::Sender<ReadyState>,
    session_id: String,
) {
    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = closed_while_connecting(&mut outbound) => {
            state.send_replace(ReadyState::Closed);
            debug!(session_id = %session_id, "Backend link closed before connecting");
            return;
        }
    };

    let mut ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            fail(&state, &events, &session_id, format!("failed to connect to backend: {}", e));
            return;
        }
    };

    let setup_json = match serde_json::to_string(&setup) {
        Ok(json) => json,
        Err(e) => {
            fail(&state, &events, &session_id, format!("failed to encode setup frame: {}", e));
            return;
        }
    };

    if let Err(e) = ws.send(Message::Text(setup_json)).await {
        fail(&state, &events, &session_id, format!("failed to send setup frame: {}", e));
        return;
    }
    debug!(session_id = %session_id, "Setup frame sent, awaiting acknowledgment");

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = ws.send(Message::Text(frame)).await {
                        fail(&state, &events, &session_id, format!("backend write failed: {}", e));
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    state.send_replace(ReadyState::Closed);
                    if let Err(e) = ws.close(None).await {
                        debug!(session_id = %session_id, error = %e, "Backend close handshake failed");
                    }
                    info!(session_id = %session_id, "Backend link closed");
                    return;
                }
            },
            inbound = ws.next() => {
                let decoded = match inbound {
                    Some(Ok(message)) => decode_message(message),
                    Some(Err(e)) => Err(format!("backend read failed: {}", e)),
                    None => Err("backend stream ended".to_string()),
                };

                let decoded = match decoded {
                    Ok(decoded) => decoded,
                    Err(reason) => {
                        fail(&state, &events, &session_id, reason);
                        return;
                    }
                };

                for event in decoded {
                    if event == BackendEvent::SetupComplete {
                        state.send_if_modified(|current| {
                            if *current == ReadyState::Connecting {
                                *current = ReadyState::Ready;
                                true
                            } else {
                                false
                            }
                        });
                        info!(session_id = %session_id, "Backend setup complete");
                    }

                    if events.send(event).is_err() {
                        // Session is gone; nobody will read further events
                        state.send_replace(ReadyState::Closed);
                        if let Err(e) = ws.close(None).await {
                            debug!(session_id = %session_id, error = %e, "Backend close handshake failed");
                        }
                        return;
                    }
                }
            }
        }
    }
}

/// Resolves once the handle asks to close (or is dropped) during connect.
async fn closed_while_connecting(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close) | None => return,
            // Sends are refused while Connecting, so frames cannot be queued here
            Some(Outbound::Frame(_)) => continue,
        }
    }
}

/// Turn one WebSocket message into backend events.
///
/// A close frame is an error: the relay never asks the backend to close first.
fn decode_message(message: Message) -> Result<Vec<BackendEvent>, String> {
    match message {
        Message::Text(text) => Ok(parse_server_frame(&text)),
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Ok(parse_server_frame(&text)),
            Err(_) => Ok(vec![BackendEvent::Unrecognized("non-UTF-8 binary frame".to_string())]),
        },
        Message::Close(frame) => Err(match frame {
            Some(frame) => format!("backend closed the connection ({}: {})", frame.code, frame.reason),
            None => "backend closed the connection".to_string(),
        }),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Vec::new()),
    }
}

/// Move to Closed and emit the link's single failure event.
fn fail(
    state: &watch::Sender<ReadyState>,
    events: &mpsc::UnboundedSender<BackendEvent>,
    session_id: &str,
    reason: String,
) {
    state.send_replace(ReadyState::Closed);
    warn!(session_id = %session_id, reason = %reason, "Backend link failed");
    let _ = events.send(BackendEvent::Failed(RelayError::Transport(reason)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn fake_backend() -> (BackendConfig, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut backend = AppConfig::default().backend;
        backend.endpoint = format!("ws://{}/{{model}}", listener.local_addr().unwrap());
        (backend, listener)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<BackendEvent>) -> BackendEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for backend event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_setup_then_ready_then_forward() {
        let (config, listener) = fake_backend().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let link = BackendLink::open(&config, "s1", events_tx);

        let (stream, _) = listener.accept().await.unwrap();
        let mut backend = accept_async(stream).await.unwrap();

        // Setup frame arrives first and carries the model
        let setup = backend.next().await.unwrap().unwrap().into_text().unwrap();
        let setup: serde_json::Value = serde_json::from_str(&setup).unwrap();
        assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-live-001");

        // Not acknowledged yet, so sends fail fast
        assert_eq!(link.ready_state(), ReadyState::Connecting);
        assert!(matches!(link.send_text("too early"), Err(RelayError::Setup(_))));

        backend.send(Message::Text(r#"{"setupComplete":{}}"#.into())).await.unwrap();
        assert_eq!(next_event(&mut events_rx).await, BackendEvent::SetupComplete);
        assert_eq!(link.ready_state(), ReadyState::Ready);

        link.send_text("range?").unwrap();
        link.send_interrupt().unwrap();

        let first = backend.next().await.unwrap().unwrap().into_text().unwrap();
        let second = backend.next().await.unwrap().unwrap().into_text().unwrap();
        assert!(first.contains("range?"));
        assert!(second.contains("\"interrupt\":true"));

        backend
            .send(Message::Text(
                r#"{"serverContent":{"modelTurn":{"parts":[{"text":"150 km"},{"inlineData":{"mimeType":"audio/pcm","data":"AAA="}}]}}}"#.into(),
            ))
            .await
            .unwrap();
        assert_eq!(next_event(&mut events_rx).await, BackendEvent::Text("150 km".into()));
        assert!(matches!(next_event(&mut events_rx).await, BackendEvent::InlineData { .. }));
    }

    #[tokio::test]
    async fn test_unexpected_close_emits_one_failure() {
        let (config, listener) = fake_backend().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let link = BackendLink::open(&config, "s2", events_tx);

        let (stream, _) = listener.accept().await.unwrap();
        let mut backend = accept_async(stream).await.unwrap();
        let _setup = backend.next().await.unwrap().unwrap();
        backend.send(Message::Text(r#"{"setupComplete":{}}"#.into())).await.unwrap();
        assert_eq!(next_event(&mut events_rx).await, BackendEvent::SetupComplete);

        backend.close(None).await.unwrap();
        drop(backend);

        assert!(matches!(next_event(&mut events_rx).await, BackendEvent::Failed(RelayError::Transport(_))));
        assert_eq!(link.ready_state(), ReadyState::Closed);
        assert!(matches!(link.send_text("hello?"), Err(RelayError::Transport(_))));

        // Exactly one failure: the channel closes without further events
        let rest = tokio::time::timeout(Duration::from_secs(5), events_rx.recv()).await.unwrap();
        assert!(rest.is_none());
    }

    #[tokio::test]
    async fn test_close_and_wait_delivers_close_frame() {
        let (config, listener) = fake_backend().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let link = BackendLink::open(&config, "s4", events_tx);

        let (stream, _) = listener.accept().await.unwrap();
        let mut backend = accept_async(stream).await.unwrap();
        let _setup = backend.next().await.unwrap().unwrap();
        backend.send(Message::Text(r#"{"setupComplete":{}}"#.into())).await.unwrap();
        assert_eq!(next_event(&mut events_rx).await, BackendEvent::SetupComplete);

        tokio::time::timeout(Duration::from_secs(5), link.close_and_wait())
            .await
            .expect("close did not finish");

        // The close frame was written before the task finished
        let frame = backend.next().await.unwrap().unwrap();
        assert!(frame.is_close());

        // A local close emits no failure event
        let rest = tokio::time::timeout(Duration::from_secs(5), events_rx.recv()).await.unwrap();
        assert!(rest.is_none());
    }

    #[tokio::test]
    async fn test_backend_closed_when_session_stops_listening() {
        let (config, listener) = fake_backend().await;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = BackendLink::open(&config, "s5", events_tx);

        let (stream, _) = listener.accept().await.unwrap();
        let mut backend = accept_async(stream).await.unwrap();
        let _setup = backend.next().await.unwrap().unwrap();

        drop(events_rx);
        backend.send(Message::Text(r#"{"setupComplete":{}}"#.into())).await.unwrap();

        // The link still holds its handle, so only the dead event channel closes it
        let frame = tokio::time::timeout(Duration::from_secs(5), backend.next())
            .await
            .expect("no close frame")
            .unwrap()
            .unwrap();
        assert!(frame.is_close());
        assert_eq!(link.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_transport_error() {
        let (config, listener) = fake_backend().await;
        drop(listener);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let link = BackendLink::open(&config, "s3", events_tx);

        assert!(matches!(next_event(&mut events_rx).await, BackendEvent::Failed(RelayError::Transport(_))));
        assert_eq!(link.ready_state(), ReadyState::Closed);
    }
}
