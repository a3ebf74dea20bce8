//! End-to-end relay tests: a real relay server on an ephemeral port, a scripted
//! fake voice backend, and `RelayClient` playing the browser.

use actix_web::dev::ServerHandle;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use voice_relay::client::RelayClient;
use voice_relay::protocol::RelayMessage;
use voice_relay::session::machine::SESSION_STARTED_MESSAGE;
use voice_relay::{server, AppConfig, AppState, RelayError};

const AUDIO_MIME: &str = "audio/pcm;rate=24000";

async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

enum Control {
    Send(String),
    Close,
}

/// A voice backend that records every frame it receives and sends only what the
/// test tells it to.
struct FakeBackend {
    endpoint: String,
    received: mpsc::UnboundedReceiver<Value>,
    control: mpsc::UnboundedSender<Control>,
}

impl FakeBackend {
    async fn start(acknowledge_setup: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/{{model}}", listener.local_addr().unwrap());
        let (received_tx, received) = mpsc::unbounded_channel();
        let (control, mut control_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let setup = ws.next().await.unwrap().unwrap().into_text().unwrap();
            received_tx.send(serde_json::from_str(&setup).unwrap()).unwrap();
            if acknowledge_setup {
                ws.send(Message::Text(r#"{"setupComplete":{}}"#.into())).await.unwrap();
            }

            loop {
                tokio::select! {
                    command = control_rx.recv() => match command {
                        Some(Control::Send(frame)) => ws.send(Message::Text(frame)).await.unwrap(),
                        Some(Control::Close) | None => {
                            let _ = ws.close(None).await;
                            return;
                        }
                    },
                    inbound = ws.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            let _ = received_tx.send(serde_json::from_str(&text).unwrap());
                        }
                        Some(Ok(Message::Close(_))) => {
                            let _ = received_tx.send(close_marker());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => return,
                    },
                }
            }
        });

        Self {
            endpoint,
            received,
            control,
        }
    }

    fn send(&self, frame: Value) {
        self.control.send(Control::Send(frame.to_string())).unwrap();
    }

    fn close(&self) {
        self.control.send(Control::Close).unwrap();
    }

    async fn next_frame(&mut self) -> Value {
        within(self.received.recv()).await.expect("backend stopped")
    }
}

/// Recorded by the fake backend when the relay sends a close frame.
fn close_marker() -> Value {
    serde_json::json!({"close": true})
}

struct Relay {
    state: AppState,
    url: String,
    handle: ServerHandle,
}

async fn start_relay(backend: &FakeBackend, tweak: impl FnOnce(&mut AppConfig)) -> Relay {
    let mut config = AppConfig::default();
    config.backend.endpoint = backend.endpoint.clone();
    config.backend.api_key = None;
    tweak(&mut config);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let state = AppState::new(config);
    let server = server::build_server(state.clone(), listener).unwrap();
    let handle = server.handle();
    actix_web::rt::spawn(server);

    Relay { state, url, handle }
}

async fn next(client: &mut RelayClient) -> Option<RelayMessage> {
    within(client.next_message()).await.unwrap()
}

/// Connect and wait for `session_started`, consuming the backend's setup frame.
async fn connected_client(relay: &Relay, backend: &mut FakeBackend) -> RelayClient {
    let mut client = within(RelayClient::connect(&relay.url)).await.unwrap();
    let setup = backend.next_frame().await;
    assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-live-001");
    assert_eq!(
        next(&mut client).await,
        Some(RelayMessage::SessionStarted {
            message: SESSION_STARTED_MESSAGE.to_string()
        })
    );
    client
}

fn turn(text: &str, audio: &str, complete: bool) -> Value {
    serde_json::json!({
        "serverContent": {
            "modelTurn": {"parts": [
                {"text": text},
                {"inlineData": {"mimeType": AUDIO_MIME, "data": audio}}
            ]},
            "turnComplete": complete
        }
    })
}

async fn wait_for_empty_registry(state: &AppState) {
    within(async {
        while !state.registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
}

#[actix_web::test]
async fn test_text_turn_is_relayed_in_order() {
    let mut backend = FakeBackend::start(true).await;
    let relay = start_relay(&backend, |_| {}).await;
    let mut client = connected_client(&relay, &mut backend).await;
    assert_eq!(relay.state.registry.len(), 1);

    client.send_text("What is the range of the RV400?").await.unwrap();
    assert_eq!(
        next(&mut client).await,
        Some(RelayMessage::Transcript {
            text: "What is the range of the RV400?".into()
        })
    );
    let forwarded = backend.next_frame().await;
    assert_eq!(
        forwarded["realtimeInput"]["userInput"]["parts"][0]["text"],
        "What is the range of the RV400?"
    );

    backend.send(turn("Up to 150 km.", "AAAA", true));
    assert_eq!(
        next(&mut client).await,
        Some(RelayMessage::TextResponse {
            text: "Up to 150 km.".into()
        })
    );
    assert_eq!(
        next(&mut client).await,
        Some(RelayMessage::AudioResponse {
            data: "AAAA".into(),
            mime_type: AUDIO_MIME.into()
        })
    );

    relay.handle.stop(false).await;
}

#[actix_web::test]
async fn test_captured_audio_reaches_backend_as_pcm16() {
    let mut backend = FakeBackend::start(true).await;
    let relay = start_relay(&backend, |_| {}).await;
    let mut client = connected_client(&relay, &mut backend).await;

    client.send_capture(&vec![0.25f32; 480], 48_000).await.unwrap();
    let frame = backend.next_frame().await;
    let chunk = &frame["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");

    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let bytes = STANDARD.decode(chunk["data"].as_str().unwrap()).unwrap();
    assert_eq!(bytes.len(), 320);

    relay.handle.stop(false).await;
}

#[actix_web::test]
async fn test_odd_length_audio_is_one_error_and_session_survives() {
    let mut backend = FakeBackend::start(true).await;
    let relay = start_relay(&backend, |_| {}).await;
    let mut client = connected_client(&relay, &mut backend).await;

    client.send_pcm16(&[1, 2, 3]).await.unwrap();
    assert!(matches!(next(&mut client).await, Some(RelayMessage::Error { .. })));

    // Still open, and nothing was forwarded for the bad frame
    client.send_text("still there?").await.unwrap();
    assert_eq!(
        next(&mut client).await,
        Some(RelayMessage::Transcript {
            text: "still there?".into()
        })
    );
    let forwarded = backend.next_frame().await;
    assert!(forwarded["realtimeInput"].get("mediaChunks").is_none());
    assert_eq!(forwarded["realtimeInput"]["userInput"]["parts"][0]["text"], "still there?");

    relay.handle.stop(false).await;
}

#[actix_web::test]
async fn test_interrupt_stops_response_and_drops_late_parts() {
    let mut backend = FakeBackend::start(true).await;
    let relay = start_relay(&backend, |_| {}).await;
    let mut client = connected_client(&relay, &mut backend).await;

    client.send_text("Tell me about charging").await.unwrap();
    next(&mut client).await;
    backend.next_frame().await;

    backend.send(turn("Charging takes", "AAAA", false));
    next(&mut client).await;
    assert!(matches!(next(&mut client).await, Some(RelayMessage::AudioResponse { .. })));

    client.interrupt().await.unwrap();
    assert_eq!(next(&mut client).await, Some(RelayMessage::Interrupted));
    assert_eq!(
        backend.next_frame().await,
        serde_json::json!({"realtimeInput": {"interrupt": true}})
    );

    // A second interrupt for the same response does nothing
    client.interrupt().await.unwrap();

    // The rest of the cancelled turn is still in flight from the backend
    backend.send(turn("about four hours", "BBBB", true));
    tokio::time::sleep(Duration::from_millis(300)).await;

    client.send_text("And the price?").await.unwrap();
    assert_eq!(
        next(&mut client).await,
        Some(RelayMessage::Transcript {
            text: "And the price?".into()
        })
    );
    assert_eq!(relay.state.metrics.snapshot().interruptions, 1);

    relay.handle.stop(false).await;
}

#[actix_web::test]
async fn test_backend_close_reports_once_and_unregisters() {
    let mut backend = FakeBackend::start(true).await;
    let relay = start_relay(&backend, |_| {}).await;
    let mut client = connected_client(&relay, &mut backend).await;

    backend.close();
    assert!(matches!(next(&mut client).await, Some(RelayMessage::Error { .. })));
    assert_eq!(next(&mut client).await, None);

    wait_for_empty_registry(&relay.state).await;
    within(async {
        while relay.state.metrics.snapshot().sessions_closed != 1 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    relay.handle.stop(false).await;
}

#[actix_web::test]
async fn test_setup_timeout_closes_session() {
    let mut backend = FakeBackend::start(false).await;
    let relay = start_relay(&backend, |config| config.backend.setup_timeout_secs = 1).await;

    let mut client = within(RelayClient::connect(&relay.url)).await.unwrap();
    backend.next_frame().await;

    // Input before the acknowledgment fails fast without closing anything
    client.send_text("hello?").await.unwrap();
    assert!(matches!(next(&mut client).await, Some(RelayMessage::Error { .. })));

    assert!(matches!(next(&mut client).await, Some(RelayMessage::Error { .. })));
    assert_eq!(next(&mut client).await, None);
    wait_for_empty_registry(&relay.state).await;

    relay.handle.stop(false).await;
}

#[actix_web::test]
async fn test_connections_over_capacity_are_refused() {
    let mut backend = FakeBackend::start(true).await;
    let relay = start_relay(&backend, |config| config.performance.max_concurrent_sessions = 1).await;
    let _client = connected_client(&relay, &mut backend).await;

    let refused = within(RelayClient::connect(&relay.url)).await;
    assert!(matches!(refused, Err(RelayError::Transport(_))));
    assert_eq!(relay.state.metrics.snapshot().sessions_rejected, 1);
    assert_eq!(relay.state.registry.len(), 1);

    relay.handle.stop(false).await;
}

#[actix_web::test]
async fn test_shutdown_closes_live_sessions() {
    let mut backend = FakeBackend::start(true).await;
    let relay = start_relay(&backend, |_| {}).await;
    let mut client = connected_client(&relay, &mut backend).await;

    let state = relay.state.clone();
    let shutdown = actix_web::rt::spawn(async move { server::shutdown(&state, relay.handle).await });

    assert_eq!(next(&mut client).await, None);
    within(shutdown).await.unwrap();

    // The backend link was closed properly, not dropped with the workers
    assert_eq!(backend.next_frame().await, close_marker());
    wait_for_empty_registry(&relay.state).await;
}

#[actix_web::test]
async fn test_long_utterance_in_one_frame_is_relayed() {
    let mut backend = FakeBackend::start(true).await;
    let relay = start_relay(&backend, |_| {}).await;
    let mut client = connected_client(&relay, &mut backend).await;

    // Three seconds of 16 kHz PCM16, well over the default WebSocket frame size
    client.send_pcm16(&vec![0u8; 96_000]).await.unwrap();

    let frame = backend.next_frame().await;
    let chunk = &frame["realtimeInput"]["mediaChunks"][0];
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let bytes = STANDARD.decode(chunk["data"].as_str().unwrap()).unwrap();
    assert_eq!(bytes.len(), 96_000);

    client.send_text("did you get that?").await.unwrap();
    assert_eq!(
        next(&mut client).await,
        Some(RelayMessage::Transcript {
            text: "did you get that?".into()
        })
    );
    assert_eq!(relay.state.registry.len(), 1);

    relay.handle.stop(false).await;
}

#[actix_web::test]
async fn test_frame_over_limit_closes_session_and_backend() {
    let mut backend = FakeBackend::start(true).await;
    let relay = start_relay(&backend, |config| config.performance.max_frame_bytes = 64 * 1024).await;
    let mut client = connected_client(&relay, &mut backend).await;

    client.send_pcm16(&vec![0u8; 96_000]).await.unwrap();

    // At most an error message arrives before the connection ends; the socket
    // may also be reset while the oversized frame is still unread
    within(async {
        loop {
            match client.next_message().await {
                Ok(Some(RelayMessage::Error { .. })) => continue,
                Ok(Some(other)) => panic!("unexpected message {:?}", other),
                Ok(None) | Err(_) => break,
            }
        }
    })
    .await;

    assert_eq!(backend.next_frame().await, close_marker());
    wait_for_empty_registry(&relay.state).await;

    relay.handle.stop(false).await;
}
