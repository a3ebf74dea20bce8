//! # Relay Server
//!
//! Routes, middleware, and the shutdown sequence, shared by the binary and the
//! end-to-end tests.
//!
//! ## Routes:
//! - `GET /ws`, `GET /`: client WebSocket
//! - `GET /health`, `GET /api/v1/health`: liveness plus the live session count
//! - `GET /api/v1/metrics`: relay counters
//! - `GET /api/v1/sessions`: live sessions
//! - `GET /api/v1/config`: effective configuration, API key redacted

use crate::state::AppState;
use crate::{handlers, health, websocket};
use actix_cors::Cors;
use actix_web::dev::{Server, ServerHandle};
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use tracing::info;
use tracing_actix_web::TracingLogger;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::relay_metrics))
            .route("/sessions", web::get().to(health::list_sessions))
            .route("/config", web::get().to(handlers::get_config)),
    )
    .route("/health", web::get().to(health::health_check))
    .route("/ws", web::get().to(websocket::relay_websocket))
    .route("/", web::get().to(websocket::relay_websocket));
}

/// Build the HTTP server on an already-bound listener.
///
/// Signal handling is left to the caller, which must close sessions before
/// stopping the server; see `shutdown`.
pub fn build_server(state: AppState, listener: TcpListener) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(configure_routes)
    })
    .disable_signals()
    .listen(listener)?
    .run();

    Ok(server)
}

/// Close every live session, wait for each to acknowledge, then stop the server.
pub async fn shutdown(state: &AppState, handle: ServerHandle) {
    let closed = state.registry.close_all("server shutdown").await;
    info!(sessions = closed, "Closed live sessions");

    handle.stop(true).await;
}
