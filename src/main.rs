//! # Voice Relay - Main Application Entry Point
//!
//! Starts the relay's HTTP and WebSocket server.
//!
//! ## Startup:
//! 1. **Loads configuration** from defaults, `config.toml`, and environment variables
//! 2. **Sets up logging** through `tracing`, filtered by `RUST_LOG`
//! 3. **Binds the listener** and starts serving
//!
//! ## Shutdown:
//! On SIGINT or SIGTERM every live session is closed (backend link and client
//! socket), then the HTTP server stops and releases the listener.

use anyhow::Result;
use std::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_relay::{server, AppConfig, AppState};

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        environment = ?config.backend.environment,
        model = %config.backend.active_model(),
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    if !config.backend.has_api_key() {
        warn!("No backend API key configured (set GEMINI_API_KEY); backend connections will likely be refused");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)?;
    info!("Starting HTTP server on {}", bind_addr);

    let state = AppState::new(config);
    let server = server::build_server(state.clone(), listener)?;
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            signal?;
            info!("Shutdown signal received, closing sessions...");
            server::shutdown(&state, server_handle).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// `RUST_LOG` controls the filter, defaulting to `voice_relay=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGTERM or SIGINT.
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}
