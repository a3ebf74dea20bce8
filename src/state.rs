//! # Application State
//!
//! State shared by every HTTP handler and every session actor.
//!
//! ## Sharing pattern:
//! - `AppConfig` is read-only after startup, so sessions get a clone
//! - `SessionRegistry` is an `Arc<Mutex<..>>` handle touched only on connect/disconnect
//! - `RelayMetrics` are plain atomics; sessions bump them on the hot path without locking

use crate::config::AppConfig;
use crate::session::SessionRegistry;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: SessionRegistry,
    pub metrics: Arc<RelayMetrics>,
    pub start_time: Instant,
}

/// Relay-wide counters since startup.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_rejected: AtomicU64,
    client_messages: AtomicU64,
    messages_sent: AtomicU64,
    interruptions: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of `RelayMetrics`, ready to serialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_rejected: u64,
    pub client_messages: u64,
    pub messages_sent: u64,
    pub interruptions: u64,
    pub errors: u64,
}

impl RelayMetrics {
    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_message(&self) {
        self.client_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            client_messages: self.client_messages.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let registry = SessionRegistry::new(config.performance.max_concurrent_sessions);
        Self {
            config: Arc::new(config),
            registry,
            metrics: Arc::new(RelayMetrics::default()),
            start_time: Instant::now(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
