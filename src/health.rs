use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;
    let active = state.registry.len();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "activeSessions": active,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "sessions": {
            "active": active,
            "max": state.registry.capacity()
        },
        "backend": {
            "model": config.backend.active_model(),
            "environment": config.backend.environment,
            "api_key_configured": config.backend.has_api_key()
        }
    }))
}

pub async fn relay_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let active = state.registry.len();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "sessions": {
            "active": active,
            "opened": metrics.sessions_opened,
            "closed": metrics.sessions_closed,
            "rejected": metrics.sessions_rejected,
            "utilization": if state.registry.capacity() > 0 {
                active as f64 / state.registry.capacity() as f64
            } else {
                0.0
            }
        },
        "messages": {
            "client_in": metrics.client_messages,
            "client_out": metrics.messages_sent,
            "messages_per_second": if uptime_seconds > 0 {
                (metrics.client_messages + metrics.messages_sent) as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "interruptions": metrics.interruptions,
        "errors": metrics.errors
    }))
}

pub async fn list_sessions(state: web::Data<AppState>) -> HttpResponse {
    let sessions = state.registry.snapshot();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": sessions.len(),
        "sessions": sessions
    }))
}
