//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness once the bucket watch has synced

use crate::services::watcher::Readiness;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe: always returns 200 OK with a plain JSON body.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// HTTP 200 once the watch has delivered its initial listing, HTTP 503 until then.
pub async fn readyz(State(readiness): State<Readiness>) -> impl IntoResponse {
    let synced = readiness.is_synced();

    let mut checks = HashMap::new();
    checks.insert(
        "watch",
        CheckStatus {
            ok: synced,
            error: (!synced).then(|| "initial listing not yet delivered".to_string()),
        },
    );

    let body = ReadyResponse {
        status: if synced { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if synced {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
