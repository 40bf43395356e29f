//! Health check handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Workout Analysis API is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub motion_service: CheckStatus,
    pub cache: CacheCheck,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct CacheCheck {
    pub entries: u64,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Readiness check endpoint (readiness probe).
/// Probes the motion service and reports cache occupancy.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    use std::time::Instant;

    let motion_check = match &state.motion_service {
        Some(client) => {
            let start = Instant::now();
            let healthy = client.health_check().await;
            CheckStatus {
                status: if healthy { "ok" } else { "error" }.to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            }
        }
        None => CheckStatus {
            status: "skipped".to_string(),
            latency_ms: None,
        },
    };

    let cache = state.orchestrator.cache();
    let stats = cache.stats();
    let all_ok = motion_check.status != "error";

    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            motion_service: motion_check,
            cache: CacheCheck {
                entries: stats.entries,
                in_flight: cache.in_flight(),
                hits: stats.hits,
                misses: stats.misses,
            },
        },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
