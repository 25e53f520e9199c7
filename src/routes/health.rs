use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::models::job::JobStatus;
use crate::services::worker::WorkerState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub workers: WorkerHealth,
    pub queue: QueueHealth,
    pub jobs: HashMap<JobStatus, usize>,
}

#[derive(Serialize)]
pub struct WorkerHealth {
    pub size: usize,
    pub alive: usize,
    pub states: Vec<WorkerState>,
}

#[derive(Serialize)]
pub struct QueueHealth {
    pub pending: usize,
    pub in_flight: usize,
}

/// GET /health: worker pool and queue status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let alive = state.workers.alive();
    let healthy = alive > 0;
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers: WorkerHealth {
            size: state.workers.size(),
            alive,
            states: state.workers.states(),
        },
        queue: QueueHealth {
            pending: state.queue.queue_depth(),
            in_flight: state.queue.in_flight(),
        },
        jobs: state.ledger.counts(),
    };

    (status_code, Json(response))
}
