//! API route definitions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use super::state::AppState;
use crate::scheduler::cron::next_tick_after;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/cron-workflows", get(list_workflows))
        .route("/cron-workflows/{name}/runs", get(list_runs))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    let now = Utc::now();
    let data: Vec<Value> = state
        .workflows
        .iter()
        .map(|spec| {
            let next = next_tick_after(spec, now).ok().flatten();
            json!({
                "name": spec.name,
                "schedule": spec.schedule,
                "concurrencyPolicy": spec.concurrency_policy,
                "startingDeadlineSeconds": spec.starting_deadline_seconds,
                "suspend": spec.suspend,
                "nextScheduledTime": next.map(|t| t.to_rfc3339()),
            })
        })
        .collect();

    Json(json!({ "data": data, "meta": { "total": data.len() } }))
}

async fn list_runs(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.workflow(&name).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("cron workflow '{}' not found", name) })),
        );
    }

    let store = state.store.clone();
    let lookup = name.clone();
    let result = tokio::task::spawn_blocking(move || store.list_for_spec(&lookup)).await;

    match result {
        Ok(Ok(mut runs)) => {
            runs.reverse();
            let total = runs.len();
            (
                StatusCode::OK,
                Json(json!({ "data": runs, "meta": { "total": total, "workflow": name } })),
            )
        }
        Ok(Err(e)) => {
            tracing::error!(workflow = %name, "Failed to list runs: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to load runs" })),
            )
        }
        Err(e) => {
            tracing::error!(workflow = %name, "Run listing task panicked: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to load runs" })),
            )
        }
    }
}
