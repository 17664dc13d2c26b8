use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use leadline_agent::runtime::ChatRuntime;
use leadline_db::{ping, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    runtime: Arc<ChatRuntime>,
    db_pool: Option<DbPool>,
}

impl HealthState {
    pub fn new(runtime: Arc<ChatRuntime>, db_pool: Option<DbPool>) -> Self {
        Self { runtime, db_pool }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<HealthCheck>,
    pub sessions: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Answers 200 whenever the runtime is up; a failing database only degrades `status`.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.db_pool {
        Some(pool) => Some(database_check(pool).await),
        None => None,
    };
    let ready = database.as_ref().map_or(true, |check| check.status == "ready");

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: format!(
                "leadline-server running a {} question script",
                state.runtime.engine().script().len()
            ),
        },
        database,
        sessions: state.runtime.sessions().len().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
