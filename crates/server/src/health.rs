use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use summarybot_db::{DbPool, SubscriptionStore};
use summarybot_mattermost::{SharedStreamStatus, StreamStatus};
use summarybot_scheduler::{SchedulerStatus, SharedSchedulerStatus};
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub store: SubscriptionStore,
    pub scheduler_status: SharedSchedulerStatus,
    pub event_stream: SharedStreamStatus,
    pub poll_interval_secs: u64,
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
    pub database: HealthCheck,
    pub event_stream: HealthCheck,
    pub checked_at: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusResponse {
    pub active_subscriptions: usize,
    pub poll_interval_secs: u64,
    pub scheduler: SchedulerStatus,
    pub event_stream: StreamStatus,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).route("/status", get(status)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let event_stream = event_stream_check(&*state.event_stream.read().await);
    let ready = database.status == "ready" && event_stream.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "summarybot runtime initialized".to_string(),
        },
        database,
        event_stream,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

pub async fn status(State(state): State<HealthState>) -> Json<StatusResponse> {
    let active_subscriptions = state.store.get_all_subscriptions().await.len();
    let scheduler = state.scheduler_status.read().await.clone();
    let event_stream = state.event_stream.read().await.clone();

    Json(StatusResponse {
        active_subscriptions,
        poll_interval_secs: state.poll_interval_secs,
        scheduler,
        event_stream,
        checked_at: Utc::now().to_rfc3339(),
    })
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn event_stream_check(stream: &StreamStatus) -> HealthCheck {
    if stream.connected {
        return HealthCheck { status: "ready", detail: "event stream connected".to_string() };
    }
    let detail = match (stream.stopped, stream.last_error.as_deref()) {
        (true, _) => "event stream stopped after exhausting reconnect attempts".to_string(),
        (false, Some(error)) => format!(
            "event stream reconnecting after {} failed attempts: {error}",
            stream.consecutive_failures
        ),
        (false, None) => "event stream not connected".to_string(),
    };
    HealthCheck { status: "degraded", detail }
}
