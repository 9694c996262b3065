use anyhow::{Context, Result};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{correlate_requests, log_requests, metrics::metrics_handler, state::*};
use crate::background_jobs::{JobError, SchedulerHandle};
use crate::correlation;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

#[derive(Serialize)]
struct TriggerAccepted {
    job_id: String,
    correlation_id: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

async fn list_jobs(State(scheduler): State<SchedulerHandle>) -> Response {
    Json(scheduler.list_jobs().await).into_response()
}

async fn get_job(State(scheduler): State<SchedulerHandle>, Path(id): Path<String>) -> Response {
    match scheduler.get_job(&id).await {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `POST /v1/jobs/{id}/trigger`
///
/// An empty body triggers the job without parameters. The run is started
/// under the request's correlation id.
async fn trigger_job(
    State(scheduler): State<SchedulerHandle>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<JsonValue>(&body) {
            Ok(params) => Some(params),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e))
            }
        }
    };

    match scheduler
        .trigger_job(&id, params, correlation::current())
        .await
    {
        Ok(correlation_id) => {
            info!("Job {} triggered manually", id);
            (
                StatusCode::ACCEPTED,
                Json(TriggerAccepted {
                    job_id: id,
                    correlation_id: correlation_id.to_string(),
                }),
            )
                .into_response()
        }
        Err(JobError::NotFound) => error_response(StatusCode::NOT_FOUND, "Job not found"),
        Err(JobError::AlreadyRunning) => {
            error_response(StatusCode::CONFLICT, "Job is already running")
        }
        Err(e) => {
            warn!("Failed to trigger job {}: {}", id, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

pub fn make_app(state: ServerState) -> Router {
    let job_routes: Router = Router::new()
        .route("/", get(list_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/trigger", post(trigger_job))
        .with_state(state.clone());

    let home_router: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone());

    home_router
        .nest("/v1/jobs", job_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
        .layer(middleware::from_fn(correlate_requests))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn serve(router: Router, port: u16, name: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind {} listener on port {}", name, port))?;
    info!("{} listening on {}", name, listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .with_context(|| format!("{} server error", name))
}

pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    serve(make_app(state), port, "HTTP", shutdown).await
}

pub async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> Result<()> {
    serve(make_metrics_app(), port, "Metrics", shutdown).await
}
