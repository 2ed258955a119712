//! Admin endpoints: provider inspection, health snapshots, job control.

use std::collections::HashMap;
use std::path::{Path as FilePath, PathBuf};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::executor::ResolvedCommand;
use crate::health::{ModelSnapshot, TrackerSnapshot};
use crate::http::{error_response, map_error, AppState};
use crate::jobs::JobSnapshot;
use crate::provider::ModelProvider;
use crate::registry::{ModelInfo, ProviderInfo};

pub(super) async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    Json(state.registry.list_providers())
}

pub(super) async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.registry.list_models())
}

pub(super) async fn health_snapshot(State(state): State<AppState>) -> Json<TrackerSnapshot> {
    Json(state.registry.tracker().snapshot().await)
}

pub(super) async fn model_health(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> Response {
    match state.registry.tracker().snapshot_model(&model).await {
        Some(snapshot) => Json::<ModelSnapshot>(snapshot).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "model_not_found",
            format!("no recorded attempts for model '{model}'"),
        ),
    }
}

pub(super) async fn start_login(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Some(provider) = state.registry.provider(&id) else {
        return provider_not_found(&id);
    };
    match provider.start_login_job(&state.jobs).await {
        Ok(job) => Json(job).into_response(),
        Err(err) => map_error(&err),
    }
}

pub(super) async fn auth_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Some(provider) = state.registry.provider(&id) else {
        return provider_not_found(&id);
    };
    Json(provider.check_auth_status().await).into_response()
}

pub(super) async fn rate_limits(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Some(provider) = state.registry.provider(&id) else {
        return provider_not_found(&id);
    };
    Json(provider.check_rate_limits().await).into_response()
}

fn provider_not_found(id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "provider_not_found",
        format!("unknown provider: {id}"),
    )
}

#[derive(Debug, Deserialize)]
pub(super) struct ListJobsQuery {
    #[serde(default = "default_job_limit")]
    limit: usize,
}

fn default_job_limit() -> usize {
    20
}

pub(super) async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Json<Vec<JobSnapshot>> {
    Json(state.jobs.list_jobs(query.limit).await)
}

pub(super) async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.jobs.get_job(&id).await {
        Some(job) => Json(job).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "job_not_found",
            format!("unknown job: {id}"),
        ),
    }
}

/// Operator-supplied one-off CLI run.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RunCliRequest {
    executable: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default = "default_cli_timeout_ms")]
    timeout_ms: u64,
}

fn default_cli_timeout_ms() -> u64 {
    120_000
}

pub(super) async fn run_cli(
    State(state): State<AppState>,
    Json(request): Json<RunCliRequest>,
) -> Response {
    let basename = FilePath::new(&request.executable)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(&request.executable)
        .to_string();
    let command = ResolvedCommand {
        program: request.executable,
        args: request.args,
        env: request.env,
        cwd: request.cwd.map(PathBuf::from),
        timeout: Duration::from_millis(request.timeout_ms),
    };

    match state
        .jobs
        .start_allowed_command(
            &format!("cli:{basename}"),
            command,
            &state.config.jobs.allowed_executables,
        )
        .await
    {
        Ok(job) => Json::<JobSnapshot>(job).into_response(),
        Err(err) => error_response(
            StatusCode::FORBIDDEN,
            "executable_not_allowed",
            err.to_string(),
        ),
    }
}
