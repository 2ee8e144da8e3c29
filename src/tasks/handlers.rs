use axum::{Json, extract::State, response::IntoResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use super::{
    PipelineRunner, TaskSection, TaskStatus, TaskUpdate,
    pipelines::{DownloadPlan, setup_commands},
};
use crate::{AppState, api::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct SetupRequest {
    #[serde(default)]
    pub github_accelerator: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub source: String,
}

pub async fn status_handler(State(app_state): State<AppState>) -> impl IntoResponse {
    let snapshot = app_state.tasks.snapshot_all();
    Json(json!({
        "os": app_state.platform.os,
        "is_linux": app_state.platform.is_linux,
        "base_dir": app_state.config.workspace.base_dir,
        "version": env!("CARGO_PKG_VERSION"),
        "setup": snapshot.setup,
        "download": snapshot.download,
        "image_generation": snapshot.image_generation,
    }))
}

pub async fn run_setup_handler(
    State(app_state): State<AppState>,
    Json(request): Json<SetupRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let script_dir = std::env::current_dir().map_err(|e| ApiError::Internal(e.to_string()))?;
    let commands = setup_commands(
        &app_state.platform,
        &app_state.config.workspace.base_dir,
        &script_dir,
        request.github_accelerator,
    )?;

    app_state.tasks.try_start(
        TaskSection::Setup,
        TaskUpdate::new().message("About to start"),
    )?;
    info!(
        "Starting setup pipeline ({} commands, github accelerator: {})",
        commands.len(),
        request.github_accelerator
    );

    let runner = PipelineRunner::new(app_state.tasks.clone());
    tokio::spawn(async move {
        if let Err(e) = runner.run_sequence(TaskSection::Setup, &commands).await {
            error!("Setup pipeline failed: {}", e);
        }
    });

    Ok(Json(json!({ "ok": true, "message": "Setup pipeline started" })))
}

/// Running with no progress yet; the pipeline runner reports progress from
/// zero once the download command starts.
fn preparing_download(plan: &DownloadPlan) -> TaskUpdate {
    TaskUpdate::new()
        .status(TaskStatus::Running)
        .message(format!("preparing download of {}", plan.model.name()))
}

pub async fn download_handler(
    State(app_state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.model.trim().is_empty() || request.source.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Choose a model and a download source".to_string(),
        ));
    }
    let plan = DownloadPlan::new(
        &request.model,
        &request.source,
        &app_state.config.workspace.base_dir,
    )?;

    app_state.tasks.try_start(
        TaskSection::Download,
        TaskUpdate::new()
            .message("Preparing")
            .model(plan.model.name())
            .source(plan.source.to_string()),
    )?;

    let store = app_state.tasks.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::fs::create_dir_all(&plan.target_dir).await {
            error!("Failed to create {:?}: {}", plan.target_dir, e);
            store.update(
                TaskSection::Download,
                TaskUpdate::new()
                    .status(TaskStatus::Error)
                    .message(format!("cannot create {}: {}", plan.target_dir.display(), e)),
            );
            return;
        }

        store.update(TaskSection::Download, preparing_download(&plan));
        info!("Downloading {} from {}", plan.model.name(), plan.source);

        let runner = PipelineRunner::new(store);
        if let Err(e) = runner
            .run_sequence(TaskSection::Download, std::slice::from_ref(&plan.command))
            .await
        {
            error!("Download of {} failed: {}", plan.model.name(), e);
        }
    });

    Ok(Json(json!({ "ok": true, "message": "Model download started" })))
}
