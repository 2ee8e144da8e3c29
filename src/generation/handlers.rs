use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::json;
use std::{path::PathBuf, time::Duration};
use tracing::{error, info};

use super::{
    ChatProviderConfig, GenerationJob, GenerationWorker, VertexCredentials, create_tagger,
    tagging::clean_images,
};
use crate::{
    AppState,
    api::ApiError,
    system::probe_connectivity,
    tasks::{TaskSection, TaskUpdate},
    workspace::Bucket,
};

fn default_overwrite() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub key_path: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(flatten)]
    pub provider: ChatProviderConfig,
}

/// `~/x` and relative paths made absolute against the home and working
/// directories.
fn resolve_key_path(raw: &str) -> PathBuf {
    let expanded = match (raw.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ if raw == "~" => std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(raw)),
        _ => PathBuf::from(raw),
    };

    if expanded.is_absolute() {
        return expanded;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&expanded))
        .unwrap_or(expanded)
}

fn non_blank(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|v| !v.is_empty())
}

pub async fn generate_handler(
    State(app_state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bucket = Bucket::Source;
    let files = app_state.workspace.select_images(bucket, &request.targets);
    if files.is_empty() {
        return Err(ApiError::BadRequest(
            "No images to generate from, upload some first".to_string(),
        ));
    }

    let (Some(key_path), Some(project_id), Some(location)) = (
        non_blank(&request.key_path),
        non_blank(&request.project_id),
        non_blank(&request.location),
    ) else {
        return Err(ApiError::BadRequest(
            "key_path, project_id and location are required".to_string(),
        ));
    };

    let key_path = resolve_key_path(key_path);
    if !key_path.exists() {
        return Err(ApiError::BadRequest(format!(
            "Credential file not found: {}",
            key_path.display()
        )));
    }

    let network = &app_state.config.network;
    if network.probe_before_generation && !probe_connectivity(network).await {
        return Err(ApiError::BadGateway(
            "The image provider is unreachable, enable a proxy or VPN and retry".to_string(),
        ));
    }

    let prompt = request.prompt.trim().to_string();
    app_state.tasks.try_start(
        TaskSection::ImageGeneration,
        TaskUpdate::new()
            .message("Task queued")
            .prompt(prompt.clone())
            .total(files.len())
            .processed(0)
            .bucket(bucket.as_str()),
    )?;

    let job = GenerationJob {
        prompt: if prompt.is_empty() {
            app_state.config.generation.default_prompt.clone()
        } else {
            prompt
        },
        files,
        bucket,
        overwrite: request.overwrite,
        credentials: VertexCredentials {
            key_path,
            project_id: project_id.to_string(),
            location: location.to_string(),
        },
    };
    info!(
        "Queued generation of {} images (overwrite {})",
        job.files.len(),
        job.overwrite
    );

    let worker = GenerationWorker::new(
        app_state.tasks.clone(),
        app_state.workspace.clone(),
        &app_state.config.generation,
    );
    let factory = app_state.generator_factory.clone();
    tokio::spawn(async move {
        if let Err(e) = worker.run(job, factory.as_ref()).await {
            error!("Generation batch aborted: {}", e);
        }
    });

    Ok(Json(json!({
        "ok": true,
        "message": "Generation started, follow progress in the console",
    })))
}

pub async fn clean_handler(
    State(app_state): State<AppState>,
    Json(request): Json<CleanRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if non_blank(&request.provider.model).is_none() || non_blank(&request.provider.api_key).is_none()
    {
        return Err(ApiError::BadRequest("model and api_key are required".to_string()));
    }

    let targets = app_state
        .workspace
        .select_images(Bucket::Source, &request.targets);
    if targets.is_empty() {
        return Err(ApiError::BadRequest("Select at least one image".to_string()));
    }

    let tagging = &app_state.config.tagging;
    let tagger = create_tagger(
        &request.provider,
        Duration::from_secs(tagging.request_timeout_secs),
    )?;
    let prompt = non_blank(&request.prompt).unwrap_or(tagging.default_prompt.as_str());

    let items = clean_images(&app_state.workspace, tagger.as_ref(), &targets, prompt).await;
    let succeeded = items.iter().filter(|item| item.ok).count();

    Ok(Json(json!({
        "ok": true,
        "message": format!("Tagged {} of {} images", succeeded, items.len()),
        "count": succeeded,
        "items": items,
    })))
}

pub async fn test_connection_handler(
    State(app_state): State<AppState>,
    Json(config): Json<ChatProviderConfig>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tagger = create_tagger(
        &config,
        Duration::from_secs(app_state.config.tagging.request_timeout_secs),
    )?;
    let message = tagger
        .test_connection()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Connection failed: {}", e)))?;

    Ok(Json(json!({ "ok": true, "message": message })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_key_path() {
        let absolute = resolve_key_path("/etc/keys/sa.json");
        assert_eq!(absolute, PathBuf::from("/etc/keys/sa.json"));

        let relative = resolve_key_path("keys/sa.json");
        assert!(relative.is_absolute());
        assert!(relative.ends_with("keys/sa.json"));

        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                resolve_key_path("~/sa.json"),
                PathBuf::from(home).join("sa.json")
            );
        }
    }

    #[test]
    fn test_generate_request_defaults() {
        let request: GenerateRequest = serde_json::from_str("{}").unwrap();
        assert!(request.overwrite);
        assert!(request.targets.is_empty());

        let request: CleanRequest = serde_json::from_str(
            r#"{"provider": "openai", "model": "m", "api_key": "k", "targets": ["a.png"]}"#,
        )
        .unwrap();
        assert_eq!(request.provider.provider, "openai");
        assert_eq!(request.targets, vec!["a.png".to_string()]);
    }
}
