use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use super::{
    Bucket, OrganizeRequest, Workspace, WorkspaceError, archive::UploadSpool,
    sanitize_relative_path,
};
use crate::{AppState, api::ApiError, static_files::serve_file};

#[derive(Debug, Default, Deserialize)]
pub struct KeywordQuery {
    #[serde(default)]
    pub keyword: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetsRequest {
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TagRequest {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub tags: String,
}

pub async fn list_images_handler(
    State(app_state): State<AppState>,
    Query(query): Query<KeywordQuery>,
) -> impl IntoResponse {
    let workspace = &app_state.workspace;
    let images = workspace.list_items(Bucket::Source, query.keyword.as_deref());
    Json(json!({
        "ok": true,
        "images": images,
        "counts": workspace.counts_by_bucket(),
    }))
}

pub async fn list_pairs_handler(
    State(app_state): State<AppState>,
    Query(query): Query<KeywordQuery>,
) -> impl IntoResponse {
    let workspace = &app_state.workspace;
    let pairs = workspace.pair_source_with_derived(query.keyword.as_deref());
    Json(json!({
        "ok": true,
        "pairs": pairs,
        "counts": workspace.counts_by_bucket(),
    }))
}

/// Multipart import into the source bucket. Images keep their (sanitized)
/// relative names; `.zip` files are spooled to `tmp/` and extracted.
pub async fn upload_handler(
    State(app_state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workspace = app_state.workspace.clone();
    workspace.ensure_layout()?;

    let mut saved: Vec<String> = Vec::new();
    let mut skipped = 0usize;
    let mut received = 0usize;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let Some(file_name) = field.file_name().map(|n| n.to_string()) else {
            continue;
        };
        received += 1;

        if file_name.to_lowercase().ends_with(".zip") {
            let spool = UploadSpool::new(workspace.temp_dir());
            let mut file = tokio::fs::File::create(spool.path())
                .await
                .map_err(WorkspaceError::from)?;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?
            {
                file.write_all(&chunk).await.map_err(WorkspaceError::from)?;
            }
            file.flush().await.map_err(WorkspaceError::from)?;
            drop(file);

            let ws = workspace.clone();
            let extracted = tokio::task::spawn_blocking(move || ws.extract_zip_archive(spool.path()))
                .await
                .map_err(WorkspaceError::from)??;
            saved.extend(extracted);
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let relative = sanitize_relative_path(&file_name);
        match workspace.save_upload(Bucket::Source, &relative, &bytes)? {
            Some(stored) => saved.push(stored),
            None => skipped += 1,
        }
    }

    if received == 0 {
        return Err(ApiError::BadRequest("No files were uploaded".to_string()));
    }

    let mut message = format!("Imported {} images", saved.len());
    if skipped > 0 {
        message.push_str(&format!(", skipped {} unsupported files", skipped));
    }
    info!("{}", message);

    Ok(Json(json!({
        "ok": true,
        "message": message,
        "added": saved.len(),
        "skipped": skipped,
        "items": saved,
    })))
}

/// Attach a manually produced variant (`file`) to a source stem
/// (`target_stem`).
pub async fn upload_generated_handler(
    State(app_state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut target_stem: Option<String> = None;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "target_stem" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                target_stem = Some(text.trim().to_string());
            }
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                upload = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (Some(target_stem), Some((file_name, bytes))) = (target_stem, upload) else {
        return Err(ApiError::BadRequest(
            "Both a file and a target image are required".to_string(),
        ));
    };

    let path = app_state
        .workspace
        .save_generated_upload(&target_stem, &file_name, &bytes)?;
    Ok(Json(json!({ "ok": true, "message": "Upload complete", "path": path })))
}

pub async fn organize_handler(
    State(app_state): State<AppState>,
    Json(request): Json<OrganizeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = app_state.workspace.organize(&request)?;
    Ok(Json(json!({
        "ok": true,
        "message": outcome.message,
        "renamed": outcome.renamed,
        "deleted": outcome.deleted,
    })))
}

pub async fn delete_handler(
    State(app_state): State<AppState>,
    Json(request): Json<TargetsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.targets.is_empty() {
        return Err(ApiError::BadRequest(
            "Select at least one image to delete".to_string(),
        ));
    }

    let outcome = app_state.workspace.delete_with_cascade(&request.targets);
    if outcome.requested == 0 {
        return Err(ApiError::BadRequest(
            "None of the selected images exist".to_string(),
        ));
    }

    Ok(Json(json!({
        "ok": true,
        "message": format!("Deleted {} images and their derived files", outcome.removed),
        "deleted": outcome.removed,
    })))
}

pub async fn clear_handler(
    State(app_state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workspace = app_state.workspace.clone();
    let removed = tokio::task::spawn_blocking(move || workspace.clear_all())
        .await
        .map_err(WorkspaceError::from)??;

    let message = if removed == 0 {
        "There are no images to clear".to_string()
    } else {
        format!("Cleared {} images and their derived data", removed)
    };
    Ok(Json(json!({ "ok": true, "message": message, "deleted": removed })))
}

pub async fn tag_handler(
    State(app_state): State<AppState>,
    Json(request): Json<TagRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workspace = &app_state.workspace;
    if request.targets.is_empty() && workspace.list_items(Bucket::Source, None).is_empty() {
        return Err(ApiError::BadRequest("Select at least one image".to_string()));
    }

    let count = workspace.write_tags(&request.targets, request.tags.trim());
    Ok(Json(json!({
        "ok": true,
        "message": format!("Updated tags for {} images", count),
        "count": count,
    })))
}

pub async fn export_images_handler(
    State(app_state): State<AppState>,
) -> Result<Response, ApiError> {
    let workspace = app_state.workspace.clone();
    let bytes = tokio::task::spawn_blocking(move || workspace.export_bucket_zip(Bucket::Source))
        .await
        .map_err(WorkspaceError::from)??;
    Ok(zip_attachment("images_export", bytes))
}

pub async fn export_ai_handler(State(app_state): State<AppState>) -> Result<Response, ApiError> {
    let workspace = app_state.workspace.clone();
    let bytes = tokio::task::spawn_blocking(move || workspace.export_ai_zip())
        .await
        .map_err(WorkspaceError::from)??;
    Ok(zip_attachment("ai_export", bytes))
}

fn zip_attachment(prefix: &str, bytes: Vec<u8>) -> Response {
    let file_name = format!(
        "{}_{}.zip",
        prefix,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        Body::from(bytes),
    )
        .into_response()
}

pub async fn serve_upload(
    State(app_state): State<AppState>,
    Path(path): Path<String>,
) -> Response {
    serve_bucket_file(&app_state.workspace, Bucket::Source.as_str(), &path).await
}

pub async fn serve_media(
    State(app_state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Response {
    serve_bucket_file(&app_state.workspace, &bucket, &path).await
}

async fn serve_bucket_file(workspace: &Arc<Workspace>, bucket: &str, relative: &str) -> Response {
    match workspace.resolve_named(bucket, relative) {
        Ok(path) => serve_file(&path, "no-cache").await,
        Err(_) => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
    }
}

/// Bounded thumbnail of a bucket image. Falls back to the original when the
/// image cannot be decoded or resized.
pub async fn serve_thumbnail(
    State(app_state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Response {
    let workspace = &app_state.workspace;
    let Ok(bucket) = bucket.parse::<Bucket>() else {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };

    match workspace.ensure_thumbnail(bucket, &path).await {
        Ok(thumbnail) => serve_file(&thumbnail, "no-cache").await,
        Err(WorkspaceError::PathEscape(_)) | Err(WorkspaceError::InvalidRequest(_)) => {
            (StatusCode::FORBIDDEN, "Forbidden").into_response()
        }
        Err(WorkspaceError::NotFound(_)) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
        Err(WorkspaceError::UnsupportedFile(_)) => {
            (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Not Supported").into_response()
        }
        Err(e) => {
            error!("Thumbnail generation failed for {}/{}: {}", bucket, path, e);
            match workspace.resolve(bucket, &path) {
                Ok(original) => serve_file(&original, "no-cache").await,
                Err(_) => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
            }
        }
    }
}
