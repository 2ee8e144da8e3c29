use axum::{
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::{path::PathBuf, time::UNIX_EPOCH};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

/// Serves the single-page control panel from the static directory.
#[derive(Clone)]
pub struct StaticFileHandler {
    pub static_dir: PathBuf,
}

impl StaticFileHandler {
    pub fn new(static_dir: PathBuf) -> Self {
        Self { static_dir }
    }

    pub async fn serve(&self, path: &str) -> Response {
        let relative = path.trim_start_matches('/');
        if std::path::Path::new(relative)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            error!("Path traversal attempt: {:?}", path);
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }

        let file_path = self.static_dir.join(relative);
        debug!("Attempting to serve static file: {:?}", file_path);

        let cache_control = if file_path.extension().and_then(|e| e.to_str()) == Some("html") {
            "no-cache"
        } else {
            "public, max-age=300, must-revalidate"
        };
        serve_file(&file_path, cache_control).await
    }
}

/// Stream a file from disk with content type, Last-Modified and ETag headers.
pub async fn serve_file(file_path: &std::path::Path, cache_control: &str) -> Response {
    let metadata = match tokio::fs::metadata(file_path).await {
        Ok(m) if m.is_file() => m,
        Ok(_) => return (StatusCode::NOT_FOUND, "File not found").into_response(),
        Err(e) => {
            debug!("Failed to get metadata for {:?}: {}", file_path, e);
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };

    let file = match File::open(file_path).await {
        Ok(file) => file,
        Err(e) => {
            debug!("Failed to open file {:?}: {}", file_path, e);
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };

    let content_type = mime_guess::from_path(file_path)
        .first_or_octet_stream()
        .to_string();

    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, cache_control);

    if let Ok(modified) = metadata.modified()
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        response = response.header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified));
        let etag = format!("\"{}-{}\"", duration.as_secs(), metadata.len());
        response = response.header(header::ETAG, etag);
    }

    match response.body(body) {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build file response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn index_handler(State(app_state): State<crate::AppState>) -> Response {
    app_state.static_handler.serve("index.html").await
}

pub async fn static_file_handler(
    State(app_state): State<crate::AppState>,
    Path(path): Path<String>,
) -> Response {
    app_state.static_handler.serve(&path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_serve_static_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("app.js"), "console.log(1)").unwrap();
        let handler = StaticFileHandler::new(temp_dir.path().to_path_buf());

        let response = handler.serve("/app.js").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ETAG));
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .contains("javascript")
        );

        assert_eq!(handler.serve("missing.css").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(handler.serve("../secret").await.status(), StatusCode::FORBIDDEN);
    }
}
