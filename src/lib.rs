use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod api;
pub mod generation;
pub mod startup_checks;
pub mod static_files;
pub mod system;
pub mod tasks;
pub mod workspace;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    pub static_files: StaticConfig,
    pub workspace: WorkspaceConfig,
    pub generation: GenerationConfig,
    pub tagging: TaggingConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for multipart uploads (zip archives can be large)
    pub max_upload_mb: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    /// Gitee `owner/repo` queried by the update check
    pub update_repo: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticConfig {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory that receives the toolkit checkout and downloaded models
    pub base_dir: PathBuf,
    /// Media workspace; defaults to `<base_dir>/image_workspace`
    pub root: Option<PathBuf>,
    pub thumbnail: ImageSizeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageSizeConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    /// Fixed pause between two generation requests, keeps the batch under
    /// the provider's requests-per-minute quota
    pub request_delay_secs: u64,
    pub max_attempts: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub default_prompt: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaggingConfig {
    pub default_prompt: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub probe_url: String,
    pub probe_timeout_secs: u64,
    /// Refuse to start a generation batch when the provider is unreachable
    pub probe_before_generation: bool,
    pub update_timeout_secs: u64,
    pub accelerator_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6008,
            max_upload_mb: 2048,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "LoRA Training Toolkit".to_string(),
            log_level: "info".to_string(),
            update_repo: "rcangbaohz/lora-training-toolkit".to_string(),
        }
    }
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("static"),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        let base_dir = if cfg!(target_os = "linux") {
            PathBuf::from("/root/autodl-tmp")
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("autodl-tmp")
        };

        Self {
            base_dir,
            root: None,
            thumbnail: ImageSizeConfig {
                width: 300,
                height: 300,
            },
        }
    }
}

impl WorkspaceConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| self.base_dir.join("image_workspace"))
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: std::env::var("GEMINI_MODEL_NAME")
                .unwrap_or_else(|_| "gemini-3-pro-image-preview".to_string()),
            request_delay_secs: 7,
            max_attempts: 3,
            temperature: 0.4,
            top_p: 0.95,
            top_k: 32,
            default_prompt: "Generate an image in a consistent style based on the reference image"
                .to_string(),
            request_timeout_secs: 300,
        }
    }
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            default_prompt: "Describe this training image for captioning. Reply with JSON only: \
                             {\"tags\": [\"short tag\", ...], \"caption\": \"one sentence\"}"
                .to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://www.google.com/generate_204".to_string(),
            probe_timeout_secs: 8,
            probe_before_generation: true,
            update_timeout_secs: 10,
            accelerator_timeout_secs: 30,
        }
    }
}

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub platform: system::Platform,
    pub workspace: Arc<workspace::Workspace>,
    pub tasks: Arc<tasks::TaskStore>,
    pub static_handler: static_files::StaticFileHandler,
    pub generator_factory: generation::DynGeneratorFactory,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let workspace = Arc::new(workspace::Workspace::new(
            config.workspace.workspace_root(),
            config.workspace.thumbnail.clone(),
        ));
        let static_handler =
            static_files::StaticFileHandler::new(config.static_files.directory.clone());
        let generator_factory: generation::DynGeneratorFactory = Arc::new(
            generation::providers::vertex::VertexGeneratorFactory::new(config.generation.clone()),
        );

        Self {
            platform: system::Platform::current(),
            workspace,
            tasks: Arc::new(tasks::TaskStore::new()),
            static_handler,
            generator_factory,
            config,
        }
    }
}

pub async fn create_app(config: Config) -> Router {
    create_router(AppState::new(config))
}

pub fn create_router(app_state: AppState) -> Router {
    let upload_limit = app_state.config.server.max_upload_mb * 1024 * 1024;

    Router::new()
        .route("/", axum::routing::get(static_files::index_handler))
        .route("/static/{*path}", axum::routing::get(static_files::static_file_handler))
        .route("/uploads/{*path}", axum::routing::get(workspace::handlers::serve_upload))
        .route(
            "/media/{bucket}/{*path}",
            axum::routing::get(workspace::handlers::serve_media),
        )
        .route(
            "/api/thumbnail/{bucket}/{*path}",
            axum::routing::get(workspace::handlers::serve_thumbnail),
        )
        .route("/api/status", axum::routing::get(tasks::handlers::status_handler))
        .route(
            "/api/check_update",
            axum::routing::get(system::check_update_handler),
        )
        .route(
            "/api/run-setup",
            axum::routing::post(tasks::handlers::run_setup_handler),
        )
        .route("/api/run-start", axum::routing::post(system::run_start_handler))
        .route(
            "/api/download",
            axum::routing::post(tasks::handlers::download_handler),
        )
        .route(
            "/api/network/accelerator",
            axum::routing::post(system::accelerator_handler),
        )
        .route(
            "/api/images/list",
            axum::routing::get(workspace::handlers::list_images_handler),
        )
        .route(
            "/api/ai/list",
            axum::routing::get(workspace::handlers::list_pairs_handler),
        )
        .route(
            "/api/images/upload",
            axum::routing::post(workspace::handlers::upload_handler)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/ai/upload_generated",
            axum::routing::post(workspace::handlers::upload_generated_handler)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/images/organize",
            axum::routing::post(workspace::handlers::organize_handler),
        )
        .route(
            "/api/images/delete",
            axum::routing::post(workspace::handlers::delete_handler),
        )
        .route(
            "/api/images/clear",
            axum::routing::post(workspace::handlers::clear_handler),
        )
        .route(
            "/api/images/tag",
            axum::routing::post(workspace::handlers::tag_handler),
        )
        .route(
            "/api/images/export",
            axum::routing::get(workspace::handlers::export_images_handler),
        )
        .route(
            "/api/ai/export",
            axum::routing::get(workspace::handlers::export_ai_handler),
        )
        .route(
            "/api/images/generate",
            axum::routing::post(generation::handlers::generate_handler),
        )
        .route(
            "/api/ai/clean",
            axum::routing::post(generation::handlers::clean_handler),
        )
        .route(
            "/api/ai/config/test",
            axum::routing::post(generation::handlers::test_connection_handler),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::info_span!(
                        "http_request",
                        method = %method,
                        uri = %uri,
                        matched_path,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    let method = request.method();
                    let uri = request.uri();
                    let user_agent = request
                        .headers()
                        .get("user-agent")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");

                    tracing::debug!(
                        target: "access_log",
                        method = %method,
                        path = %uri.path(),
                        query = ?uri.query(),
                        user_agent = %user_agent,
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = response.status();
                        let size = response
                            .headers()
                            .get("content-length")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("-");

                        tracing::info!(
                            target: "access_log",
                            status = %status,
                            size = %size,
                            latency_ms = %latency.as_millis(),
                            "response"
                        );
                    },
                ),
        )
        .with_state(app_state)
}
