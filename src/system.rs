use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{path::Path, process::Stdio, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{AppState, NetworkConfig, api::ApiError};

pub const WINDOWS_START_SCRIPT: &str = "Start-AI-Toolkit.bat";
/// Port the toolkit UI is pinned to when launched on Linux
pub const TOOLKIT_UI_PORT: u16 = 6006;

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    CommandFailed(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<SystemError> for ApiError {
    fn from(err: SystemError) -> Self {
        match err {
            SystemError::Unsupported(_) => ApiError::BadRequest(err.to_string()),
            SystemError::HttpError(_) => ApiError::BadGateway(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

/// Host operating system as reported by `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct Platform {
    pub os: String,
    pub is_linux: bool,
}

impl Platform {
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "linux" => "Linux".to_string(),
            "windows" => "Windows".to_string(),
            "macos" => "Darwin".to_string(),
            other => other.to_string(),
        };
        Self {
            is_linux: cfg!(target_os = "linux"),
            os,
        }
    }
}

/// Whether `config.probe_url` answers with 2xx or 3xx within the probe
/// timeout. `SOCKS5_PROXY` (host:port or a full URL) routes the probe
/// through a socks5 proxy.
pub async fn probe_connectivity(config: &NetworkConfig) -> bool {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.probe_timeout_secs))
        .redirect(reqwest::redirect::Policy::none());

    if let Ok(proxy) = std::env::var("SOCKS5_PROXY")
        && !proxy.trim().is_empty()
    {
        let proxy_url = if proxy.contains("://") {
            proxy.trim().to_string()
        } else {
            format!("socks5h://{}", proxy.trim())
        };
        match reqwest::Proxy::all(&proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => warn!("Ignoring invalid SOCKS5_PROXY {}: {}", proxy_url, e),
        }
    }

    let client = match builder.build() {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to build probe client: {}", e);
            return false;
        }
    };

    match client.get(&config.probe_url).send().await {
        Ok(response) => {
            let status = response.status();
            debug!("Connectivity probe {} -> {}", config.probe_url, status);
            status.is_success() || status.is_redirection()
        }
        Err(e) => {
            debug!("Connectivity probe {} failed: {}", config.probe_url, e);
            false
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GiteeRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateInfo {
    pub current_version: String,
    pub latest_version: String,
    pub release_name: String,
    pub release_notes: String,
    pub release_url: String,
}

/// `v1.2.3` / `V1.2.3` -> `1.2.3`
pub fn normalize_version(tag: &str) -> &str {
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}

fn update_info(repo: &str, current: &str, release: GiteeRelease) -> UpdateInfo {
    UpdateInfo {
        current_version: current.to_string(),
        latest_version: normalize_version(release.tag_name.trim()).to_string(),
        release_name: release.name,
        release_notes: release.body.unwrap_or_default(),
        release_url: release
            .html_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| format!("https://gitee.com/{}/releases", repo)),
    }
}

/// Latest published release of `repo` on gitee.
pub async fn check_update(
    repo: &str,
    current: &str,
    timeout_secs: u64,
) -> Result<UpdateInfo, SystemError> {
    let url = format!("https://gitee.com/api/v5/repos/{}/releases/latest", repo);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let release: GiteeRelease = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(update_info(repo, current, release))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorAction {
    Enable,
    Disable,
}

impl AcceleratorAction {
    fn command(&self) -> &'static str {
        match self {
            AcceleratorAction::Enable => "source /etc/network_turbo",
            AcceleratorAction::Disable => "unset http_proxy && unset https_proxy",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            AcceleratorAction::Enable => "enable",
            AcceleratorAction::Disable => "disable",
        }
    }
}

/// Run the hosting provider's network accelerator toggle through bash and
/// return its trimmed stdout.
pub async fn run_accelerator(
    platform: &Platform,
    action: AcceleratorAction,
    timeout_secs: u64,
) -> Result<String, SystemError> {
    if !platform.is_linux {
        return Err(SystemError::Unsupported(
            "The network accelerator is only available on Linux".to_string(),
        ));
    }

    let child = tokio::process::Command::new("bash")
        .arg("-c")
        .arg(action.command())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| SystemError::Timeout(timeout_secs))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(SystemError::CommandFailed(if stderr.is_empty() {
            "Command failed".to_string()
        } else {
            stderr
        }));
    }

    info!("Network accelerator {}", action.as_str());
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Start the training toolkit UI in the background without waiting for it.
pub fn launch_toolkit(platform: &Platform, base_dir: &Path) -> Result<String, SystemError> {
    if platform.is_linux {
        let command = format!(
            "cd {}/ai-toolkit/ui && sed -i 's/--port [0-9]*/--port {}/g' package.json && npm run build_and_start",
            base_dir.to_string_lossy(),
            TOOLKIT_UI_PORT
        );
        tokio::process::Command::new("bash")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .spawn()?;
        info!("Launched toolkit UI: {}", command);
        return Ok("Start command is running in the background".to_string());
    }

    let script = std::env::current_dir()?.join(WINDOWS_START_SCRIPT);
    if !script.exists() {
        return Err(SystemError::Unsupported(format!(
            "{} not found",
            WINDOWS_START_SCRIPT
        )));
    }
    tokio::process::Command::new("cmd")
        .arg("/C")
        .arg("start")
        .arg("")
        .arg(&script)
        .stdin(Stdio::null())
        .spawn()?;
    info!("Opened {:?}", script);
    Ok(format!("Tried to start {}", WINDOWS_START_SCRIPT))
}

pub async fn check_update_handler(
    State(app_state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let info = check_update(
        &app_state.config.app.update_repo,
        env!("CARGO_PKG_VERSION"),
        app_state.config.network.update_timeout_secs,
    )
    .await
    .map_err(|e| ApiError::Internal(format!("Update check failed: {}", e)))?;

    Ok(Json(json!({
        "ok": true,
        "current_version": info.current_version,
        "latest_version": info.latest_version,
        "release_name": info.release_name,
        "release_notes": info.release_notes,
        "release_url": info.release_url,
    })))
}

pub async fn run_start_handler(
    State(app_state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message = launch_toolkit(&app_state.platform, &app_state.config.workspace.base_dir)
        .map_err(|e| ApiError::Internal(format!("Launch failed: {}", e)))?;
    Ok(Json(json!({ "ok": true, "message": message })))
}

#[derive(Debug, Deserialize)]
pub struct AcceleratorRequest {
    pub action: String,
}

pub async fn accelerator_handler(
    State(app_state): State<AppState>,
    Json(request): Json<AcceleratorRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let action = match request.action.trim().to_lowercase().as_str() {
        "enable" => AcceleratorAction::Enable,
        "disable" => AcceleratorAction::Disable,
        _ => return Err(ApiError::BadRequest("Invalid action".to_string())),
    };

    let output = run_accelerator(
        &app_state.platform,
        action,
        app_state.config.network.accelerator_timeout_secs,
    )
    .await?;

    Ok(Json(json!({
        "ok": true,
        "message": "Command completed",
        "action": action.as_str(),
        "output": output,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("v0.0.6"), "0.0.6");
        assert_eq!(normalize_version("V1.2"), "1.2");
        assert_eq!(normalize_version("1.2"), "1.2");
    }

    #[test]
    fn test_update_info_defaults_release_url() {
        let release: GiteeRelease =
            serde_json::from_str(r#"{"tag_name": "v0.1.0", "name": "First", "body": null}"#)
                .unwrap();
        let info = update_info("me/tool", "0.0.5", release);
        assert_eq!(info.latest_version, "0.1.0");
        assert_eq!(info.release_notes, "");
        assert_eq!(info.release_url, "https://gitee.com/me/tool/releases");
    }

    #[tokio::test]
    async fn test_probe_reports_reachability() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/generate_204",
            axum::routing::get(|| async { axum::http::StatusCode::NO_CONTENT }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let reachable = NetworkConfig {
            probe_url: format!("http://{}/generate_204", addr),
            probe_timeout_secs: 2,
            ..NetworkConfig::default()
        };
        assert!(probe_connectivity(&reachable).await);

        let missing = NetworkConfig {
            probe_url: format!("http://{}/nothing", addr),
            probe_timeout_secs: 2,
            ..NetworkConfig::default()
        };
        assert!(!probe_connectivity(&missing).await);
    }

    #[tokio::test]
    async fn test_accelerator_requires_linux() {
        let windows = Platform {
            os: "Windows".to_string(),
            is_linux: false,
        };
        assert!(matches!(
            run_accelerator(&windows, AcceleratorAction::Enable, 1).await,
            Err(SystemError::Unsupported(_))
        ));
    }
}
