use crate::{Config, workspace::Workspace};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartupCheckError {
    #[error("Failed to create directory {0}: {1}")]
    DirectoryCreationFailed(String, std::io::Error),

    #[error("Static files directory does not exist")]
    StaticDirectoryMissing,

    #[error("Required file missing: {0}")]
    RequiredFileMissing(String),
}

impl StartupCheckError {
    /// Whether the server cannot run without this check passing.
    pub fn is_critical(&self) -> bool {
        matches!(self, StartupCheckError::DirectoryCreationFailed(..))
    }
}

pub async fn perform_startup_checks(config: &Config) -> Result<(), Vec<StartupCheckError>> {
    let mut errors = Vec::new();

    info!("Performing startup checks...");

    let base_dir = &config.workspace.base_dir;
    if !base_dir.exists() {
        info!("Base directory does not exist, creating: {:?}", base_dir);
        if let Err(e) = tokio::fs::create_dir_all(base_dir).await {
            error!("Failed to create base directory {:?}: {}", base_dir, e);
            errors.push(StartupCheckError::DirectoryCreationFailed(
                base_dir.display().to_string(),
                e,
            ));
        }
    } else {
        info!("Base directory exists: {:?}", base_dir);
    }

    let workspace = Workspace::new(
        config.workspace.workspace_root(),
        config.workspace.thumbnail.clone(),
    );
    for dir in workspace.directories() {
        if dir.exists() {
            continue;
        }
        info!("Creating workspace directory: {:?}", dir);
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!("Failed to create workspace directory {:?}: {}", dir, e);
            errors.push(StartupCheckError::DirectoryCreationFailed(
                dir.display().to_string(),
                e,
            ));
        }
    }

    let static_dir = &config.static_files.directory;
    if !static_dir.exists() {
        warn!("Static files directory does not exist: {:?}", static_dir);
        errors.push(StartupCheckError::StaticDirectoryMissing);
    } else if !static_dir.join("index.html").exists() {
        warn!("index.html missing from {:?}", static_dir);
        errors.push(StartupCheckError::RequiredFileMissing(
            "index.html".to_string(),
        ));
    } else {
        info!("Static files directory exists: {:?}", static_dir);
    }

    if errors.is_empty() {
        info!("All startup checks passed");
        Ok(())
    } else {
        error!("Startup checks failed with {} errors", errors.len());
        Err(errors)
    }
}
