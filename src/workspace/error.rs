use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Unknown bucket: {0}")]
    InvalidBucket(String),

    #[error("Path escapes bucket root: {0}")]
    PathEscape(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Background task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}
