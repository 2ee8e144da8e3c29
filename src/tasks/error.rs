use thiserror::Error;

use super::TaskSection;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("A {0} task is already running")]
    AlreadyRunning(TaskSection),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Command failed with exit code {code}: {command}")]
    ProcessFailed { command: String, code: i32 },

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
