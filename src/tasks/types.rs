use serde::Serialize;
use std::{collections::VecDeque, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSection {
    Setup,
    Download,
    ImageGeneration,
}

impl TaskSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSection::Setup => "setup",
            TaskSection::Download => "download",
            TaskSection::ImageGeneration => "image_generation",
        }
    }
}

impl fmt::Display for TaskSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Queued,
    Running,
    Success,
    Error,
}

impl TaskStatus {
    /// Queued counts as active: the worker has been handed the job but has
    /// not flipped the status yet.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

/// Progress record of one background operation, as shown by `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskState {
    pub status: TaskStatus,
    /// 0..=100
    pub progress: u8,
    pub message: String,
    pub log: VecDeque<String>,
    pub last_updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

impl TaskState {
    pub fn initial(section: TaskSection) -> Self {
        let mut state = Self {
            status: TaskStatus::Idle,
            progress: 0,
            message: String::new(),
            log: VecDeque::new(),
            last_updated: None,
            model: None,
            source: None,
            prompt: None,
            total: None,
            processed: None,
            bucket: None,
        };

        match section {
            TaskSection::Setup => state.message = "Not started yet".to_string(),
            TaskSection::Download => state.message = "Waiting for a download".to_string(),
            TaskSection::ImageGeneration => {
                state.message = "Waiting for a generation task".to_string();
                state.prompt = Some(String::new());
                state.total = Some(0);
                state.processed = Some(0);
                state.bucket = Some("source".to_string());
            }
        }
        state
    }
}

/// Partial update merged into a [`TaskState`]; unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub model: Option<String>,
    pub source: Option<String>,
    pub prompt: Option<String>,
    pub total: Option<usize>,
    pub processed: Option<usize>,
    pub bucket: Option<String>,
    pub clear_log: bool,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    pub fn processed(mut self, processed: usize) -> Self {
        self.processed = Some(processed);
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn clear_log(mut self) -> Self {
        self.clear_log = true;
        self
    }

    pub(crate) fn apply(self, state: &mut TaskState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(progress) = self.progress {
            state.progress = progress;
        }
        if let Some(message) = self.message {
            state.message = message;
        }
        if self.model.is_some() {
            state.model = self.model;
        }
        if self.source.is_some() {
            state.source = self.source;
        }
        if self.prompt.is_some() {
            state.prompt = self.prompt;
        }
        if self.total.is_some() {
            state.total = self.total;
        }
        if self.processed.is_some() {
            state.processed = self.processed;
        }
        if self.bucket.is_some() {
            state.bucket = self.bucket;
        }
        if self.clear_log {
            state.log.clear();
        }
    }
}

/// Integer percentage of `done` out of `total`, 0 when `total` is 0.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Deep copy of all three sections.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub setup: TaskState,
    pub download: TaskState,
    pub image_generation: TaskState,
}
