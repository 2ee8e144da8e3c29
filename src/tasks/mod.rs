// Task module - progress state of the long-running background operations
mod error;
pub mod handlers;
pub mod pipeline;
pub mod pipelines;
mod types;

pub use error::TaskError;
pub use pipeline::PipelineRunner;
pub use types::*;

use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Log lines kept per section; older lines are evicted first.
pub const MAX_RECENT_LOG_LINES: usize = 400;

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

struct Sections {
    setup: TaskState,
    download: TaskState,
    image_generation: TaskState,
}

impl Sections {
    fn get_mut(&mut self, section: TaskSection) -> &mut TaskState {
        match section {
            TaskSection::Setup => &mut self.setup,
            TaskSection::Download => &mut self.download,
            TaskSection::ImageGeneration => &mut self.image_generation,
        }
    }

    fn get(&self, section: TaskSection) -> &TaskState {
        match section {
            TaskSection::Setup => &self.setup,
            TaskSection::Download => &self.download,
            TaskSection::ImageGeneration => &self.image_generation,
        }
    }
}

/// Shared progress store, one lock around all three sections.
///
/// Every method takes the lock for a short, non-blocking critical section;
/// callers never hold it across `.await` or process I/O.
pub struct TaskStore {
    sections: Mutex<Sections>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            sections: Mutex::new(Sections {
                setup: TaskState::initial(TaskSection::Setup),
                download: TaskState::initial(TaskSection::Download),
                image_generation: TaskState::initial(TaskSection::ImageGeneration),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sections> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.sections.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update(&self, section: TaskSection, update: TaskUpdate) {
        let mut sections = self.lock();
        let state = sections.get_mut(section);
        update.apply(state);
        state.last_updated = Some(timestamp());
    }

    pub fn append_log(&self, section: TaskSection, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "task_log", section = %section, "{}", line);

        let mut sections = self.lock();
        let state = sections.get_mut(section);
        state.log.push_back(line);
        while state.log.len() > MAX_RECENT_LOG_LINES {
            state.log.pop_front();
        }
        state.last_updated = Some(timestamp());
    }

    pub fn snapshot(&self, section: TaskSection) -> TaskState {
        self.lock().get(section).clone()
    }

    pub fn snapshot_all(&self) -> TaskSnapshot {
        let sections = self.lock();
        TaskSnapshot {
            setup: sections.setup.clone(),
            download: sections.download.clone(),
            image_generation: sections.image_generation.clone(),
        }
    }

    /// Atomically claim `section` for a new run.
    ///
    /// Fails with [`TaskError::AlreadyRunning`] while the section is queued or
    /// running. Otherwise the log is cleared, progress reset, the status set
    /// to queued and `update` applied on top.
    pub fn try_start(&self, section: TaskSection, update: TaskUpdate) -> Result<(), TaskError> {
        let mut sections = self.lock();
        let state = sections.get_mut(section);
        if state.status.is_active() {
            return Err(TaskError::AlreadyRunning(section));
        }

        TaskUpdate::new()
            .status(TaskStatus::Queued)
            .progress(0)
            .clear_log()
            .apply(state);
        update.apply(state);
        state.last_updated = Some(timestamp());
        Ok(())
    }
}
