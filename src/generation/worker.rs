use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

use super::{
    GenerationError, GenerationJob, GenerationQueue, GenerationSummary, GeneratorFactory,
    ImageGenerator, ImagePayload, ProviderError, QueueEntry,
};
use crate::{
    GenerationConfig,
    tasks::{TaskSection, TaskStatus, TaskStore, TaskUpdate, percent, timestamp},
    workspace::Workspace,
};

const SECTION: TaskSection = TaskSection::ImageGeneration;

enum Attempt {
    Saved(usize),
    Skipped(String),
    Failed(GenerationError),
}

/// Drains a generation batch one image at a time, publishing progress to
/// the `image_generation` task section.
pub struct GenerationWorker {
    store: Arc<TaskStore>,
    workspace: Arc<Workspace>,
    request_delay: Duration,
    max_attempts: u32,
}

impl GenerationWorker {
    pub fn new(store: Arc<TaskStore>, workspace: Arc<Workspace>, config: &GenerationConfig) -> Self {
        Self {
            store,
            workspace,
            request_delay: Duration::from_secs(config.request_delay_secs),
            max_attempts: config.max_attempts.max(1),
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    fn log(&self, line: impl AsRef<str>) {
        self.store
            .append_log(SECTION, format!("[{}] {}", timestamp(), line.as_ref()));
    }

    /// Build the provider for `job` and process the whole batch. An
    /// initialization failure marks the section as failed and nothing is
    /// processed.
    pub async fn run(
        &self,
        job: GenerationJob,
        factory: &dyn GeneratorFactory,
    ) -> Result<GenerationSummary, ProviderError> {
        self.store.update(
            SECTION,
            TaskUpdate::new()
                .status(TaskStatus::Running)
                .progress(0)
                .processed(0)
                .total(job.files.len())
                .message("initializing Vertex AI")
                .prompt(job.prompt.clone())
                .bucket(job.bucket.as_str()),
        );
        self.log(format!(
            "starting generation of {} images (project {}, location {}, overwrite {})",
            job.files.len(),
            job.credentials.project_id,
            job.credentials.location,
            job.overwrite
        ));

        let generator = match factory.create(&job.credentials).await {
            Ok(generator) => generator,
            Err(e) => {
                error!("Image provider initialization failed: {}", e);
                self.log(format!("initialization failed: {}", e));
                self.store.update(
                    SECTION,
                    TaskUpdate::new()
                        .status(TaskStatus::Error)
                        .message(format!("initialization failed: {}", e)),
                );
                return Err(e);
            }
        };

        Ok(self.process(&job, generator.as_ref()).await)
    }

    /// Process every queued image. Failures are retried from the tail of
    /// the queue until an image has used `max_attempts`.
    pub async fn process(
        &self,
        job: &GenerationJob,
        generator: &dyn ImageGenerator,
    ) -> GenerationSummary {
        let mut summary = GenerationSummary {
            total: job.files.len(),
            ..GenerationSummary::default()
        };
        let mut queue = GenerationQueue::from_paths(job.files.iter().cloned());
        info!(
            "Generating {} images with {} (delay {:?})",
            summary.total,
            generator.name(),
            self.request_delay
        );

        while let Some(mut entry) = queue.pop_front() {
            match self.attempt(job, &entry, generator).await {
                Attempt::Saved(count) => {
                    summary.processed += 1;
                    summary.succeeded += 1;
                    self.log(format!("{}: saved {} image(s)", entry.path, count));
                }
                Attempt::Skipped(reason) => {
                    summary.processed += 1;
                    summary.skipped += 1;
                    warn!("Skipping {}: {}", entry.path, reason);
                    self.log(format!("{}: skipped ({})", entry.path, reason));
                }
                Attempt::Failed(e) => {
                    entry.attempts += 1;
                    warn!(
                        "Generation failed for {} (attempt {}/{}): {}",
                        entry.path, entry.attempts, self.max_attempts, e
                    );
                    if entry.attempts < self.max_attempts {
                        self.log(format!(
                            "{}: attempt {} failed, requeued: {}",
                            entry.path, entry.attempts, e
                        ));
                        queue.push_back(entry);
                    } else {
                        summary.processed += 1;
                        summary.failed += 1;
                        self.log(format!(
                            "{}: permanently failed after {} attempts: {}",
                            entry.path, entry.attempts, e
                        ));
                    }
                }
            }

            if !queue.is_empty() && !self.request_delay.is_zero() {
                self.log(format!(
                    "waiting {}s before the next request",
                    self.request_delay.as_secs()
                ));
                tokio::time::sleep(self.request_delay).await;
            }

            self.store.update(
                SECTION,
                TaskUpdate::new()
                    .progress(percent(summary.processed, summary.total))
                    .processed(summary.processed)
                    .message(format!(
                        "processed {}/{}, {} in queue",
                        summary.processed,
                        summary.total,
                        queue.len()
                    )),
            );
        }

        self.store.update(
            SECTION,
            TaskUpdate::new()
                .status(TaskStatus::Success)
                .progress(100)
                .message("all images generated"),
        );
        self.log(format!(
            "finished: {} generated, {} skipped, {} failed",
            summary.succeeded, summary.skipped, summary.failed
        ));
        info!("Generation batch finished: {:?}", summary);
        summary
    }

    async fn attempt(
        &self,
        job: &GenerationJob,
        entry: &QueueEntry,
        generator: &dyn ImageGenerator,
    ) -> Attempt {
        let path = match self.workspace.resolve(job.bucket, &entry.path) {
            Ok(path) if path.is_file() => path,
            Ok(_) => return Attempt::Skipped("file not found".to_string()),
            Err(e) => return Attempt::Skipped(e.to_string()),
        };

        self.log(format!(
            "{}: generating (attempt {})",
            entry.path,
            entry.attempts + 1
        ));
        let image = match ImagePayload::from_path(&path).await {
            Ok(image) => image,
            Err(e) => return Attempt::Failed(ProviderError::from(e).into()),
        };

        let payloads = match generator.generate(&job.prompt, &image).await {
            Ok(payloads) if payloads.is_empty() => {
                return Attempt::Failed(ProviderError::EmptyResponse.into());
            }
            Ok(payloads) => payloads,
            Err(e) => return Attempt::Failed(e.into()),
        };

        match self.workspace.save_generation_outputs(
            &payloads,
            &entry.path,
            job.bucket,
            job.overwrite,
        ) {
            Ok(saved) => Attempt::Saved(saved.len()),
            Err(e) => Attempt::Failed(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ImageSizeConfig,
        generation::{DynImageGenerator, VertexCredentials},
        workspace::Bucket,
    };
    use async_trait::async_trait;
    use std::{collections::HashMap, sync::Mutex};
    use tempfile::TempDir;

    /// Returns the input with `-1` and `-2` appended; inputs whose bytes start
    /// with `fail` always error.
    #[derive(Default)]
    struct EchoGenerator {
        calls: Mutex<HashMap<Vec<u8>, usize>>,
    }

    impl EchoGenerator {
        fn calls_for(&self, bytes: &[u8]) -> usize {
            self.calls
                .lock()
                .unwrap()
                .get(bytes)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl ImageGenerator for EchoGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            image: &ImagePayload,
        ) -> Result<Vec<Vec<u8>>, ProviderError> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(image.bytes.clone())
                .or_default() += 1;
            if image.bytes.starts_with(b"fail") {
                return Err(ProviderError::Service("quota exceeded".to_string()));
            }
            Ok([b"-1", b"-2"]
                .iter()
                .map(|suffix| [image.bytes.as_slice(), suffix.as_slice()].concat())
                .collect())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct FailingFactory;

    #[async_trait]
    impl GeneratorFactory for FailingFactory {
        async fn create(
            &self,
            _credentials: &VertexCredentials,
        ) -> Result<DynImageGenerator, ProviderError> {
            Err(ProviderError::Configuration("bad key".to_string()))
        }
    }

    fn setup(temp_dir: &TempDir) -> (Arc<TaskStore>, Arc<Workspace>, GenerationWorker) {
        let workspace = Arc::new(Workspace::new(
            temp_dir.path().to_path_buf(),
            ImageSizeConfig {
                width: 300,
                height: 300,
            },
        ));
        workspace.ensure_layout().unwrap();
        let store = Arc::new(TaskStore::new());
        let worker = GenerationWorker::new(
            store.clone(),
            workspace.clone(),
            &GenerationConfig::default(),
        )
        .with_request_delay(Duration::ZERO);
        (store, workspace, worker)
    }

    fn job(files: &[&str], overwrite: bool) -> GenerationJob {
        GenerationJob {
            prompt: "restyle".to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            bucket: Bucket::Source,
            overwrite,
            credentials: VertexCredentials {
                key_path: "/tmp/key.json".into(),
                project_id: "p".to_string(),
                location: "us-central1".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_failing_item_retried_then_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let (store, workspace, worker) = setup(&temp_dir);
        let source = workspace.bucket_dir(Bucket::Source).to_path_buf();
        for i in 1..=5 {
            let body = if i == 3 { "fail-3".to_string() } else { format!("img-{}", i) };
            std::fs::write(source.join(format!("{}.png", i)), body).unwrap();
        }

        let generator = EchoGenerator::default();
        let summary = worker
            .process(
                &job(&["1.png", "2.png", "3.png", "4.png", "5.png"], false),
                &generator,
            )
            .await;

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(generator.calls_for(b"fail-3"), 3);
        assert_eq!(generator.calls_for(b"img-1"), 1);

        let state = store.snapshot(TaskSection::ImageGeneration);
        assert_eq!(state.status, TaskStatus::Success);
        assert_eq!(state.progress, 100);
        assert_eq!(state.processed, Some(5));
        assert_eq!(state.message, "all images generated");
        assert_eq!(
            state
                .log
                .iter()
                .filter(|l| l.contains("3.png: permanently failed"))
                .count(),
            1
        );

        let generated = workspace.bucket_dir(Bucket::Generated);
        assert_eq!(std::fs::read(generated.join("1_gen1.png")).unwrap(), b"img-1-1");
        assert_eq!(std::fs::read(generated.join("1_gen2.png")).unwrap(), b"img-1-2");
        assert!(!generated.join("3_gen1.png").exists());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_original() {
        let temp_dir = TempDir::new().unwrap();
        let (_store, workspace, worker) = setup(&temp_dir);
        let source = workspace.bucket_dir(Bucket::Source).to_path_buf();
        std::fs::create_dir_all(source.join("set")).unwrap();
        std::fs::write(source.join("set/a.jpg"), b"orig").unwrap();

        let generator = EchoGenerator::default();
        let summary = worker.process(&job(&["set/a.jpg"], true), &generator).await;
        assert_eq!(summary.succeeded, 1);

        assert_eq!(std::fs::read(source.join("set/a.jpg")).unwrap(), b"orig-1");
        let generated = workspace.bucket_dir(Bucket::Generated);
        assert_eq!(
            std::fs::read(generated.join("set/a_gen2.jpg")).unwrap(),
            b"orig-2"
        );
        assert!(!generated.join("set/a_gen1.jpg").exists());
    }

    #[tokio::test]
    async fn test_missing_and_escaping_paths_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _workspace, worker) = setup(&temp_dir);

        let generator = EchoGenerator::default();
        let summary = worker
            .process(&job(&["gone.png", "../outside.png"], false), &generator)
            .await;

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 2);
        assert!(generator.calls.lock().unwrap().is_empty());
        assert_eq!(
            store.snapshot(TaskSection::ImageGeneration).status,
            TaskStatus::Success
        );
    }

    #[tokio::test]
    async fn test_initialization_failure() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _workspace, worker) = setup(&temp_dir);

        let result = worker.run(job(&["a.png"], false), &FailingFactory).await;
        assert!(matches!(result, Err(ProviderError::Configuration(_))));

        let state = store.snapshot(TaskSection::ImageGeneration);
        assert_eq!(state.status, TaskStatus::Error);
        assert_eq!(state.progress, 0);
        assert_eq!(state.processed, Some(0));
        assert!(state.message.contains("bad key"));
    }
}
