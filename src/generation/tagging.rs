use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use super::{ImagePayload, ImageTagger};
use crate::workspace::{Bucket, Workspace};

/// Result of tagging one source image.
#[derive(Debug, Clone, Serialize)]
pub struct CleanItem {
    pub path: String,
    pub ok: bool,
    pub tags: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CleanItem {
    fn failed(path: &str, error: impl ToString) -> Self {
        Self {
            path: path.to_string(),
            ok: false,
            tags: String::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Classify each source image in turn and write its tag file. A failing
/// image is reported in its item and the rest still run.
pub async fn clean_images(
    workspace: &Workspace,
    tagger: &dyn ImageTagger,
    targets: &[String],
    prompt: &str,
) -> Vec<CleanItem> {
    let mut items = Vec::with_capacity(targets.len());

    for relative in targets {
        let path = match workspace.resolve(Bucket::Source, relative) {
            Ok(path) => path,
            Err(e) => {
                items.push(CleanItem::failed(relative, e));
                continue;
            }
        };
        let image = match ImagePayload::from_path(&path).await {
            Ok(image) => image,
            Err(e) => {
                items.push(CleanItem::failed(relative, e));
                continue;
            }
        };

        let record = match tagger.classify(prompt, &image).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Tagging {} with {} failed: {}", relative, tagger.name(), e);
                items.push(CleanItem::failed(relative, e));
                continue;
            }
        };

        let text = record.to_tag_text();
        let stem = Path::new(relative)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        match workspace.write_tag_text(&stem, &text) {
            Ok(()) => items.push(CleanItem {
                path: relative.clone(),
                ok: true,
                tags: text,
                error: None,
            }),
            Err(e) => items.push(CleanItem::failed(relative, e)),
        }
    }

    info!(
        "Tagged {}/{} images with {}",
        items.iter().filter(|item| item.ok).count(),
        items.len(),
        tagger.name()
    );
    items
}
