use super::{
    AiPair, Bucket, BucketCounts, MediaItem, Workspace, derived_source_stem, is_supported_image,
    normalize_relative_path,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};
use tracing::debug;
use walkdir::WalkDir;

impl Workspace {
    /// Every supported image under `bucket`, most recently modified first.
    ///
    /// `keyword` is matched case-insensitively against the relative path.
    pub fn list_items(&self, bucket: Bucket, keyword: Option<&str>) -> Vec<MediaItem> {
        let root = self.bucket_dir(bucket);
        if !root.exists() {
            return Vec::new();
        }

        let keyword = keyword
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty());

        let mut items = Vec::new();
        for path in self.image_files(bucket) {
            let Some(relative) = self.relative_string(bucket, &path) else {
                continue;
            };

            if let Some(keyword) = &keyword
                && !relative.to_lowercase().contains(keyword.as_str())
            {
                continue;
            }

            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            let modified = metadata
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);

            items.push(MediaItem {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                path: relative.clone(),
                url: media_url(bucket, &relative),
                relative_path: relative,
                bucket,
                size: metadata.len(),
                modified,
            });
        }

        items.sort_by(|a, b| b.modified.total_cmp(&a.modified));
        debug!("Listed {} items in bucket {}", items.len(), bucket);
        items
    }

    /// Image count per bucket; a full scan on every call.
    pub fn counts_by_bucket(&self) -> BucketCounts {
        Bucket::ALL
            .iter()
            .map(|bucket| (*bucket, self.image_files(*bucket).len()))
            .collect()
    }

    /// Pair each source item with its `_genN` variants and its tag text.
    pub fn pair_source_with_derived(&self, keyword: Option<&str>) -> Vec<AiPair> {
        let sources = self.list_items(Bucket::Source, keyword);

        let mut derived: HashMap<String, Vec<MediaItem>> = HashMap::new();
        for item in self.list_items(Bucket::Generated, None) {
            let stem = file_stem(&item.relative_path);
            if let Some(source_stem) = derived_source_stem(&stem) {
                derived
                    .entry(source_stem.to_string())
                    .or_default()
                    .push(item);
            }
        }

        sources
            .into_iter()
            .map(|source| {
                let stem = file_stem(&source.relative_path);
                let mut generated = derived.get(&stem).cloned().unwrap_or_default();
                generated.sort_by(|a, b| b.modified.total_cmp(&a.modified));
                let tags = self.read_tag_text(&stem);

                AiPair {
                    source,
                    generated,
                    tags,
                }
            })
            .collect()
    }

    /// Normalized relative paths of the requested images that exist in
    /// `bucket`; invalid or missing targets are dropped. Empty `targets`
    /// selects every image in the bucket.
    pub fn select_images(&self, bucket: Bucket, targets: &[String]) -> Vec<String> {
        if targets.is_empty() {
            return self
                .list_items(bucket, None)
                .into_iter()
                .map(|item| item.relative_path)
                .collect();
        }

        targets
            .iter()
            .map(|relative| normalize_relative_path(relative))
            .filter(|relative| {
                self.resolve(bucket, relative)
                    .map(|path| path.is_file() && is_supported_image(relative))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Tag text for a source stem; empty when absent or unreadable.
    pub fn read_tag_text(&self, stem: &str) -> String {
        std::fs::read_to_string(self.tag_file_path(stem)).unwrap_or_default()
    }

    pub(crate) fn tag_file_path(&self, stem: &str) -> PathBuf {
        self.bucket_dir(Bucket::Tags).join(format!("{}.txt", stem))
    }

    /// Recursive list of supported image files in a bucket.
    pub(crate) fn image_files(&self, bucket: Bucket) -> Vec<PathBuf> {
        WalkDir::new(self.bucket_dir(bucket))
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(is_supported_image)
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect()
    }
}

fn file_stem(relative: &str) -> String {
    Path::new(relative)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn media_url(bucket: Bucket, relative: &str) -> String {
    let encoded = relative
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");

    match bucket {
        Bucket::Source => format!("/uploads/{}", encoded),
        other => format!("/media/{}/{}", other, encoded),
    }
}
