use super::{
    Bucket, DeleteOutcome, Workspace, WorkspaceError, is_generated_from, is_supported_image,
    normalize_relative_path,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

impl Workspace {
    /// Delete source images together with everything derived from them:
    /// `generated/<dir>/{stem}_genN.*`, `tags/{stem}.txt` and the cached
    /// thumbnail. Invalid or missing targets are skipped.
    pub fn delete_with_cascade(&self, targets: &[String]) -> DeleteOutcome {
        let paths: Vec<PathBuf> = targets
            .iter()
            .filter_map(|relative| {
                self.resolve(Bucket::Source, &normalize_relative_path(relative))
                    .ok()
            })
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(is_supported_image)
                        .unwrap_or(false)
            })
            .collect();

        let mut removed = 0;
        for path in &paths {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to delete {:?}: {}", path, e);
                continue;
            }
            removed += 1;
            self.remove_derived(path);
        }

        info!(
            "Deleted {} of {} requested source images",
            removed,
            paths.len()
        );
        DeleteOutcome {
            requested: paths.len(),
            removed,
        }
    }

    fn remove_derived(&self, source_path: &Path) {
        let Some(stem) = source_path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            return;
        };
        let Ok(relative) = source_path.strip_prefix(self.bucket_dir(Bucket::Source)) else {
            return;
        };

        let generated_dir = self
            .bucket_dir(Bucket::Generated)
            .join(relative.parent().unwrap_or(Path::new("")));
        if let Ok(entries) = std::fs::read_dir(&generated_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let derived = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|candidate| is_generated_from(candidate, &stem));
                if derived && path.is_file() {
                    debug!("Removing derived file {:?}", path);
                    remove_if_present(&path);
                }
            }
        }

        remove_if_present(&self.tag_file_path(&stem));
        remove_if_present(&self.thumbnail_dir().join(Bucket::Source.as_str()).join(relative));
    }

    /// Delete every source image, then wipe and recreate `generated`, `tags`
    /// and `thumbnails`, which only ever hold data derived from `source`.
    ///
    /// Returns the number of source images removed; nothing is touched when
    /// the source bucket has no images.
    pub fn clear_all(&self) -> Result<usize, WorkspaceError> {
        let paths = self.image_files(Bucket::Source);
        if paths.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for path in &paths {
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to delete {:?}: {}", path, e),
            }
        }

        for dir in [
            self.bucket_dir(Bucket::Generated),
            self.bucket_dir(Bucket::Tags),
            self.thumbnail_dir(),
        ] {
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
            std::fs::create_dir_all(dir)?;
        }

        info!("Cleared {} source images and all derived data", removed);
        Ok(removed)
    }
}

fn remove_if_present(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageSizeConfig;
    use tempfile::TempDir;

    fn populated() -> (TempDir, Workspace) {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(
            temp_dir.path().to_path_buf(),
            ImageSizeConfig {
                width: 300,
                height: 300,
            },
        );
        ws.ensure_layout().unwrap();

        let files = [
            "source/cat.png",
            "source/dog.png",
            "source/album/cat.png",
            "generated/cat_gen1.png",
            "generated/cat_gen2.png",
            "generated/dog_gen1.png",
            "generated/album/cat_gen1.png",
            "generated/cat_gen1_1.png",
            "generated/cat_generic_gen1.png",
            "tags/cat.txt",
            "tags/dog.txt",
            "thumbnails/source/cat.png",
            "thumbnails/source/dog.png",
        ];
        for file in files {
            let path = temp_dir.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, file).unwrap();
        }
        (temp_dir, ws)
    }

    #[test]
    fn test_delete_cascades_to_derived_files() {
        let (temp_dir, ws) = populated();
        let root = temp_dir.path();

        let outcome = ws.delete_with_cascade(&["cat.png".to_string()]);
        assert_eq!(
            outcome,
            DeleteOutcome {
                requested: 1,
                removed: 1
            }
        );

        for gone in [
            "source/cat.png",
            "generated/cat_gen1.png",
            "generated/cat_gen2.png",
            "generated/cat_gen1_1.png",
            "tags/cat.txt",
            "thumbnails/source/cat.png",
        ] {
            assert!(!root.join(gone).exists(), "{} should be deleted", gone);
        }

        for kept in [
            "source/dog.png",
            "generated/dog_gen1.png",
            "tags/dog.txt",
            "thumbnails/source/dog.png",
            "source/album/cat.png",
            "generated/album/cat_gen1.png",
            "generated/cat_generic_gen1.png",
        ] {
            assert!(root.join(kept).exists(), "{} should be kept", kept);
        }
    }

    #[test]
    fn test_delete_skips_invalid_targets() {
        let (_temp_dir, ws) = populated();

        let outcome = ws.delete_with_cascade(&[
            "missing.png".to_string(),
            "../tags/cat.txt".to_string(),
            "album/cat.png".to_string(),
        ]);
        assert_eq!(outcome.requested, 1);
        assert_eq!(outcome.removed, 1);
    }

    #[test]
    fn test_clear_all_wipes_derived_directories() {
        let (temp_dir, ws) = populated();
        let root = temp_dir.path();

        let removed = ws.clear_all().unwrap();
        assert_eq!(removed, 3);

        assert!(ws.list_items(Bucket::Source, None).is_empty());
        for dir in ["generated", "tags", "thumbnails"] {
            let path = root.join(dir);
            assert!(path.is_dir());
            assert_eq!(std::fs::read_dir(path).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_clear_all_on_empty_source_is_noop() {
        let (temp_dir, ws) = populated();
        for file in ["cat.png", "dog.png", "album/cat.png"] {
            std::fs::remove_file(ws.bucket_dir(Bucket::Source).join(file)).unwrap();
        }

        assert_eq!(ws.clear_all().unwrap(), 0);
        assert!(temp_dir.path().join("tags/dog.txt").exists());
    }
}
