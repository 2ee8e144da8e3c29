use super::{
    Bucket, Workspace, WorkspaceError, generated_file_name, is_supported_image,
    normalize_relative_path, secure_file_name, unique_path,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

impl Workspace {
    /// Store an uploaded image under `relative` inside `bucket` without
    /// overwriting anything. Returns the saved relative path, or `None` when
    /// the file is not a supported image.
    pub fn save_upload(
        &self,
        bucket: Bucket,
        relative: &Path,
        bytes: &[u8],
    ) -> Result<Option<String>, WorkspaceError> {
        let supported = relative
            .file_name()
            .and_then(|n| n.to_str())
            .map(is_supported_image)
            .unwrap_or(false);
        if !supported {
            return Ok(None);
        }

        let wanted = self.resolve(bucket, &relative.to_string_lossy())?;
        let destination = unique_path(&wanted);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&destination, bytes)?;
        debug!("Saved upload to {:?}", destination);

        Ok(self.relative_string(bucket, &destination))
    }

    /// Store a manually produced variant for `target_stem` as
    /// `generated/{stem}_gen1{ext}`, numbered further when taken.
    pub fn save_generated_upload(
        &self,
        target_stem: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, WorkspaceError> {
        let stem = secure_file_name(target_stem);
        if stem.is_empty() {
            return Err(WorkspaceError::InvalidRequest(
                "A target image is required".to_string(),
            ));
        }
        if !is_supported_image(file_name) {
            return Err(WorkspaceError::UnsupportedFile(file_name.to_string()));
        }

        let extension = Path::new(file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let wanted = self.resolve(
            Bucket::Generated,
            &generated_file_name(&stem, 1, &extension),
        )?;
        let destination = unique_path(&wanted);
        std::fs::create_dir_all(self.bucket_dir(Bucket::Generated))?;
        std::fs::write(&destination, bytes)?;
        info!("Stored generated upload {:?}", destination);

        self.relative_string(Bucket::Generated, &destination)
            .ok_or_else(|| WorkspaceError::NotFound(destination.to_string_lossy().to_string()))
    }

    /// Write `text` to `tags/{stem}.txt` for each target that exists in the
    /// source bucket; empty `targets` means every source image. Returns the
    /// number of tag files written.
    pub fn write_tags(&self, targets: &[String], text: &str) -> usize {
        let sources: Vec<PathBuf> = if targets.is_empty() {
            self.image_files(Bucket::Source)
        } else {
            targets
                .iter()
                .filter_map(|relative| {
                    self.resolve(Bucket::Source, &normalize_relative_path(relative))
                        .ok()
                })
                .filter(|path| path.is_file())
                .collect()
        };

        let mut written = 0;
        for path in sources {
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            match self.write_tag_text(&stem, text) {
                Ok(()) => written += 1,
                Err(e) => warn!("Failed to write tags for {:?}: {}", path, e),
            }
        }
        info!("Wrote {} tag files", written);
        written
    }

    pub fn write_tag_text(&self, stem: &str, text: &str) -> Result<(), WorkspaceError> {
        let path = self.tag_file_path(stem);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Persist generated payloads for the image at `relative` in `bucket`.
    ///
    /// With `overwrite`, payload 1 atomically replaces the original and
    /// payloads 2.. go to `generated/<dir>/{stem}_gen{k}{ext}`. Without it,
    /// every payload k goes to `{stem}_gen{k}{ext}`. Existing `_genN` files
    /// are replaced.
    pub fn save_generation_outputs(
        &self,
        payloads: &[Vec<u8>],
        relative: &str,
        bucket: Bucket,
        overwrite: bool,
    ) -> Result<Vec<PathBuf>, WorkspaceError> {
        let original = self.resolve(bucket, relative)?;
        let relative_path = Path::new(relative);
        let stem = relative_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = relative_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let parent = relative_path
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        let mut saved = Vec::with_capacity(payloads.len());
        for (index, payload) in payloads.iter().enumerate() {
            let number = index + 1;
            let destination = if overwrite && number == 1 {
                original.clone()
            } else {
                let name = generated_file_name(&stem, number, &extension);
                let generated_relative = if parent.is_empty() {
                    name
                } else {
                    format!("{}/{}", parent, name)
                };
                self.resolve(Bucket::Generated, &generated_relative)?
            };

            write_atomic(&destination, payload)?;
            debug!("Saved generation output {:?}", destination);
            saved.push(destination);
        }

        Ok(saved)
    }
}

/// Write through a sibling temp file and rename it into place so readers
/// never see a partially written image.
fn write_atomic(destination: &Path, bytes: &[u8]) -> Result<(), WorkspaceError> {
    let parent = destination.parent().ok_or_else(|| {
        WorkspaceError::InvalidRequest(format!("No parent directory for {:?}", destination))
    })?;
    std::fs::create_dir_all(parent)?;

    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    std::fs::write(&temp, bytes)?;
    if let Err(e) = std::fs::rename(&temp, destination) {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageSizeConfig;
    use tempfile::TempDir;

    fn workspace(temp_dir: &TempDir) -> Workspace {
        let ws = Workspace::new(
            temp_dir.path().to_path_buf(),
            ImageSizeConfig {
                width: 300,
                height: 300,
            },
        );
        ws.ensure_layout().unwrap();
        ws
    }

    #[test]
    fn test_save_upload_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(&temp_dir);

        let first = ws
            .save_upload(Bucket::Source, Path::new("trip/cat.png"), b"1")
            .unwrap();
        let second = ws
            .save_upload(Bucket::Source, Path::new("trip/cat.png"), b"2")
            .unwrap();
        let skipped = ws
            .save_upload(Bucket::Source, Path::new("notes.txt"), b"3")
            .unwrap();

        assert_eq!(first.as_deref(), Some("trip/cat.png"));
        assert_eq!(second.as_deref(), Some("trip/cat_1.png"));
        assert_eq!(skipped, None);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_upload_refuses_linked_dir() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let ws = workspace(&temp_dir);
        std::os::unix::fs::symlink(outside.path(), ws.bucket_dir(Bucket::Source).join("link"))
            .unwrap();

        let result = ws.save_upload(Bucket::Source, Path::new("link/evil.png"), b"evil");
        assert!(matches!(result, Err(WorkspaceError::PathEscape(_))));
        assert!(!outside.path().join("evil.png").exists());
    }

    #[test]
    fn test_save_generated_upload() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(&temp_dir);

        assert_eq!(
            ws.save_generated_upload("cat", "result.PNG", b"a").unwrap(),
            "cat_gen1.png"
        );
        assert_eq!(
            ws.save_generated_upload("cat", "result.png", b"b").unwrap(),
            "cat_gen1_1.png"
        );
        assert!(matches!(
            ws.save_generated_upload("cat", "result.gif", b"c"),
            Err(WorkspaceError::UnsupportedFile(_))
        ));
    }

    #[test]
    fn test_write_tags() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(&temp_dir);
        std::fs::write(ws.bucket_dir(Bucket::Source).join("cat.png"), b"x").unwrap();
        std::fs::write(ws.bucket_dir(Bucket::Source).join("dog.png"), b"x").unwrap();

        let written = ws.write_tags(
            &["cat.png".to_string(), "missing.png".to_string()],
            "cat, fluffy",
        );
        assert_eq!(written, 1);
        assert_eq!(ws.read_tag_text("cat"), "cat, fluffy");
        assert_eq!(ws.read_tag_text("dog"), "");

        assert_eq!(ws.write_tags(&[], "pet"), 2);
        assert_eq!(ws.read_tag_text("dog"), "pet");
    }

    #[test]
    fn test_generation_outputs_with_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(&temp_dir);
        let original = ws.bucket_dir(Bucket::Source).join("album/cat.png");
        std::fs::create_dir_all(original.parent().unwrap()).unwrap();
        std::fs::write(&original, b"original").unwrap();

        let saved = ws
            .save_generation_outputs(
                &[b"first".to_vec(), b"second".to_vec()],
                "album/cat.png",
                Bucket::Source,
                true,
            )
            .unwrap();

        assert_eq!(saved.len(), 2);
        assert_eq!(std::fs::read(&original).unwrap(), b"first");
        let second = ws.bucket_dir(Bucket::Generated).join("album/cat_gen2.png");
        assert_eq!(saved[1], second);
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
        assert!(!ws.bucket_dir(Bucket::Generated).join("album/cat_gen1.png").exists());

        let leftovers: Vec<_> = std::fs::read_dir(original.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_generation_outputs_without_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(&temp_dir);
        let original = ws.bucket_dir(Bucket::Source).join("cat.jpg");
        std::fs::write(&original, b"original").unwrap();

        ws.save_generation_outputs(
            &[b"first".to_vec(), b"second".to_vec()],
            "cat.jpg",
            Bucket::Source,
            false,
        )
        .unwrap();

        let generated = ws.bucket_dir(Bucket::Generated);
        assert_eq!(std::fs::read(&original).unwrap(), b"original");
        assert_eq!(std::fs::read(generated.join("cat_gen1.jpg")).unwrap(), b"first");
        assert_eq!(std::fs::read(generated.join("cat_gen2.jpg")).unwrap(), b"second");

        ws.save_generation_outputs(&[b"again".to_vec()], "cat.jpg", Bucket::Source, false)
            .unwrap();
        assert_eq!(std::fs::read(generated.join("cat_gen1.jpg")).unwrap(), b"again");
    }
}
