use super::{Bucket, Workspace, WorkspaceError, is_supported_image};
use image::DynamicImage;
use std::path::PathBuf;
use tracing::debug;

impl Workspace {
    /// Cache location for the thumbnail of `relative` in `bucket`.
    pub fn thumbnail_path(&self, bucket: Bucket, relative: &str) -> Result<PathBuf, WorkspaceError> {
        // Resolve first so the cache path inherits the same traversal checks.
        let original = self.resolve(bucket, relative)?;
        let relative = original
            .strip_prefix(self.bucket_dir(bucket))
            .map_err(|_| WorkspaceError::PathEscape(relative.to_string()))?;
        Ok(self.thumbnail_dir().join(bucket.as_str()).join(relative))
    }

    /// Return a cached thumbnail, regenerating it when missing or older than
    /// the original. Images already within bounds are cached as-is.
    pub async fn ensure_thumbnail(
        &self,
        bucket: Bucket,
        relative: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let original = self.resolve(bucket, relative)?;
        if !is_supported_image(relative) {
            return Err(WorkspaceError::UnsupportedFile(relative.to_string()));
        }

        let original_modified = match tokio::fs::metadata(&original).await {
            Ok(metadata) if metadata.is_file() => metadata.modified()?,
            _ => return Err(WorkspaceError::NotFound(relative.to_string())),
        };

        let cached = self.thumbnail_path(bucket, relative)?;
        if let Ok(metadata) = tokio::fs::metadata(&cached).await
            && metadata.modified()? >= original_modified
        {
            return Ok(cached);
        }

        if let Some(parent) = cached.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let width = self.thumbnail_size.width;
        let height = self.thumbnail_size.height;
        let target = cached.clone();
        tokio::task::spawn_blocking(move || -> Result<(), WorkspaceError> {
            let img = image::ImageReader::open(&original)?
                .with_guessed_format()?
                .decode()?;

            let thumbnail = if img.width() > width || img.height() > height {
                img.thumbnail(width, height)
            } else {
                img
            };

            let is_jpeg = target
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
                .unwrap_or(false);
            let thumbnail = if is_jpeg {
                DynamicImage::ImageRgb8(thumbnail.to_rgb8())
            } else {
                thumbnail
            };

            thumbnail.save(&target)?;
            Ok(())
        })
        .await??;

        debug!("Generated thumbnail {:?}", cached);
        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageSizeConfig;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn workspace(temp_dir: &TempDir) -> Workspace {
        let ws = Workspace::new(
            temp_dir.path().to_path_buf(),
            ImageSizeConfig {
                width: 32,
                height: 32,
            },
        );
        ws.ensure_layout().unwrap();
        ws
    }

    #[tokio::test]
    async fn test_thumbnail_is_bounded_and_cached() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(&temp_dir);
        let original = ws.bucket_dir(Bucket::Source).join("album/wide.png");
        std::fs::create_dir_all(original.parent().unwrap()).unwrap();
        ImageBuffer::from_pixel(128, 64, Rgb([200u8, 10, 10]))
            .save(&original)
            .unwrap();

        let thumb = ws
            .ensure_thumbnail(Bucket::Source, "album/wide.png")
            .await
            .unwrap();
        assert_eq!(thumb, temp_dir.path().join("thumbnails/source/album/wide.png"));

        let img = image::open(&thumb).unwrap();
        assert!(img.width() <= 32 && img.height() <= 32);
        assert_eq!(img.width(), 32);

        let again = ws
            .ensure_thumbnail(Bucket::Source, "album/wide.png")
            .await
            .unwrap();
        assert_eq!(again, thumb);
    }

    #[tokio::test]
    async fn test_thumbnail_errors() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(&temp_dir);

        assert!(matches!(
            ws.ensure_thumbnail(Bucket::Source, "notes.txt").await,
            Err(WorkspaceError::UnsupportedFile(_))
        ));
        assert!(matches!(
            ws.ensure_thumbnail(Bucket::Source, "missing.png").await,
            Err(WorkspaceError::NotFound(_))
        ));
        assert!(matches!(
            ws.ensure_thumbnail(Bucket::Generated, "../source/x.png").await,
            Err(WorkspaceError::PathEscape(_))
        ));
    }
}
