use super::{
    Bucket, Workspace, WorkspaceError, is_supported_image, sanitize_relative_path,
    strip_generated_suffix, unique_path,
};
use std::{
    collections::HashSet,
    io::{Cursor, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::{ZipArchive, ZipWriter, write::SimpleFileOptions};

impl Workspace {
    /// Deflated zip of every image in `bucket`, entries named by their path
    /// relative to the bucket root.
    pub fn export_bucket_zip(&self, bucket: Bucket) -> Result<Vec<u8>, WorkspaceError> {
        let mut writer = ArchiveWriter::new();
        for path in self.image_files(bucket) {
            if let Some(relative) = self.relative_string(bucket, &path) {
                writer.add_file(&relative, &path)?;
            }
        }
        info!("Exported {} files from bucket {}", writer.entries, bucket);
        writer.finish()
    }

    /// Three-folder training archive: `source/`, `generated/` with the
    /// `_genN` suffix stripped so each variant carries its source's name,
    /// and `tags/` with the caption files.
    pub fn export_ai_zip(&self) -> Result<Vec<u8>, WorkspaceError> {
        let mut writer = ArchiveWriter::new();

        for path in self.image_files(Bucket::Source) {
            if let Some(relative) = self.relative_string(Bucket::Source, &path) {
                writer.add_file(&format!("source/{}", relative), &path)?;
            }
        }

        for path in self.image_files(Bucket::Generated) {
            let Some(relative) = self.relative_string(Bucket::Generated, &path) else {
                continue;
            };
            let renamed = source_name_for(Path::new(&relative));
            writer.add_file(&format!("generated/{}", renamed), &path)?;
        }

        let tags_dir = self.bucket_dir(Bucket::Tags);
        for entry in WalkDir::new(tags_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Some(relative) = self.relative_string(Bucket::Tags, path) {
                writer.add_file(&format!("tags/{}", relative), path)?;
            }
        }

        info!("Exported AI archive with {} entries", writer.entries);
        writer.finish()
    }

    /// Extract the images of a zip archive into the source bucket.
    ///
    /// Member names are sanitized and resolved like any other bucket path.
    /// Non-images and members that would land outside the bucket are skipped,
    /// and existing files are never overwritten. Returns the saved relative paths.
    pub fn extract_zip_archive(&self, zip_path: &Path) -> Result<Vec<String>, WorkspaceError> {
        let file = std::fs::File::open(zip_path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut saved = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }

            let relative = sanitize_relative_path(entry.name());
            let supported = relative
                .file_name()
                .and_then(|n| n.to_str())
                .map(is_supported_image)
                .unwrap_or(false);
            if !supported {
                debug!("Skipping non-image archive member {}", entry.name());
                continue;
            }

            let resolved = match self.resolve(Bucket::Source, &relative.to_string_lossy()) {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Skipping archive member {}: {}", entry.name(), e);
                    continue;
                }
            };
            let destination = unique_path(&resolved);
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut target = std::fs::File::create(&destination)?;
            std::io::copy(&mut entry, &mut target)?;

            if let Some(relative) = self.relative_string(Bucket::Source, &destination) {
                saved.push(relative);
            }
        }

        info!("Extracted {} images from {:?}", saved.len(), zip_path);
        Ok(saved)
    }
}

/// Scratch file for an uploaded archive under the workspace `tmp/`
/// directory. Removed on drop, whichever way the upload ends.
pub(crate) struct UploadSpool {
    path: PathBuf,
}

impl UploadSpool {
    pub(crate) fn new(temp_dir: &Path) -> Self {
        Self {
            path: temp_dir.join(format!("{}.zip", uuid::Uuid::new_v4().simple())),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadSpool {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed upload spool {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove upload spool {:?}: {}", self.path, e),
        }
    }
}

/// `album/cat_gen2.png` -> `album/cat.png`
fn source_name_for(relative: &Path) -> String {
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = relative
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let file_name = format!("{}{}", strip_generated_suffix(&stem), extension);

    let renamed: PathBuf = relative.with_file_name(file_name);
    renamed.to_string_lossy().replace('\\', "/")
}

struct ArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
    seen_names: HashSet<String>,
    entries: usize,
}

impl ArchiveWriter {
    fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated),
            seen_names: HashSet::new(),
            entries: 0,
        }
    }

    /// Add `path` under `name`. Several `_genN` variants strip to the same
    /// name, so repeats get a `_1`, `_2`, ... suffix on the stem.
    fn add_file(&mut self, name: &str, path: &Path) -> Result<(), WorkspaceError> {
        let mut entry_name = name.to_string();
        let mut counter = 1u32;
        while self.seen_names.contains(&entry_name) {
            let candidate = Path::new(name);
            let stem = candidate
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let extension = candidate
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            entry_name = candidate
                .with_file_name(format!("{}_{}{}", stem, counter, extension))
                .to_string_lossy()
                .replace('\\', "/");
            counter += 1;
        }

        let contents = std::fs::read(path)?;
        self.zip.start_file(entry_name.as_str(), self.options)?;
        self.zip.write_all(&contents)?;
        self.seen_names.insert(entry_name);
        self.entries += 1;
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, WorkspaceError> {
        Ok(self.zip.finish()?.into_inner())
    }
}
