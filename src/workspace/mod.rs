// Workspace module - bucket layout, catalog and bulk file operations
mod archive;
mod catalog;
mod cleanup;
mod error;
pub mod handlers;
mod naming;
mod organize;
mod paths;
mod storage;
mod thumbnails;
mod types;

pub use error::WorkspaceError;
pub use naming::{
    derived_source_stem, generated_file_name, is_generated_from, strip_generated_suffix,
};
pub use paths::{normalize_relative_path, sanitize_relative_path, secure_file_name, unique_path};
pub use types::*;

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::info;

use crate::ImageSizeConfig;

pub const SUPPORTED_IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "bmp"];

/// One of the three top-level media directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Source,
    Generated,
    Tags,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Source, Bucket::Generated, Bucket::Tags];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Source => "source",
            Bucket::Generated => "generated",
            Bucket::Tags => "tags",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Bucket::Source),
            "generated" => Ok(Bucket::Generated),
            "tags" => Ok(Bucket::Tags),
            other => Err(WorkspaceError::InvalidBucket(other.to_string())),
        }
    }
}

pub fn is_supported_image(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// On-disk layout shared by every component that touches media files.
///
/// ```text
/// <root>/source/**           originals, sub-directories preserved
/// <root>/generated/**        mirrors source, files named {stem}_gen{N}.{ext}
/// <root>/tags/{stem}.txt     flat, one per source stem
/// <root>/tmp/                upload spool
/// <root>/thumbnails/<bucket>/**
/// ```
pub struct Workspace {
    root: PathBuf,
    source_dir: PathBuf,
    generated_dir: PathBuf,
    tags_dir: PathBuf,
    temp_dir: PathBuf,
    thumbnail_dir: PathBuf,
    thumbnail_size: ImageSizeConfig,
}

impl Workspace {
    pub fn new(root: PathBuf, thumbnail_size: ImageSizeConfig) -> Self {
        Self {
            source_dir: root.join("source"),
            generated_dir: root.join("generated"),
            tags_dir: root.join("tags"),
            temp_dir: root.join("tmp"),
            thumbnail_dir: root.join("thumbnails"),
            root,
            thumbnail_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_dir(&self, bucket: Bucket) -> &Path {
        match bucket {
            Bucket::Source => &self.source_dir,
            Bucket::Generated => &self.generated_dir,
            Bucket::Tags => &self.tags_dir,
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn thumbnail_dir(&self) -> &Path {
        &self.thumbnail_dir
    }

    /// Every directory the workspace expects, in creation order.
    pub fn directories(&self) -> Vec<&Path> {
        vec![
            self.root.as_path(),
            self.source_dir.as_path(),
            self.generated_dir.as_path(),
            self.tags_dir.as_path(),
            self.temp_dir.as_path(),
            self.thumbnail_dir.as_path(),
        ]
    }

    pub fn ensure_layout(&self) -> Result<(), WorkspaceError> {
        for dir in self.directories() {
            if !dir.exists() {
                info!("Creating workspace directory: {:?}", dir);
                std::fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}
