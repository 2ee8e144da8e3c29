use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Bucket;

/// A supported image found under a bucket, recomputed on every scan.
#[derive(Debug, Clone, Serialize)]
pub struct MediaItem {
    pub name: String,
    pub path: String,
    pub relative_path: String,
    pub bucket: Bucket,
    pub size: u64,
    /// Modification time in seconds since the unix epoch
    pub modified: f64,
    pub url: String,
}

/// A source item with its derived generated variants and tag text.
#[derive(Debug, Clone, Serialize)]
pub struct AiPair {
    pub source: MediaItem,
    pub generated: Vec<MediaItem>,
    pub tags: String,
}

pub type BucketCounts = BTreeMap<Bucket, usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordAction {
    /// Narrow the working set to matching files
    Filter,
    /// Delete matching files and stop
    Delete,
    /// Delete non-matching files, rename the rest
    Keep,
    #[default]
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizeRequest {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_start_number")]
    pub start_number: u64,
    #[serde(default = "default_true")]
    pub apply_prefix: bool,
    #[serde(default = "default_true")]
    pub apply_sequence: bool,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub keyword_action: KeywordAction,
}

impl Default for OrganizeRequest {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            prefix: String::new(),
            start_number: 1,
            apply_prefix: true,
            apply_sequence: true,
            keyword: String::new(),
            keyword_action: KeywordAction::None,
        }
    }
}

fn default_start_number() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizeOutcome {
    pub message: String,
    pub renamed: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    /// Targets that resolved to an existing source image
    pub requested: usize,
    pub removed: usize,
}
