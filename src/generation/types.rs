use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::workspace::Bucket;

/// Raw image bytes plus the MIME type providers expect alongside them.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        let bytes = tokio::fs::read(path).await?;
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("image/png")
            .to_string();
        Ok(Self { bytes, mime_type })
    }
}

/// Tags and an optional caption returned by a tagging model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub tags: Vec<String>,
    pub caption: Option<String>,
}

impl TagRecord {
    /// `caption, tag1, tag2`; blanks are dropped.
    pub fn to_tag_text(&self) -> String {
        self.caption
            .iter()
            .chain(self.tags.iter())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexCredentials {
    pub key_path: PathBuf,
    pub project_id: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub prompt: String,
    /// Relative paths inside `bucket`
    pub files: Vec<String>,
    pub bucket: Bucket,
    pub overwrite: bool,
    pub credentials: VertexCredentials,
}

/// Connection settings for an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatProviderConfig {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationSummary {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_text_puts_caption_first() {
        let record = TagRecord {
            tags: vec!["red hair".to_string(), " ".to_string(), "smile".to_string()],
            caption: Some("a woman outdoors".to_string()),
        };
        assert_eq!(record.to_tag_text(), "a woman outdoors, red hair, smile");

        let record = TagRecord {
            tags: vec!["cat".to_string()],
            caption: None,
        };
        assert_eq!(record.to_tag_text(), "cat");
    }

    #[tokio::test]
    async fn test_payload_mime_from_extension() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("a.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let payload = ImagePayload::from_path(&path).await.unwrap();
        assert_eq!(payload.mime_type, "image/jpeg");
        assert_eq!(payload.bytes, b"jpeg");
    }
}
