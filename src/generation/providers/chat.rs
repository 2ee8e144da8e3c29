use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::generation::{ChatProviderConfig, ImagePayload, ImageTagger, ProviderError, TagRecord};

/// Base URL for a named preset; `custom` and unknown names have none.
pub fn preset_base_url(provider: &str) -> Option<&'static str> {
    match provider.trim().to_lowercase().as_str() {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "google" | "gemini" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "siliconflow" => Some("https://api.siliconflow.cn/v1"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Tags from a model reply. Accepts bare JSON, JSON wrapped in code fences
/// or prose around a single object, and tags given as a list or as one
/// comma-separated string.
pub fn parse_tag_record(reply: &str) -> Result<TagRecord, ProviderError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let object = match (start, end) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            return Err(ProviderError::Service(format!(
                "Reply is not JSON: {}",
                reply.trim()
            )));
        }
    };

    let value: Value = serde_json::from_str(object)?;
    let tags = match value.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    let caption = value
        .get("caption")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if tags.is_empty() && caption.is_none() {
        return Err(ProviderError::Service(
            "Reply contained neither tags nor a caption".to_string(),
        ));
    }
    Ok(TagRecord { tags, caption })
}

/// Vision tagger speaking the OpenAI-compatible chat completions protocol.
pub struct ChatTagger {
    client: reqwest::Client,
    base_url: String,
    model: String,
    provider: String,
}

impl ChatTagger {
    pub fn new(config: &ChatProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        if config.model.trim().is_empty() {
            return Err(ProviderError::Configuration("Model is required".to_string()));
        }
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::Configuration("API key is required".to_string()));
        }

        let base_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .or_else(|| preset_base_url(&config.provider))
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "Provider {:?} needs a base_url",
                    config.provider
                ))
            })?
            .trim_end_matches('/')
            .to_string();
        let parsed = url::Url::parse(&base_url)
            .map_err(|e| ProviderError::Configuration(format!("Invalid base_url {}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::Configuration(format!(
                "base_url must be http or https: {}",
                base_url
            )));
        }

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
            .map_err(|e| ProviderError::Configuration(format!("Invalid API key: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url,
            model: config.model.trim().to_string(),
            provider: if config.provider.trim().is_empty() {
                "custom".to_string()
            } else {
                config.provider.trim().to_lowercase()
            },
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn complete(&self, body: Value) -> Result<ChatCompletion, ProviderError> {
        let endpoint = format!("{}/chat/completions", self.base_url);
        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Service(format!(
                "Request failed with status {} at {}: {}",
                status,
                endpoint,
                text.trim()
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ImageTagger for ChatTagger {
    async fn classify(
        &self,
        prompt: &str,
        image: &ImagePayload,
    ) -> Result<TagRecord, ProviderError> {
        let data_url = format!(
            "data:{};base64,{}",
            image.mime_type,
            STANDARD.encode(&image.bytes)
        );
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }]
        });

        let reply = self
            .complete(body)
            .await?
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Service("Empty completion".to_string()))?;
        debug!("Tagger reply: {}", reply);
        parse_tag_record(&reply)
    }

    async fn test_connection(&self) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "ping" }]
        });
        self.complete(body).await?;
        Ok(format!("Connected to {} ({})", self.provider, self.model))
    }

    fn name(&self) -> &str {
        &self.provider
    }
}
