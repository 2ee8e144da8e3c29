use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    GenerationConfig,
    generation::{
        DynImageGenerator, GeneratorFactory, ImageGenerator, ImagePayload, ProviderError,
        VertexCredentials,
    },
};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_LIFETIME_SECS: u64 = 3600;
/// Tokens are refreshed this long before they actually expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialFile {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub(crate) enum Authenticator {
    ServiceAccount {
        client_email: String,
        key: EncodingKey,
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    /// Fixed bearer token for local test endpoints.
    #[cfg(test)]
    Static(String),
}

impl Authenticator {
    fn from_json(raw: &str) -> Result<Self, ProviderError> {
        let file: CredentialFile = serde_json::from_str(raw).map_err(|e| {
            ProviderError::Configuration(format!("Unrecognized credential file: {}", e))
        })?;

        Ok(match file {
            CredentialFile::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => Authenticator::ServiceAccount {
                key: EncodingKey::from_rsa_pem(private_key.as_bytes())?,
                client_email,
                token_uri,
            },
            CredentialFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => Authenticator::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            },
        })
    }

    async fn fetch_token(&self, client: &reqwest::Client) -> Result<CachedToken, ProviderError> {
        let request = match self {
            #[cfg(test)]
            Authenticator::Static(token) => {
                return Ok(CachedToken {
                    value: token.clone(),
                    refresh_at: None,
                });
            }
            Authenticator::ServiceAccount {
                client_email,
                key,
                token_uri,
            } => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let claims = JwtClaims {
                    iss: client_email,
                    scope: CLOUD_PLATFORM_SCOPE,
                    aud: token_uri,
                    iat: now,
                    exp: now + JWT_LIFETIME_SECS,
                };
                let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key)?;
                client.post(token_uri.as_str()).form(&[
                    ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                    ("assertion", assertion.as_str()),
                ])
            }
            Authenticator::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => client.post(DEFAULT_TOKEN_URI).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ]),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Configuration(format!(
                "Token request failed with status {}: {}",
                status,
                body.trim()
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(JWT_LIFETIME_SECS));
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Some(Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN)),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.refresh_at.is_none_or(|at| Instant::now() < at)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

/// Every inline image across all candidates, in response order.
fn extract_images(response: GenerateContentResponse) -> Result<Vec<Vec<u8>>, ProviderError> {
    let mut images = Vec::new();
    for candidate in response.candidates {
        if let Some(reason) = &candidate.finish_reason {
            debug!("Candidate finished with {}", reason);
        }
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if let Some(inline) = part.inline_data {
                let bytes = STANDARD
                    .decode(inline.data.trim())
                    .map_err(|e| ProviderError::Service(format!("Invalid image data: {}", e)))?;
                images.push(bytes);
            }
        }
    }
    Ok(images)
}

/// `https://{location}-aiplatform.googleapis.com`, or the bare host for the
/// `global` location.
pub fn api_base_for(location: &str) -> String {
    if location == "global" {
        "https://aiplatform.googleapis.com".to_string()
    } else {
        format!("https://{}-aiplatform.googleapis.com", location)
    }
}

pub struct VertexGenerator {
    client: reqwest::Client,
    endpoint: String,
    auth: Authenticator,
    token: Mutex<Option<CachedToken>>,
    config: GenerationConfig,
}

impl VertexGenerator {
    pub(crate) fn new(
        client: reqwest::Client,
        api_base: &str,
        credentials: &VertexCredentials,
        auth: Authenticator,
        config: GenerationConfig,
    ) -> Self {
        let endpoint = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            api_base.trim_end_matches('/'),
            credentials.project_id,
            credentials.location,
            config.model
        );

        Self {
            client,
            endpoint,
            auth,
            token: Mutex::new(None),
            config,
        }
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.is_fresh()
        {
            return Ok(token.value.clone());
        }

        let token = self.auth.fetch_token(&self.client).await?;
        debug!("Obtained new access token");
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}

#[async_trait]
impl ImageGenerator for VertexGenerator {
    async fn generate(
        &self,
        prompt: &str,
        image: &ImagePayload,
    ) -> Result<Vec<Vec<u8>>, ProviderError> {
        let token = self.access_token().await?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ProviderError::Configuration(format!("Invalid access token: {}", e)))?;

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    { "inlineData": { "mimeType": image.mime_type, "data": STANDARD.encode(&image.bytes) } }
                ]
            }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "topP": self.config.top_p,
                "topK": self.config.top_k,
                "responseModalities": ["TEXT", "IMAGE"]
            }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, bearer)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("generateContent failed with status {}", status);
            return Err(ProviderError::Service(format!(
                "Request failed with status {}: {}",
                status,
                text.trim()
            )));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        extract_images(parsed)
    }

    fn name(&self) -> &str {
        "vertex"
    }
}

/// Builds a [`VertexGenerator`] per batch from a credential file on disk.
pub struct VertexGeneratorFactory {
    config: GenerationConfig,
    api_base: Option<String>,
}

impl VertexGeneratorFactory {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            config,
            api_base: None,
        }
    }

    /// Send requests to `api_base` instead of the regional endpoint.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }
}

#[async_trait]
impl GeneratorFactory for VertexGeneratorFactory {
    async fn create(
        &self,
        credentials: &VertexCredentials,
    ) -> Result<DynImageGenerator, ProviderError> {
        let raw = tokio::fs::read_to_string(&credentials.key_path)
            .await
            .map_err(|e| {
                ProviderError::Configuration(format!(
                    "Cannot read credential file {}: {}",
                    credentials.key_path.display(),
                    e
                ))
            })?;
        let auth = Authenticator::from_json(&raw)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .build()?;

        let api_base = self
            .api_base
            .clone()
            .unwrap_or_else(|| api_base_for(&credentials.location));
        let generator = VertexGenerator::new(client, &api_base, credentials, auth, self.config.clone());

        // Fail the batch now rather than on the first image
        generator.access_token().await?;
        info!(
            "Vertex generator ready (project {}, location {}, model {})",
            credentials.project_id, credentials.location, self.config.model
        );
        Ok(Arc::new(generator))
    }
}
