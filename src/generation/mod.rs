// Generation module - AI provider seams, batch worker and tagging
mod error;
pub mod handlers;
pub mod providers;
mod queue;
pub mod tagging;
mod types;
mod worker;

pub use error::*;
pub use queue::*;
pub use types::*;
pub use worker::*;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Image-to-image model that turns one reference image into zero or more
/// generated images.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        image: &ImagePayload,
    ) -> Result<Vec<Vec<u8>>, ProviderError>;
    fn name(&self) -> &str;
}

pub type DynImageGenerator = Arc<dyn ImageGenerator>;

/// Vision model that describes an image as tags.
#[async_trait]
pub trait ImageTagger: Send + Sync {
    async fn classify(&self, prompt: &str, image: &ImagePayload)
    -> Result<TagRecord, ProviderError>;
    async fn test_connection(&self) -> Result<String, ProviderError>;
    fn name(&self) -> &str;
}

pub type DynImageTagger = Arc<dyn ImageTagger>;

/// Builds a generator for one batch. Credential loading happens here so a
/// bad key file fails the batch before any image is touched.
#[async_trait]
pub trait GeneratorFactory: Send + Sync {
    async fn create(
        &self,
        credentials: &VertexCredentials,
    ) -> Result<DynImageGenerator, ProviderError>;
}

pub type DynGeneratorFactory = Arc<dyn GeneratorFactory>;

pub fn create_tagger(
    config: &ChatProviderConfig,
    timeout: Duration,
) -> Result<DynImageTagger, ProviderError> {
    Ok(Arc::new(providers::chat::ChatTagger::new(config, timeout)?))
}
