//! Top-level client
//!
//! Wires the HTTP gateway, provider registry, and media service together
//! behind one handle. Sessions created from a client share its provider
//! cache, so one daily refresh serves every conversation.

use crate::chat::ChatSession;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::gateway::{Gateway, HttpGateway};
use crate::media::{ImageOptions, MediaService, SpeechOptions};
use crate::providers::ProviderRegistry;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

/// Client for a multi-provider AI gateway
pub struct GatewayClient {
    config: Arc<ClientConfig>,
    gateway: Arc<dyn Gateway>,
    registry: Arc<ProviderRegistry>,
    media: MediaService,
}

impl GatewayClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::new(&config)?);
        Ok(Self::assemble(config, gateway))
    }

    /// Build a client over any gateway implementation
    pub fn with_gateway(config: ClientConfig, gateway: Arc<dyn Gateway>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, gateway))
    }

    fn assemble(config: ClientConfig, gateway: Arc<dyn Gateway>) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(ProviderRegistry::new(
            gateway.clone(),
            config.provider_cache_ttl(),
            config.preferred_providers.clone(),
        ));
        let media = MediaService::new(gateway.clone(), registry.clone(), config.clone());
        Self {
            config,
            gateway,
            registry,
            media,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a chat session; `model` defaults to the configured model
    pub fn new_chat(
        &self,
        model: Option<&str>,
        system_prompt: Option<&str>,
    ) -> ChatSession {
        self.new_chat_with_provider(model, system_prompt, None)
    }

    /// Start a chat session pinned to a provider hint
    pub fn new_chat_with_provider(
        &self,
        model: Option<&str>,
        system_prompt: Option<&str>,
        provider: Option<&str>,
    ) -> ChatSession {
        ChatSession::new(
            self.gateway.clone(),
            self.registry.clone(),
            self.config.clone(),
            model.unwrap_or(&self.config.default_model).to_string(),
            system_prompt.map(str::to_string),
            provider.map(str::to_string),
        )
    }

    pub async fn generate_image(&self, prompt: &str, opts: ImageOptions) -> Result<Vec<String>> {
        self.media.generate_image(prompt, opts).await
    }

    pub async fn transcribe_audio(
        &self,
        path: impl AsRef<Path>,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> Result<String> {
        self.media
            .transcribe_audio(path.as_ref(), model, provider)
            .await
    }

    pub async fn synthesize_speech(&self, input: &str, opts: SpeechOptions) -> Result<Bytes> {
        self.media.synthesize_speech(input, opts).await
    }

    /// Names of currently working providers, refreshing the cache if stale
    pub async fn working_providers(&self) -> Vec<String> {
        self.registry.ensure_fresh().await;
        self.registry.working_providers()
    }

    /// Force a provider cache refresh regardless of TTL
    pub async fn refresh_providers(&self) {
        self.registry.refresh().await;
    }
}
