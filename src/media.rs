//! Image and audio operations
//!
//! Stateless one-shot requests. Each goes through provider selection and
//! the shared retry executor; unlike chat there is no history or budget
//! to manage, so the executor's generic loop is enough.

use crate::config::ClientConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::{Gateway, ImageRequest, SpeechRequest, TranscriptionRequest};
use crate::metrics::METRICS;
use crate::providers::ProviderRegistry;
use crate::retry::{RetryExecutor, RetryPolicy};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const DEFAULT_SPEECH_MODEL: &str = "tts-1";
const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Options for image generation; unset fields fall back to configuration
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub size: Option<String>,
    pub quality: Option<String>,
}

/// Options for speech synthesis
#[derive(Debug, Clone, Default)]
pub struct SpeechOptions {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub voice: Option<String>,
}

pub(crate) struct MediaService {
    gateway: Arc<dyn Gateway>,
    registry: Arc<ProviderRegistry>,
    config: Arc<ClientConfig>,
}

impl MediaService {
    pub(crate) fn new(
        gateway: Arc<dyn Gateway>,
        registry: Arc<ProviderRegistry>,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            gateway,
            registry,
            config,
        }
    }

    fn executor(&self, operation: &'static str) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::from_config(&self.config), operation)
    }

    async fn select(&self, model: &str, hint: Option<&str>) -> Result<String> {
        self.registry.ensure_fresh().await;
        self.registry.select(model, hint)
    }

    /// Generate images for `prompt`; returns one URL per image
    pub(crate) async fn generate_image(
        &self,
        prompt: &str,
        opts: ImageOptions,
    ) -> Result<Vec<String>> {
        let model = opts
            .model
            .unwrap_or_else(|| self.config.image_model.clone());
        let provider = self.select(&model, opts.provider.as_deref()).await?;

        let request = ImageRequest {
            model,
            prompt: prompt.to_string(),
            provider: Some(provider.clone()),
            size: opts.size.unwrap_or_else(|| self.config.image_size.clone()),
            quality: opts
                .quality
                .unwrap_or_else(|| self.config.image_quality.clone()),
        };
        info!(model = %request.model, provider = %provider, "generating image");

        let gateway = self.gateway.clone();
        let timeout = self.config.timeout();
        let urls = self
            .executor("image")
            .run(move || {
                let gateway = gateway.clone();
                let request = request.clone();
                let provider = provider.clone();
                async move {
                    let urls =
                        match tokio::time::timeout(timeout, gateway.generate_image(request)).await
                        {
                            Ok(result) => result?,
                            Err(_) => return Err(GatewayError::Timeout(timeout)),
                        };
                    // Empty payloads are retried like any invalid response
                    if urls.is_empty() {
                        return Err(GatewayError::invalid_response(
                            provider,
                            "backend returned no images",
                        ));
                    }
                    Ok(urls)
                }
            })
            .await?;

        METRICS
            .gateway_requests
            .with_label_values(&["image", "success"])
            .inc();
        Ok(urls)
    }

    /// Transcribe an audio file to text
    pub(crate) async fn transcribe_audio(
        &self,
        path: &Path,
        model: Option<&str>,
        provider_hint: Option<&str>,
    ) -> Result<String> {
        let model = model.unwrap_or(DEFAULT_TRANSCRIPTION_MODEL).to_string();
        let provider = self.select(&model, provider_hint).await?;

        let audio = tokio::fs::read(path).await.map_err(|e| {
            GatewayError::Configuration(format!("cannot read audio file {}: {e}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let request = TranscriptionRequest {
            model,
            provider: Some(provider.clone()),
            file_name,
            audio,
        };
        info!(model = %request.model, provider = %provider, bytes = request.audio.len(), "transcribing audio");

        let gateway = self.gateway.clone();
        let timeout = self.config.timeout();
        let text = self
            .executor("transcription")
            .run(move || {
                let gateway = gateway.clone();
                let request = request.clone();
                let provider = provider.clone();
                async move {
                    let text =
                        match tokio::time::timeout(timeout, gateway.transcribe_audio(request))
                            .await
                        {
                            Ok(result) => result?,
                            Err(_) => return Err(GatewayError::Timeout(timeout)),
                        };
                    if text.trim().is_empty() {
                        return Err(GatewayError::invalid_response(
                            provider,
                            "backend returned an empty transcription",
                        ));
                    }
                    Ok(text)
                }
            })
            .await?;

        METRICS
            .gateway_requests
            .with_label_values(&["transcription", "success"])
            .inc();
        Ok(text)
    }

    /// Synthesize speech audio for `input`
    pub(crate) async fn synthesize_speech(
        &self,
        input: &str,
        opts: SpeechOptions,
    ) -> Result<Bytes> {
        let model = opts
            .model
            .unwrap_or_else(|| DEFAULT_SPEECH_MODEL.to_string());
        let provider = self.select(&model, opts.provider.as_deref()).await?;

        let request = SpeechRequest {
            model,
            input: input.to_string(),
            provider: Some(provider.clone()),
            voice: opts.voice,
        };
        info!(model = %request.model, provider = %provider, chars = input.len(), "synthesizing speech");

        let gateway = self.gateway.clone();
        let timeout = self.config.timeout();
        let audio = self
            .executor("speech")
            .run(move || {
                let gateway = gateway.clone();
                let request = request.clone();
                let provider = provider.clone();
                async move {
                    let audio =
                        match tokio::time::timeout(timeout, gateway.synthesize_speech(request))
                            .await
                        {
                            Ok(result) => result?,
                            Err(_) => return Err(GatewayError::Timeout(timeout)),
                        };
                    if audio.is_empty() {
                        return Err(GatewayError::invalid_response(
                            provider,
                            "backend returned no audio",
                        ));
                    }
                    Ok(audio)
                }
            })
            .await?;

        METRICS
            .gateway_requests
            .with_label_values(&["speech", "success"])
            .inc();
        Ok(audio)
    }
}
