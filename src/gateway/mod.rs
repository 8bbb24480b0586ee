//! Contract with the multi-provider AI gateway service
//!
//! The core never introspects provider internals; everything it knows
//! about the backend comes through this trait.

pub mod http;
pub mod models;

pub use http::HttpGateway;
pub use models::{
    ChatRequest, ChatResponse, DeclaredModels, ImageRequest, Message, ModelInfo, ProviderInfo,
    Role, SpeechRequest, TranscriptionRequest,
};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Multi-provider AI gateway
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Chat completion, assembled into a single response
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Chat completion as a stream of text deltas
    async fn chat_completion_stream(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<String>>>;

    /// Generate one or more images, returned as URLs
    async fn generate_image(&self, request: ImageRequest) -> Result<Vec<String>>;

    /// Transcribe audio into text
    async fn transcribe_audio(&self, request: TranscriptionRequest) -> Result<String>;

    /// Synthesize speech from text
    async fn synthesize_speech(&self, request: SpeechRequest) -> Result<Bytes>;

    /// Enumerate the provider catalog
    async fn list_providers(&self) -> Result<Vec<ProviderInfo>>;

    /// Enumerate the model catalog
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}
