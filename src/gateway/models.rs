//! Wire and data types shared with the gateway service

use serde::{Deserialize, Serialize};

/// Message role within a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation
///
/// Invariant: a history contains at most one system message, and if
/// present it is element 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Image URLs or base64 payloads for vision-capable models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: None,
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }
}

/// Model support declared by a provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DeclaredModels {
    One(String),
    Many(Vec<String>),
}

impl DeclaredModels {
    /// Whether the provider explicitly declares support for `model`.
    /// Undeclared support is treated as "no" during candidate filtering.
    pub fn supports(&self, model: &str) -> bool {
        match self {
            Self::One(name) => name == model,
            Self::Many(names) => names.iter().any(|n| n == model),
        }
    }
}

/// Provider catalog entry as reported by the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    #[serde(default)]
    pub working: bool,
    #[serde(default)]
    pub models: Option<DeclaredModels>,
}

/// Model catalog entry as reported by the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub best_provider: Option<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub context_length: Option<usize>,
    #[serde(default)]
    pub supports_vision: bool,
}

/// Chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub web_search: bool,
    pub stream: bool,
}

/// Assembled chat completion response
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub provider: Option<String>,
}

/// Image generation request
#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub size: String,
    pub quality: String,
}

/// Audio transcription request
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub model: String,
    pub provider: Option<String>,
    pub file_name: String,
    pub audio: Vec<u8>,
}

/// Speech synthesis request
#[derive(Debug, Clone, Serialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}
