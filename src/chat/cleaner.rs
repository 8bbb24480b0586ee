//! Response artifact cleaning
//!
//! Providers occasionally inject ads, disclaimers, or metadata into
//! responses. Cleaning is strictly best-effort: a cleaner returns the
//! original text whenever it cannot do better, and never fails the
//! request that produced the text.

use crate::error::Result;
use crate::gateway::{ChatRequest, Gateway, Message};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Strategy for removing provider artifacts from a response
#[async_trait]
pub trait ResponseCleaner: Send + Sync {
    /// Clean `text`, returning it unchanged when nothing applies
    async fn clean(&self, text: &str) -> String;
}

static ARTIFACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)as an ai language model,\s*i cannot.*",
        r"(?is)i am not able to.*",
        r"(?is)i'm just an ai and do not have.*",
        r"(?is)disclaimer:.*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid artifact pattern"))
    .collect()
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("invalid pattern"));
static MULTI_NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("invalid pattern"));

/// Rule-based cleaner: strips known disclaimer patterns and normalizes
/// whitespace. Never removes anything it does not recognize.
#[derive(Default)]
pub struct RuleBasedCleaner;

#[async_trait]
impl ResponseCleaner for RuleBasedCleaner {
    async fn clean(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut cleaned = text.to_string();
        for pattern in ARTIFACT_PATTERNS.iter() {
            cleaned = pattern.replace_all(&cleaned, "").trim().to_string();
        }

        let cleaned = MULTI_SPACE.replace_all(&cleaned, " ");
        let cleaned = MULTI_NEWLINE.replace_all(&cleaned, "\n\n");
        cleaned.trim().to_string()
    }
}

const JUDGMENT_SYSTEM_PROMPT: &str = "You are a text cleaning expert. Decide whether the given \
text contains provider-injected artifacts, ads, disclaimers, or metadata that the user did not \
ask for. Respond with only a JSON object of the form \
{\"has_artifact\": bool, \"cleaned_text\": string}, where cleaned_text is the core message with \
all artifacts removed. Do not add commentary.";

/// Structured judgment returned by the cleaning model
#[derive(Debug, Deserialize)]
struct CleanJudgment {
    has_artifact: bool,
    cleaned_text: String,
}

/// Model-based cleaner: asks a secondary model for a structured judgment
/// and applies it only when an artifact was actually found. Degrades to
/// rule-based cleaning when the secondary call fails, and to the original
/// text when the judgment is malformed.
pub struct ModelCleaner {
    gateway: Arc<dyn Gateway>,
    model: String,
    fallback: RuleBasedCleaner,
}

impl ModelCleaner {
    pub fn new(gateway: Arc<dyn Gateway>, model: String) -> Self {
        Self {
            gateway,
            model,
            fallback: RuleBasedCleaner,
        }
    }

    async fn judge(&self, text: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(JUDGMENT_SYSTEM_PROMPT),
                Message::user(text),
            ],
            provider: None,
            web_search: false,
            stream: false,
        };

        let response = self.gateway.chat_completion(request).await?;
        Ok(response.content)
    }
}

#[async_trait]
impl ResponseCleaner for ModelCleaner {
    async fn clean(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let raw = match self.judge(text).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "cleaning model call failed, using rule-based cleaner");
                return self.fallback.clean(text).await;
            }
        };

        match serde_json::from_str::<CleanJudgment>(raw.trim()) {
            Ok(judgment) if judgment.has_artifact => {
                debug!("cleaning model removed an artifact");
                judgment.cleaned_text
            }
            Ok(_) => text.to_string(),
            Err(e) => {
                warn!(error = %e, "malformed cleaning judgment, keeping original text");
                text.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::models::*;
    use bytes::Bytes;
    use futures::stream::BoxStream;

    #[tokio::test]
    async fn test_rule_based_strips_disclaimer() {
        let cleaner = RuleBasedCleaner;
        let cleaned = cleaner
            .clean("Here is your answer.\n\nDisclaimer: I may be wrong about everything.")
            .await;
        assert_eq!(cleaned, "Here is your answer.");
    }

    #[tokio::test]
    async fn test_rule_based_normalizes_whitespace() {
        let cleaner = RuleBasedCleaner;
        let cleaned = cleaner.clean("too    many  spaces\n\n\n\nand newlines").await;
        assert_eq!(cleaned, "too many spaces\n\nand newlines");
    }

    #[tokio::test]
    async fn test_rule_based_leaves_clean_text_alone() {
        let cleaner = RuleBasedCleaner;
        assert_eq!(cleaner.clean("plain answer").await, "plain answer");
    }

    /// Gateway stub answering chat completions with a fixed payload
    struct FixedGateway {
        reply: Result<String>,
    }

    #[async_trait]
    impl Gateway for FixedGateway {
        async fn chat_completion(&self, _: ChatRequest) -> Result<ChatResponse> {
            match &self.reply {
                Ok(content) => Ok(ChatResponse {
                    content: content.clone(),
                    provider: None,
                }),
                Err(_) => Err(GatewayError::provider("Stub", "down")),
            }
        }
        async fn chat_completion_stream(
            &self,
            _: ChatRequest,
        ) -> Result<BoxStream<'static, Result<String>>> {
            unimplemented!()
        }
        async fn generate_image(&self, _: ImageRequest) -> Result<Vec<String>> {
            unimplemented!()
        }
        async fn transcribe_audio(&self, _: TranscriptionRequest) -> Result<String> {
            unimplemented!()
        }
        async fn synthesize_speech(&self, _: SpeechRequest) -> Result<Bytes> {
            unimplemented!()
        }
        async fn list_providers(&self) -> Result<Vec<ProviderInfo>> {
            Ok(vec![])
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
    }

    fn model_cleaner(reply: Result<String>) -> ModelCleaner {
        ModelCleaner::new(Arc::new(FixedGateway { reply }), "gpt-4o".to_string())
    }

    #[tokio::test]
    async fn test_model_cleaner_applies_positive_judgment() {
        let cleaner = model_cleaner(Ok(
            r#"{"has_artifact": true, "cleaned_text": "just the answer"}"#.to_string(),
        ));
        assert_eq!(
            cleaner.clean("just the answer [AD: buy tokens]").await,
            "just the answer"
        );
    }

    #[tokio::test]
    async fn test_model_cleaner_respects_negative_judgment() {
        let cleaner = model_cleaner(Ok(
            r#"{"has_artifact": false, "cleaned_text": ""}"#.to_string()
        ));
        assert_eq!(cleaner.clean("clean already").await, "clean already");
    }

    #[tokio::test]
    async fn test_malformed_judgment_keeps_original() {
        let cleaner = model_cleaner(Ok("I think it looks fine!".to_string()));
        assert_eq!(cleaner.clean("the original").await, "the original");
    }

    #[tokio::test]
    async fn test_failed_call_degrades_to_rules() {
        let cleaner = model_cleaner(Err(GatewayError::provider("Stub", "down")));
        let cleaned = cleaner
            .clean("answer text\n\nDisclaimer: generated content.")
            .await;
        assert_eq!(cleaned, "answer text");
    }
}
