//! Reqwest-backed gateway implementation
//!
//! Talks to an OpenAI-compatible multi-provider gateway service. Status
//! mapping: 429 becomes a rate-limit error, any other non-success status a
//! provider error carrying the body's message, and undecodable payloads an
//! invalid-response error.

use super::models::*;
use super::Gateway;
use crate::config::ClientConfig;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the gateway service
pub struct HttpGateway {
    http: Client,
    base_url: String,
    api_key: Option<Secret<String>>,
    timeout: Duration,
}

impl HttpGateway {
    /// Create a new gateway client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.timeout());

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| GatewayError::Configuration(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    fn map_transport_error(&self, err: reqwest::Error, provider: &str) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::provider(provider, err.to_string())
        }
    }

    /// Turn a non-success response into the matching error variant
    async fn status_error(response: Response, provider: &str) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = extract_error_message(&body).unwrap_or(body);

        match status {
            StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited {
                provider: provider.to_string(),
                message,
            },
            StatusCode::NOT_FOUND if message.to_lowercase().contains("model") => {
                GatewayError::ModelNotFound(message)
            }
            _ => GatewayError::provider(provider, format!("status {}: {}", status, message)),
        }
    }
}

/// Best-effort extraction of the error message from a gateway body
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        serde_json::Value::String(s) => Some(s.clone()),
        obj => obj
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from),
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let provider = request.provider.clone().unwrap_or_else(|| "auto".to_string());
        debug!(model = %request.model, provider = %provider, "chat completion request");

        let response = self
            .authorize(self.http.post(self.url("/v1/chat/completions")).json(&request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, &provider))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, &provider).await);
        }

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::invalid_response(&provider, e.to_string()))?;

        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::invalid_response(&provider, "no choices in response"))?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            provider: payload.provider,
        })
    }

    async fn chat_completion_stream(
        &self,
        mut request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<String>>> {
        request.stream = true;
        let provider = request.provider.clone().unwrap_or_else(|| "auto".to_string());
        debug!(model = %request.model, provider = %provider, "streaming chat completion request");

        let response = self
            .authorize(self.http.post(self.url("/v1/chat/completions")).json(&request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, &provider))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, &provider).await);
        }

        let timeout = self.timeout;
        let state = SseState {
            inner: response.bytes_stream().boxed(),
            provider,
            timeout,
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        };

        Ok(futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(delta) = state.pending.pop_front() {
                    return Some((Ok(delta), state));
                }
                if state.done {
                    return None;
                }
                match state.inner.next().await {
                    None => return None,
                    Some(Err(e)) => {
                        state.done = true;
                        let err = if e.is_timeout() {
                            GatewayError::Timeout(state.timeout)
                        } else {
                            GatewayError::provider(&state.provider, e.to_string())
                        };
                        return Some((Err(err), state));
                    }
                    Some(Ok(chunk)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                        state.drain_complete_lines();
                    }
                }
            }
        })
        .boxed())
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<Vec<String>> {
        let provider = request.provider.clone().unwrap_or_else(|| "auto".to_string());
        debug!(model = %request.model, provider = %provider, "image generation request");

        let response = self
            .authorize(self.http.post(self.url("/v1/images/generations")).json(&request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, &provider))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, &provider).await);
        }

        let payload: ImageGenerationResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::invalid_response(&provider, e.to_string()))?;

        Ok(payload.data.into_iter().map(|img| img.url).collect())
    }

    async fn transcribe_audio(&self, request: TranscriptionRequest) -> Result<String> {
        let provider = request.provider.clone().unwrap_or_else(|| "auto".to_string());
        debug!(model = %request.model, provider = %provider, "transcription request");

        let part = reqwest::multipart::Part::bytes(request.audio)
            .file_name(request.file_name.clone());
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", request.model.clone());
        if let Some(p) = &request.provider {
            form = form.text("provider", p.clone());
        }

        let response = self
            .authorize(self.http.post(self.url("/v1/audio/transcriptions")).multipart(form))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, &provider))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, &provider).await);
        }

        let payload: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::invalid_response(&provider, e.to_string()))?;

        Ok(payload.text)
    }

    async fn synthesize_speech(&self, request: SpeechRequest) -> Result<Bytes> {
        let provider = request.provider.clone().unwrap_or_else(|| "auto".to_string());
        debug!(model = %request.model, provider = %provider, "speech synthesis request");

        let response = self
            .authorize(self.http.post(self.url("/v1/audio/speech")).json(&request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, &provider))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, &provider).await);
        }

        response
            .bytes()
            .await
            .map_err(|e| GatewayError::invalid_response(&provider, e.to_string()))
    }

    async fn list_providers(&self) -> Result<Vec<ProviderInfo>> {
        let response = self
            .authorize(self.http.get(self.url("/v1/providers")))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, "gateway"))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "gateway").await);
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::invalid_response("gateway", e.to_string()))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .authorize(self.http.get(self.url("/v1/models")))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, "gateway"))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "gateway").await);
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::invalid_response("gateway", e.to_string()))
    }
}

/// Incremental SSE decoding state
struct SseState {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    provider: String,
    timeout: Duration,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

impl SseState {
    /// Split buffered bytes into complete SSE lines and queue their deltas.
    /// Partial trailing lines stay in the buffer until the next chunk.
    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                self.done = true;
                return;
            }
            if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
                if let Some(delta) = chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.as_ref())
                {
                    if !delta.is_empty() {
                        self.pending.push_back(delta.clone());
                    }
                }
            }
        }
    }
}

// Response shapes (OpenAI-compatible)

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    provider: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_message_object_form() {
        let body = r#"{"error": {"message": "rate limit exceeded", "code": 429}}"#;
        assert_eq!(
            extract_error_message(body),
            Some("rate limit exceeded".to_string())
        );
    }

    #[test]
    fn test_extract_error_message_string_form() {
        let body = r#"{"error": "something broke"}"#;
        assert_eq!(extract_error_message(body), Some("something broke".to_string()));
    }

    #[test]
    fn test_extract_error_message_unparseable() {
        assert_eq!(extract_error_message("<html>502</html>"), None);
    }

    #[test]
    fn test_sse_state_handles_split_chunks() {
        let mut state = SseState {
            inner: futures::stream::empty().boxed(),
            provider: "Bing".to_string(),
            timeout: Duration::from_secs(1),
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        };

        // First chunk ends mid-line
        state
            .buffer
            .push_str("data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\ndata: {\"choi");
        state.drain_complete_lines();
        assert_eq!(state.pending.pop_front(), Some("Hel".to_string()));
        assert!(state.pending.is_empty());

        // Second chunk completes the line and terminates the stream
        state
            .buffer
            .push_str("ces\":[{\"delta\":{\"content\":\"lo\"}}]}\ndata: [DONE]\n");
        state.drain_complete_lines();
        assert_eq!(state.pending.pop_front(), Some("lo".to_string()));
        assert!(state.done);
    }
}
