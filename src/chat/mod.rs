//! Chat session orchestration
//!
//! A session owns one conversation history and drives the resilient
//! request loop: provider selection, budget enforcement, timeout-bounded
//! calls, failure classification, adaptive context-limit correction, and
//! optional artifact cleaning. History is only ever committed by a fully
//! successful attempt, so an aborted or cancelled request leaves the
//! session exactly as it found it.

pub mod cleaner;

pub use cleaner::{ModelCleaner, ResponseCleaner, RuleBasedCleaner};

use crate::config::ClientConfig;
use crate::context::{parse_context_limit, ContextBudgetTracker};
use crate::error::{ErrorKind, GatewayError, Result};
use crate::gateway::{ChatRequest, Gateway, Message, Role};
use crate::metrics::METRICS;
use crate::providers::{ModelProviderProfile, ProviderRegistry};
use crate::retry::RetryPolicy;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Instruction sent when resuming an interrupted stream
const CONTINUATION_PROMPT: &str = "Continue your previous response exactly where it stopped. \
Do not repeat any text you have already written.";

/// Per-call options for chat generation
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Explicit provider; must be cached and working or the call fails
    pub provider: Option<String>,
    /// Ask the provider to ground the answer with web search
    pub web_search: bool,
    /// Image inputs for vision-capable models
    pub images: Option<Vec<String>>,
    /// Post-process the response through the artifact cleaner
    pub clean_response: bool,
}

/// How a failed attempt moves the request state machine
enum Disposition {
    /// Backend told us its real context limit; correct and re-check budget
    AdaptLimit(usize),
    /// Transient; worth another attempt after backoff
    Retry,
    /// Not recoverable by retrying
    Fatal,
}

/// An isolated chat conversation with budget management
pub struct ChatSession {
    gateway: Arc<dyn Gateway>,
    registry: Arc<ProviderRegistry>,
    config: Arc<ClientConfig>,
    policy: RetryPolicy,
    cleaner: Arc<dyn ResponseCleaner>,
    model: String,
    provider_hint: Option<String>,
    resolved_provider: Option<String>,
    profile: ModelProviderProfile,
    tracker: ContextBudgetTracker,
    history: Vec<Message>,
}

impl ChatSession {
    pub(crate) fn new(
        gateway: Arc<dyn Gateway>,
        registry: Arc<ProviderRegistry>,
        config: Arc<ClientConfig>,
        model: String,
        system_prompt: Option<String>,
        provider_hint: Option<String>,
    ) -> Self {
        let cleaner: Arc<dyn ResponseCleaner> = if config.use_ai_cleaner {
            Arc::new(ModelCleaner::new(gateway.clone(), config.default_model.clone()))
        } else {
            Arc::new(RuleBasedCleaner)
        };

        let profile = registry.resolve_profile(&model, provider_hint.as_deref().unwrap_or(""));
        let tracker = ContextBudgetTracker::new(&profile);
        let history = system_prompt.map(Message::system).into_iter().collect();
        let policy = RetryPolicy::from_config(&config).with_retryable([ErrorKind::Provider]);

        Self {
            gateway,
            registry,
            config,
            policy,
            cleaner,
            model,
            provider_hint,
            resolved_provider: None,
            profile,
            tracker,
            history,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The session's live context budget
    pub fn budget(&self) -> &ContextBudgetTracker {
        &self.tracker
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Replace the conversation history wholesale
    pub fn set_history(&mut self, history: Vec<Message>) {
        self.history = history;
    }

    /// Drop all turns, optionally keeping a leading system prompt
    pub fn clear_history(&mut self, keep_system_prompt: bool) {
        if keep_system_prompt && self.history.first().map(|m| m.role) == Some(Role::System) {
            self.history.truncate(1);
        } else {
            self.history.clear();
        }
    }

    /// Generate a response to `msg`, managing history and trimming.
    ///
    /// Returns `Ok(None)` when the backend produced a complete but empty
    /// answer, or when the context budget collapsed below the viable
    /// floor before any call could be made. Retry exhaustion is an error.
    pub async fn generate(
        &mut self,
        msg: impl Into<String>,
        opts: GenerateOptions,
    ) -> Result<Option<String>> {
        let timer = METRICS
            .gateway_request_duration
            .with_label_values(&["chat"])
            .start_timer();

        self.registry.ensure_fresh().await;
        let hint = opts.provider.as_deref().or(self.provider_hint.as_deref());
        let provider = self.registry.select(&self.model, hint)?;
        self.reconfigure(&provider);
        let (web_search, images) = self.negotiate_capabilities(&opts);

        let mut user_message = Message::user(msg);
        if let Some(images) = images {
            user_message = user_message.with_images(images);
        }
        let mut working = self.history.clone();
        working.push(user_message);

        let mut attempt = 0;
        let mut last_error: Option<GatewayError> = None;

        while attempt < self.config.max_retries {
            if !self.ensure_budget(&mut working) {
                timer.observe_duration();
                return Ok(None);
            }

            let request = ChatRequest {
                model: self.model.clone(),
                messages: working.clone(),
                provider: Some(provider.clone()),
                web_search,
                stream: false,
            };

            let result = match tokio::time::timeout(
                self.config.timeout(),
                self.gateway.chat_completion(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(self.config.timeout())),
            };

            match result {
                Ok(response) => {
                    timer.observe_duration();
                    if response.content.is_empty() {
                        info!(provider = %provider, "backend returned an empty answer");
                        METRICS
                            .gateway_requests
                            .with_label_values(&["chat", "empty"])
                            .inc();
                        return Ok(None);
                    }

                    let content = if opts.clean_response {
                        self.cleaner.clean(&response.content).await
                    } else {
                        response.content
                    };

                    working.push(Message::assistant(content.clone()));
                    self.history = working;
                    METRICS
                        .gateway_requests
                        .with_label_values(&["chat", "success"])
                        .inc();
                    return Ok(Some(content));
                }
                Err(e) => {
                    if let Some(fatal) = self
                        .handle_failure("chat", e, &mut attempt, &mut last_error)
                        .await
                    {
                        timer.observe_duration();
                        return Err(fatal);
                    }
                }
            }
        }

        timer.observe_duration();
        Err(self.exhausted(last_error))
    }

    /// Streaming variant: deltas are handed to `on_chunk` as they arrive.
    ///
    /// A mid-stream failure does not discard the partial answer. The
    /// retry resends the original request with the accumulated partial
    /// text as assistant context plus a continuation instruction, and the
    /// history is committed exactly once with the fully assembled text.
    pub async fn stream_generate<F>(
        &mut self,
        msg: impl Into<String>,
        opts: GenerateOptions,
        mut on_chunk: F,
    ) -> Result<Option<String>>
    where
        F: FnMut(&str),
    {
        let timer = METRICS
            .gateway_request_duration
            .with_label_values(&["chat_stream"])
            .start_timer();

        self.registry.ensure_fresh().await;
        let hint = opts.provider.as_deref().or(self.provider_hint.as_deref());
        let provider = self.registry.select(&self.model, hint)?;
        self.reconfigure(&provider);
        let (web_search, images) = self.negotiate_capabilities(&opts);

        let mut user_message = Message::user(msg);
        if let Some(images) = images {
            user_message = user_message.with_images(images);
        }
        let mut working = self.history.clone();
        working.push(user_message);

        let mut partial = String::new();
        let mut attempt = 0;
        let mut last_error: Option<GatewayError> = None;

        'attempts: while attempt < self.config.max_retries {
            if !self.ensure_budget(&mut working) {
                timer.observe_duration();
                return Ok(None);
            }

            let mut request_messages = working.clone();
            if !partial.is_empty() {
                debug!(
                    resumed_chars = partial.len(),
                    "resuming interrupted stream with continuation context"
                );
                request_messages.push(Message::assistant(partial.clone()));
                request_messages.push(Message::user(CONTINUATION_PROMPT));
                // Continuation turns count against the budget too
                if !self.ensure_budget(&mut request_messages) {
                    timer.observe_duration();
                    return Ok(None);
                }
            }

            let request = ChatRequest {
                model: self.model.clone(),
                messages: request_messages,
                provider: Some(provider.clone()),
                web_search,
                stream: true,
            };

            let stream_result = match tokio::time::timeout(
                self.config.timeout(),
                self.gateway.chat_completion_stream(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(self.config.timeout())),
            };

            let mut stream = match stream_result {
                Ok(stream) => stream,
                Err(e) => {
                    if let Some(fatal) = self
                        .handle_failure("chat_stream", e, &mut attempt, &mut last_error)
                        .await
                    {
                        timer.observe_duration();
                        return Err(fatal);
                    }
                    continue 'attempts;
                }
            };

            loop {
                let next = match tokio::time::timeout(self.config.timeout(), stream.next()).await {
                    Ok(next) => next,
                    Err(_) => Some(Err(GatewayError::Timeout(self.config.timeout()))),
                };

                match next {
                    None => break,
                    Some(Ok(delta)) => {
                        partial.push_str(&delta);
                        on_chunk(&delta);
                    }
                    Some(Err(e)) => {
                        if let Some(fatal) = self
                            .handle_failure("chat_stream", e, &mut attempt, &mut last_error)
                            .await
                        {
                            timer.observe_duration();
                            return Err(fatal);
                        }
                        continue 'attempts;
                    }
                }
            }

            // Stream completed fully
            if partial.is_empty() {
                info!(provider = %provider, "backend returned an empty answer");
                METRICS
                    .gateway_requests
                    .with_label_values(&["chat_stream", "empty"])
                    .inc();
                timer.observe_duration();
                return Ok(None);
            }

            let content = if opts.clean_response {
                self.cleaner.clean(&partial).await
            } else {
                partial
            };

            working.push(Message::assistant(content.clone()));
            self.history = working;
            METRICS
                .gateway_requests
                .with_label_values(&["chat_stream", "success"])
                .inc();
            timer.observe_duration();
            return Ok(Some(content));
        }

        timer.observe_duration();
        Err(self.exhausted(last_error))
    }

    /// Re-resolve the capability profile when the provider changes. A new
    /// provider means a new budget; adaptive corrections do not carry
    /// across providers.
    fn reconfigure(&mut self, provider: &str) {
        if self.resolved_provider.as_deref() == Some(provider) {
            return;
        }
        self.profile = self.registry.resolve_profile(&self.model, provider);
        self.tracker = ContextBudgetTracker::new(&self.profile);
        self.resolved_provider = Some(provider.to_string());
        info!(
            model = %self.model,
            provider,
            max_length = self.profile.max_length,
            unit = ?self.profile.unit,
            "session configured"
        );
    }

    /// Drop requested capabilities the resolved provider cannot serve
    fn negotiate_capabilities(&self, opts: &GenerateOptions) -> (bool, Option<Vec<String>>) {
        let mut web_search = opts.web_search;
        if web_search && !self.profile.supports_web_search {
            warn!(
                provider = ?self.resolved_provider,
                "web search not supported, ignoring request"
            );
            web_search = false;
        }

        let mut images = opts.images.clone();
        if images.is_some() && !self.profile.supports_vision {
            warn!(
                provider = ?self.resolved_provider,
                "vision not supported, ignoring images"
            );
            images = None;
        }

        (web_search, images)
    }

    /// Trim the working history into the budget, shrinking the budget
    /// when trimming alone cannot satisfy it. Returns false once the
    /// budget collapses below the viable floor; no call is made then.
    fn ensure_budget(&mut self, working: &mut Vec<Message>) -> bool {
        loop {
            if self
                .tracker
                .trim(working, self.config.context_reduction_factor)
            {
                return true;
            }
            if !self.tracker.shrink() {
                error!(
                    budget = self.tracker.max_length(),
                    "context budget collapsed below viable floor, aborting request"
                );
                return false;
            }
        }
    }

    fn classify(&self, error: &GatewayError) -> Disposition {
        if let Some(limit) = parse_context_limit(&error.to_string()) {
            if self.tracker.would_lower(limit) {
                return Disposition::AdaptLimit(limit);
            }
        }
        if self.policy.is_retryable(error) {
            Disposition::Retry
        } else {
            Disposition::Fatal
        }
    }

    /// Process one failed attempt. Returns the error when it is fatal;
    /// otherwise updates the attempt counter, sleeps any backoff owed,
    /// and leaves the caller to loop. Limit corrections consume neither
    /// an attempt nor a backoff delay.
    async fn handle_failure(
        &mut self,
        operation: &'static str,
        error: GatewayError,
        attempt: &mut usize,
        last_error: &mut Option<GatewayError>,
    ) -> Option<GatewayError> {
        match self.classify(&error) {
            Disposition::Fatal => return Some(error),
            Disposition::AdaptLimit(limit) => {
                info!(
                    limit,
                    budget = self.tracker.max_length(),
                    "backend context limit detected, correcting budget"
                );
                self.tracker.adapt_to_limit(limit);
                *last_error = Some(error);
            }
            Disposition::Retry => {
                *attempt += 1;
                METRICS.retry_attempts.with_label_values(&[operation]).inc();
                warn!(
                    attempt = *attempt,
                    max = self.config.max_retries,
                    error = %error,
                    "attempt failed"
                );
                if *attempt < self.config.max_retries {
                    tokio::time::sleep(self.policy.delay_for(*attempt - 1)).await;
                }
                *last_error = Some(error);
            }
        }
        None
    }

    fn exhausted(&self, last_error: Option<GatewayError>) -> GatewayError {
        METRICS
            .retry_exhaustions
            .with_label_values(&["chat"])
            .inc();
        GatewayError::Exhausted {
            attempts: self.config.max_retries,
            source: Box::new(last_error.unwrap_or_else(|| {
                GatewayError::Configuration("no attempts were made".to_string())
            })),
        }
    }
}
