//! Client configuration
//!
//! Precedence, lowest to highest: built-in defaults, JSON config file,
//! environment variables, explicit mutation by the caller. Unknown file
//! keys are rejected rather than silently ignored.

use crate::error::{GatewayError, Result};
use secrecy::Secret;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Gateway client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the multi-provider gateway service
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Model used when a session or call does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Per-call deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempt budget for resilient calls
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base delay before the first retry, in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,

    /// Multiplier applied to the delay after each retryable failure
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,

    /// History trimming mode: >= 1.0 keeps that many recent messages,
    /// < 1.0 trims to that fraction of the context budget
    #[serde(default = "default_context_reduction_factor")]
    pub context_reduction_factor: f64,

    /// Provider cache validity window in seconds
    #[serde(default = "default_provider_cache_ttl")]
    pub provider_cache_ttl_secs: u64,

    /// Providers tried first during selection, in order of preference
    #[serde(default)]
    pub preferred_providers: Vec<String>,

    /// Clean responses with a secondary model call instead of rules only
    #[serde(default)]
    pub use_ai_cleaner: bool,

    /// Optional proxy URL for all gateway traffic
    #[serde(default)]
    pub proxy: Option<String>,

    /// Bearer token for the gateway, if it requires one
    #[serde(default)]
    pub api_key: Option<Secret<String>>,

    /// Default model for image generation
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Requested image dimensions, e.g. "1024x1024"
    #[serde(default = "default_image_size")]
    pub image_size: String,

    /// Requested image quality tier
    #[serde(default = "default_image_quality")]
    pub image_quality: String,
}

// Default value functions
fn default_gateway_url() -> String {
    "http://localhost:1337".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_delay_secs() -> f64 {
    2.0
}
fn default_retry_backoff_factor() -> f64 {
    2.0
}
fn default_context_reduction_factor() -> f64 {
    0.7
}
fn default_provider_cache_ttl() -> u64 {
    86400
}
fn default_image_model() -> String {
    "flux".to_string()
}
fn default_image_size() -> String {
    "1024x1024".to_string()
}
fn default_image_quality() -> String {
    "standard".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            default_model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            retry_backoff_factor: default_retry_backoff_factor(),
            context_reduction_factor: default_context_reduction_factor(),
            provider_cache_ttl_secs: default_provider_cache_ttl(),
            preferred_providers: Vec::new(),
            use_ai_cleaner: false,
            proxy: None,
            api_key: None,
            image_model: default_image_model(),
            image_size: default_image_size(),
            image_quality: default_image_quality(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file, filling absent keys with
    /// defaults. Unknown keys in the file are a hard error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("{}: {}", path.display(), e)))?;

        let loaded: Self = settings
            .try_deserialize()
            .map_err(|e| GatewayError::Configuration(format!("{}: {}", path.display(), e)))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Override settings from environment variables, if present
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("GATEWAY_URL") {
            self.gateway_url = val;
        }

        if let Ok(val) = std::env::var("GATEWAY_API_KEY") {
            self.api_key = Some(Secret::new(val));
        }

        if let Ok(val) = std::env::var("GATEWAY_PROXY") {
            self.proxy = Some(val);
        }

        if let Ok(val) = std::env::var("GATEWAY_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("GATEWAY_MAX_RETRIES") {
            if let Ok(retries) = val.parse() {
                self.max_retries = retries;
            }
        }

        self
    }

    /// Reject settings that would break the retry or budget arithmetic
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(GatewayError::Configuration(
                "timeout_secs must be positive".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(GatewayError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.retry_backoff_factor < 1.0 {
            return Err(GatewayError::Configuration(
                "retry_backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if self.context_reduction_factor <= 0.0 {
            return Err(GatewayError::Configuration(
                "context_reduction_factor must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the per-call deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the base retry delay as a Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }

    /// Get the provider cache TTL as a Duration
    pub fn provider_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.provider_cache_ttl_secs)
    }
}
