//! Resilient client for multi-provider AI gateways
//!
//! Wraps an OpenAI-compatible gateway that fronts many free or unstable
//! upstream providers. The client keeps a daily cache of which providers
//! are working, picks a provider per request, and drives chat through a
//! retry loop that trims conversation history to a token or character
//! budget, corrects that budget from backend context-limit errors, and
//! resumes interrupted streams instead of restarting them.
//!
//! ```no_run
//! use gateway_client::{ClientConfig, GatewayClient, GenerateOptions};
//!
//! # async fn run() -> gateway_client::Result<()> {
//! let client = GatewayClient::new(ClientConfig::default().from_env())?;
//! let mut chat = client.new_chat(Some("gpt-4o"), Some("You are terse."));
//! if let Some(answer) = chat.generate("hello", GenerateOptions::default()).await? {
//!     println!("{answer}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod media;
pub mod metrics;
pub mod providers;
pub mod retry;

pub use chat::{ChatSession, GenerateOptions, ModelCleaner, ResponseCleaner, RuleBasedCleaner};
pub use client::GatewayClient;
pub use config::ClientConfig;
pub use context::ContextBudgetTracker;
pub use error::{ErrorKind, GatewayError, Result};
pub use gateway::{Gateway, HttpGateway, Message, Role};
pub use media::{ImageOptions, SpeechOptions};
pub use providers::{LengthUnit, ModelProviderProfile, ProviderRegistry};

/// Install a JSON tracing subscriber honoring `RUST_LOG`
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
