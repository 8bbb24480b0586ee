//! Provider discovery, health caching, and selection
//!
//! The registry owns an explicit cache of working providers with a TTL.
//! Refreshes are full rebuilds: the cache map is replaced wholesale, so
//! concurrent redundant refreshes are safe without coordination.

pub mod profile;

pub use profile::{LengthUnit, ModelProviderProfile};

use crate::error::{GatewayError, Result};
use crate::gateway::{DeclaredModels, Gateway, ModelInfo};
use crate::metrics::METRICS;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Health record for one provider
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    pub name: String,
    pub models: Option<DeclaredModels>,
}

impl ProviderRecord {
    fn supports(&self, model: &str) -> bool {
        self.models.as_ref().is_some_and(|m| m.supports(model))
    }
}

/// Cached provider catalog, valid while younger than the TTL
#[derive(Debug, Default)]
struct ProviderCache {
    providers: HashMap<String, ProviderRecord>,
    refreshed_at: Option<Instant>,
}

impl ProviderCache {
    fn is_valid(&self, ttl: Duration) -> bool {
        self.refreshed_at.is_some_and(|at| at.elapsed() < ttl)
    }
}

/// Discovers and selects backend providers
pub struct ProviderRegistry {
    gateway: Arc<dyn Gateway>,
    ttl: Duration,
    preferred: Vec<String>,
    cache: RwLock<ProviderCache>,
    models: RwLock<HashMap<String, ModelInfo>>,
}

impl ProviderRegistry {
    pub fn new(gateway: Arc<dyn Gateway>, ttl: Duration, preferred: Vec<String>) -> Self {
        Self {
            gateway,
            ttl,
            preferred,
            cache: RwLock::new(ProviderCache::default()),
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the provider and model caches from the gateway catalogs.
    ///
    /// A gateway that cannot be reached is not an error here: the stale
    /// cache is kept and a warning logged, so an unreachable catalog
    /// endpoint degrades selection rather than failing requests outright.
    pub async fn refresh(&self) {
        let providers = match self.gateway.list_providers().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "provider catalog refresh failed, keeping stale cache");
                return;
            }
        };

        let records: HashMap<String, ProviderRecord> = providers
            .into_iter()
            .filter(|p| p.working)
            .map(|p| {
                (
                    p.name.clone(),
                    ProviderRecord {
                        name: p.name,
                        models: p.models,
                    },
                )
            })
            .collect();

        info!(count = records.len(), "provider cache rebuilt");
        METRICS.provider_cache_refreshes.inc();

        {
            let mut cache = self.cache.write().unwrap();
            cache.providers = records;
            cache.refreshed_at = Some(Instant::now());
        }

        match self.gateway.list_models().await {
            Ok(list) => {
                let map = list.into_iter().map(|m| (m.name.clone(), m)).collect();
                *self.models.write().unwrap() = map;
            }
            Err(e) => {
                warn!(error = %e, "model catalog refresh failed, keeping stale catalog");
            }
        }
    }

    /// Refresh if the cache has expired. Must run before any selection.
    pub async fn ensure_fresh(&self) {
        let valid = self.cache.read().unwrap().is_valid(self.ttl);
        if !valid {
            self.refresh().await;
        }
    }

    /// Select a provider for `model`.
    ///
    /// An explicit hint must name a cached working provider or selection
    /// fails; hints are never silently replaced by a fallback. Without a
    /// hint, candidates are tried in tiers: preferred providers declaring
    /// the model, any provider declaring the model, any preferred
    /// provider, any working provider. The final pick within a tier is
    /// uniformly random.
    pub fn select(&self, model: &str, hint: Option<&str>) -> Result<String> {
        let cache = self.cache.read().unwrap();

        if let Some(hint) = hint {
            if cache.providers.contains_key(hint) {
                METRICS.provider_selections.with_label_values(&[hint]).inc();
                return Ok(hint.to_string());
            }
            return Err(GatewayError::provider(
                hint,
                "specified provider is not available or not working",
            ));
        }

        let preferred_working: Vec<&str> = self
            .preferred
            .iter()
            .map(String::as_str)
            .filter(|name| cache.providers.contains_key(*name))
            .collect();

        let mut candidates: Vec<&str> = preferred_working
            .iter()
            .copied()
            .filter(|name| cache.providers[*name].supports(model))
            .collect();

        if candidates.is_empty() {
            candidates = cache
                .providers
                .values()
                .filter(|r| r.supports(model))
                .map(|r| r.name.as_str())
                .collect();
        }

        if candidates.is_empty() {
            candidates = preferred_working;
        }

        if candidates.is_empty() {
            candidates = cache.providers.keys().map(String::as_str).collect();
        }

        let chosen = candidates
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| GatewayError::provider("none", "no working providers in cache"))?;

        debug!(model, provider = *chosen, "provider selected");
        METRICS
            .provider_selections
            .with_label_values(&[chosen])
            .inc();
        Ok(chosen.to_string())
    }

    /// Resolve the capability profile for a (model, provider) pair
    pub fn resolve_profile(&self, model: &str, provider: &str) -> ModelProviderProfile {
        let models = self.models.read().unwrap();
        profile::resolve(model, provider, models.get(model))
    }

    /// Names of all cached working providers
    pub fn working_providers(&self) -> Vec<String> {
        self.cache.read().unwrap().providers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::models::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::BoxStream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway stub serving a fixed provider catalog
    struct CatalogGateway {
        providers: Vec<ProviderInfo>,
        list_calls: AtomicUsize,
    }

    impl CatalogGateway {
        fn new(providers: Vec<(&str, bool, Option<DeclaredModels>)>) -> Self {
            Self {
                providers: providers
                    .into_iter()
                    .map(|(name, working, models)| ProviderInfo {
                        name: name.to_string(),
                        working,
                        models,
                    })
                    .collect(),
                list_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Gateway for CatalogGateway {
        async fn chat_completion(&self, _: ChatRequest) -> Result<ChatResponse> {
            unimplemented!("catalog-only stub")
        }
        async fn chat_completion_stream(
            &self,
            _: ChatRequest,
        ) -> Result<BoxStream<'static, Result<String>>> {
            unimplemented!("catalog-only stub")
        }
        async fn generate_image(&self, _: ImageRequest) -> Result<Vec<String>> {
            unimplemented!("catalog-only stub")
        }
        async fn transcribe_audio(&self, _: TranscriptionRequest) -> Result<String> {
            unimplemented!("catalog-only stub")
        }
        async fn synthesize_speech(&self, _: SpeechRequest) -> Result<Bytes> {
            unimplemented!("catalog-only stub")
        }
        async fn list_providers(&self) -> Result<Vec<ProviderInfo>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.providers.clone())
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
    }

    fn many(models: &[&str]) -> Option<DeclaredModels> {
        Some(DeclaredModels::Many(
            models.iter().map(|m| m.to_string()).collect(),
        ))
    }

    async fn registry_with(
        providers: Vec<(&str, bool, Option<DeclaredModels>)>,
        preferred: Vec<&str>,
    ) -> ProviderRegistry {
        let gateway = Arc::new(CatalogGateway::new(providers));
        let registry = ProviderRegistry::new(
            gateway,
            Duration::from_secs(3600),
            preferred.into_iter().map(String::from).collect(),
        );
        registry.refresh().await;
        registry
    }

    #[tokio::test]
    async fn test_refresh_keeps_only_working_providers() {
        let registry = registry_with(
            vec![
                ("Bing", true, many(&["gpt-4o"])),
                ("Broken", false, None),
            ],
            vec![],
        )
        .await;

        let working = registry.working_providers();
        assert_eq!(working, vec!["Bing".to_string()]);
    }

    #[tokio::test]
    async fn test_hint_present_is_honored() {
        let registry = registry_with(
            vec![
                ("Bing", true, many(&["gpt-4o"])),
                ("You", true, many(&["gpt-4o"])),
            ],
            vec![],
        )
        .await;

        assert_eq!(registry.select("gpt-4o", Some("You")).unwrap(), "You");
    }

    #[tokio::test]
    async fn test_hint_absent_fails_deterministically() {
        let registry = registry_with(vec![("Bing", true, many(&["gpt-4o"]))], vec![]).await;

        for _ in 0..10 {
            let result = registry.select("gpt-4o", Some("Ghost"));
            assert!(matches!(result, Err(GatewayError::Provider { .. })));
        }
    }

    #[tokio::test]
    async fn test_preferred_supporting_tier_wins() {
        let registry = registry_with(
            vec![
                ("Bing", true, many(&["gpt-4o"])),
                ("You", true, many(&["gpt-4o"])),
                ("Other", true, many(&["gemini"])),
            ],
            vec!["You"],
        )
        .await;

        // "You" is the only preferred provider declaring the model, so the
        // randomized final pick has a single candidate.
        for _ in 0..20 {
            assert_eq!(registry.select("gpt-4o", None).unwrap(), "You");
        }
    }

    #[tokio::test]
    async fn test_model_support_tier_before_preference_fallback() {
        let registry = registry_with(
            vec![
                ("Declares", true, many(&["gemini"])),
                ("Preferred", true, None),
            ],
            vec!["Preferred"],
        )
        .await;

        // No preferred provider declares the model; any declaring provider
        // outranks the preferred-without-support fallback.
        for _ in 0..20 {
            assert_eq!(registry.select("gemini", None).unwrap(), "Declares");
        }
    }

    #[tokio::test]
    async fn test_selection_always_from_working_set() {
        let registry = registry_with(
            vec![
                ("A", true, None),
                ("B", true, None),
                ("C", true, None),
            ],
            vec![],
        )
        .await;

        let working = registry.working_providers();
        for _ in 0..30 {
            let chosen = registry.select("unknown-model", None).unwrap();
            assert!(working.contains(&chosen));
        }
    }

    #[tokio::test]
    async fn test_empty_working_set_fails() {
        let registry = registry_with(vec![("Broken", false, None)], vec![]).await;
        assert!(registry.select("gpt-4o", None).is_err());
    }

    #[tokio::test]
    async fn test_ensure_fresh_respects_ttl() {
        let gateway = Arc::new(CatalogGateway::new(vec![("Bing", true, None)]));
        let registry = ProviderRegistry::new(gateway.clone(), Duration::from_secs(3600), vec![]);

        registry.ensure_fresh().await;
        registry.ensure_fresh().await;
        assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_forces_refresh() {
        let gateway = Arc::new(CatalogGateway::new(vec![("Bing", true, None)]));
        let registry = ProviderRegistry::new(gateway.clone(), Duration::ZERO, vec![]);

        registry.ensure_fresh().await;
        registry.ensure_fresh().await;
        assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 2);
    }
}
