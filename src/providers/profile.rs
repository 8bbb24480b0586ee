//! Model/provider capability profiles
//!
//! Profiles are layered from three sources in increasing precedence:
//! generic defaults, model-level static defaults, then provider-specific
//! static overrides. The gateway's model catalog fills model-level gaps
//! (context length, vision flag) when the static table has no entry.

use crate::gateway::ModelInfo;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Unit a budget is measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Tokens,
    Characters,
}

/// Generic fallback limits for models with no better information
pub const GENERIC_MAX_TOKENS: usize = 8192;
pub const GENERIC_MAX_CHARS: usize = 30000;

/// Resolved capabilities for one (model, provider) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelProviderProfile {
    pub max_length: usize,
    pub unit: LengthUnit,
    pub supports_vision: bool,
    pub supports_web_search: bool,
    pub is_stable: bool,
}

/// Partial profile: only the fields a layer actually knows about
#[derive(Debug, Clone, Copy, Default)]
struct ProfileOverlay {
    max_tokens: Option<usize>,
    max_chars: Option<usize>,
    supports_vision: Option<bool>,
    supports_web_search: Option<bool>,
    is_stable: Option<bool>,
}

/// Static enrichment for one model
struct ModelEnrichment {
    defaults: ProfileOverlay,
    providers: HashMap<&'static str, ProfileOverlay>,
}

/// Knowledge the gateway catalog does not carry: observed context limits,
/// web-search support, and provider stability.
static ENRICHMENT: Lazy<HashMap<&'static str, ModelEnrichment>> = Lazy::new(|| {
    let mut table = HashMap::new();

    table.insert(
        "gpt-4o",
        ModelEnrichment {
            defaults: ProfileOverlay {
                max_tokens: Some(128000),
                supports_vision: Some(true),
                ..Default::default()
            },
            providers: HashMap::from([
                (
                    "Bing",
                    ProfileOverlay {
                        max_tokens: Some(32768),
                        supports_web_search: Some(true),
                        is_stable: Some(true),
                        ..Default::default()
                    },
                ),
                (
                    "GptGo",
                    ProfileOverlay {
                        max_tokens: Some(8192),
                        supports_web_search: Some(true),
                        is_stable: Some(true),
                        ..Default::default()
                    },
                ),
                (
                    "You",
                    ProfileOverlay {
                        max_tokens: Some(4096),
                        supports_web_search: Some(true),
                        is_stable: Some(false),
                        ..Default::default()
                    },
                ),
            ]),
        },
    );

    table.insert(
        "claude-3-opus",
        ModelEnrichment {
            defaults: ProfileOverlay {
                max_tokens: Some(200000),
                supports_vision: Some(true),
                ..Default::default()
            },
            providers: HashMap::from([
                (
                    "ClaudeDev",
                    ProfileOverlay {
                        is_stable: Some(true),
                        ..Default::default()
                    },
                ),
                (
                    "Poe",
                    ProfileOverlay {
                        max_tokens: Some(8192),
                        is_stable: Some(false),
                        ..Default::default()
                    },
                ),
            ]),
        },
    );

    table.insert(
        "gemini",
        ModelEnrichment {
            defaults: ProfileOverlay {
                max_tokens: Some(32768),
                supports_vision: Some(true),
                ..Default::default()
            },
            providers: HashMap::from([
                (
                    "Google",
                    ProfileOverlay {
                        is_stable: Some(true),
                        ..Default::default()
                    },
                ),
                (
                    "GeminiAdvanced",
                    ProfileOverlay {
                        max_tokens: Some(128000),
                        is_stable: Some(false),
                        ..Default::default()
                    },
                ),
            ]),
        },
    );

    table.insert(
        "tts-1",
        ModelEnrichment {
            defaults: ProfileOverlay {
                max_chars: Some(4096),
                ..Default::default()
            },
            providers: HashMap::new(),
        },
    );

    table
});

impl ProfileOverlay {
    fn apply(&self, profile: &mut ModelProviderProfile) {
        let limit = match profile.unit {
            LengthUnit::Tokens => self.max_tokens,
            LengthUnit::Characters => self.max_chars,
        };
        if let Some(limit) = limit {
            profile.max_length = limit;
        }
        if let Some(v) = self.supports_vision {
            profile.supports_vision = v;
        }
        if let Some(v) = self.supports_web_search {
            profile.supports_web_search = v;
        }
        if let Some(v) = self.is_stable {
            profile.is_stable = v;
        }
    }
}

/// Providers in this family only expose a character-counted prompt size,
/// not a tokenizer-aligned window.
fn uses_char_limit(provider: &str) -> bool {
    provider.to_lowercase().contains("pollinations")
}

/// Resolve the profile for a (model, provider) pair.
///
/// `catalog` is the gateway's entry for the model, if it has one. A pair
/// with no enrichment resolves to generic defaults rather than failing.
pub fn resolve(model: &str, provider: &str, catalog: Option<&ModelInfo>) -> ModelProviderProfile {
    let unit = if uses_char_limit(provider) {
        LengthUnit::Characters
    } else {
        LengthUnit::Tokens
    };

    let mut profile = ModelProviderProfile {
        max_length: match unit {
            LengthUnit::Tokens => GENERIC_MAX_TOKENS,
            LengthUnit::Characters => GENERIC_MAX_CHARS,
        },
        unit,
        supports_vision: false,
        supports_web_search: false,
        is_stable: false,
    };

    // Catalog-reported model facts sit between generic and static layers
    if let Some(info) = catalog {
        if unit == LengthUnit::Tokens {
            if let Some(len) = info.context_length {
                profile.max_length = len;
            }
        }
        profile.supports_vision = info.supports_vision;
    }

    if let Some(enrichment) = ENRICHMENT.get(model) {
        enrichment.defaults.apply(&mut profile);
        if let Some(overlay) = enrichment.providers.get(provider) {
            overlay.apply(&mut profile);
        }
    }

    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_override_beats_model_default() {
        let profile = resolve("gpt-4o", "Bing", None);
        assert_eq!(profile.max_length, 32768);
        assert!(profile.supports_web_search);
        assert!(profile.is_stable);
        // Model-level default survives where the provider says nothing
        assert!(profile.supports_vision);
    }

    #[test]
    fn test_model_default_beats_generic() {
        let profile = resolve("claude-3-opus", "UnknownProvider", None);
        assert_eq!(profile.max_length, 200000);
        assert!(profile.supports_vision);
        assert!(!profile.is_stable);
    }

    #[test]
    fn test_unknown_model_gets_generic_defaults() {
        let profile = resolve("mystery-model", "SomeProvider", None);
        assert_eq!(profile.max_length, GENERIC_MAX_TOKENS);
        assert_eq!(profile.unit, LengthUnit::Tokens);
        assert!(!profile.supports_vision);
        assert!(!profile.supports_web_search);
    }

    #[test]
    fn test_pollinations_budgets_in_characters() {
        let profile = resolve("mystery-model", "PollinationsAI", None);
        assert_eq!(profile.unit, LengthUnit::Characters);
        assert_eq!(profile.max_length, GENERIC_MAX_CHARS);
    }

    #[test]
    fn test_catalog_fills_model_level_gap() {
        let info = ModelInfo {
            name: "llama-3".to_string(),
            best_provider: None,
            providers: vec![],
            context_length: Some(16384),
            supports_vision: false,
        };
        let profile = resolve("llama-3", "SomeProvider", Some(&info));
        assert_eq!(profile.max_length, 16384);
    }

    #[test]
    fn test_static_layer_beats_catalog() {
        let info = ModelInfo {
            name: "gpt-4o".to_string(),
            best_provider: None,
            providers: vec![],
            context_length: Some(1000),
            supports_vision: false,
        };
        let profile = resolve("gpt-4o", "Bing", Some(&info));
        assert_eq!(profile.max_length, 32768);
        assert!(profile.supports_vision);
    }
}
