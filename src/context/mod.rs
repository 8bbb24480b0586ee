//! Conversation budget measurement and history trimming
//!
//! Budgets are measured in sub-word tokens (cl100k_base) or characters,
//! fixed per model/provider profile. The tracker's `max_length` is live
//! session state: it shrinks when trimming cannot satisfy the budget and
//! snaps to backend-reported limits parsed out of oversize errors.

use crate::gateway::{Message, Role};
use crate::metrics::METRICS;
use crate::providers::{LengthUnit, ModelProviderProfile};
use once_cell::sync::Lazy;
use regex::Regex;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::{debug, warn};

/// Budgets below this are not worth sending a request for
pub const MIN_VIABLE_LENGTH: usize = 500;

/// Headroom kept under a backend-reported context limit
pub const LIMIT_SAFETY_MARGIN: usize = 500;

/// cl100k_base is a sensible shared encoding for modern chat models
static BPE: Lazy<CoreBPE> = Lazy::new(|| cl100k_base().expect("Failed to initialize tiktoken"));

static LIMIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*tokens").expect("invalid limit pattern"));

/// Tracks a conversation against its context budget
#[derive(Debug, Clone)]
pub struct ContextBudgetTracker {
    unit: LengthUnit,
    max_length: usize,
}

impl ContextBudgetTracker {
    pub fn new(profile: &ModelProviderProfile) -> Self {
        Self {
            unit: profile.unit,
            max_length: profile.max_length,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn unit(&self) -> LengthUnit {
        self.unit
    }

    /// Size of one message in the tracker's unit
    fn measure_message(&self, message: &Message) -> usize {
        match self.unit {
            LengthUnit::Tokens => BPE.encode_with_special_tokens(&message.content).len(),
            LengthUnit::Characters => message.content.chars().count(),
        }
    }

    /// Total size of a history. Monotonically non-decreasing under append.
    pub fn measure(&self, history: &[Message]) -> usize {
        history.iter().map(|m| self.measure_message(m)).sum()
    }

    pub fn fits(&self, history: &[Message]) -> bool {
        self.measure(history) <= self.max_length
    }

    /// Trim oldest non-system messages until the history fits.
    ///
    /// `reduction_factor >= 1.0` keeps only the last `floor(factor)`
    /// non-system messages; `< 1.0` drops oldest messages until the size
    /// is at most `floor(max_length * factor)`. A leading system message
    /// is always preserved. Returns whether the result fits the budget.
    pub fn trim(&self, history: &mut Vec<Message>, reduction_factor: f64) -> bool {
        if self.fits(history) {
            return true;
        }

        METRICS.context_trims.inc();

        let system = (history.first().map(|m| m.role) == Some(Role::System))
            .then(|| history.remove(0));

        if reduction_factor >= 1.0 {
            let keep = reduction_factor as usize;
            if history.len() > keep {
                history.drain(..history.len() - keep);
            }
        } else {
            let target = (self.max_length as f64 * reduction_factor) as usize;
            let system_size = system.as_ref().map_or(0, |m| self.measure_message(m));
            let mut total = system_size + self.measure(history);
            while total > target && !history.is_empty() {
                let removed = history.remove(0);
                total -= self.measure_message(&removed);
            }
        }

        if let Some(system) = system {
            history.insert(0, system);
        }

        let fits = self.fits(history);
        debug!(
            size = self.measure(history),
            max = self.max_length,
            fits,
            "history trimmed"
        );
        fits
    }

    /// Reduce the budget after a failed trim. Returns false once the
    /// budget has collapsed below the minimum viable floor.
    pub fn shrink(&mut self) -> bool {
        let old = self.max_length;
        self.max_length = (self.max_length as f64 * 0.8) as usize;
        METRICS.context_budget_shrinks.inc();
        warn!(
            from = old,
            to = self.max_length,
            "trimming failed, adaptively reducing budget"
        );
        self.max_length >= MIN_VIABLE_LENGTH
    }

    /// Snap the budget to a backend-reported limit, minus a safety margin
    pub fn adapt_to_limit(&mut self, reported_limit: usize) {
        self.max_length = reported_limit.saturating_sub(LIMIT_SAFETY_MARGIN);
        METRICS.context_limit_corrections.inc();
    }

    /// Whether `reported_limit` would actually lower the current budget.
    /// Guards the reactive path against correction loops.
    pub fn would_lower(&self, reported_limit: usize) -> bool {
        reported_limit.saturating_sub(LIMIT_SAFETY_MARGIN) < self.max_length
    }
}

/// Parse a numeric context limit out of a backend oversize error, e.g.
/// "this model's maximum context length is 4096 tokens".
pub fn parse_context_limit(error_text: &str) -> Option<usize> {
    let lower = error_text.to_lowercase();
    if !lower.contains("maximum context length") && !lower.contains("exceeds maximum length") {
        return None;
    }
    LIMIT_PATTERN
        .captures(&lower)
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_tracker(max_length: usize) -> ContextBudgetTracker {
        ContextBudgetTracker {
            unit: LengthUnit::Characters,
            max_length,
        }
    }

    fn history_with_system() -> Vec<Message> {
        vec![
            Message::system("be brief"),
            Message::user("first question here"),
            Message::assistant("first answer here"),
            Message::user("second question here"),
            Message::assistant("second answer here"),
            Message::user("third question here"),
        ]
    }

    #[test]
    fn test_measure_monotonic_under_append() {
        let tracker = char_tracker(1000);
        let mut history = vec![Message::user("hello")];
        let mut last = tracker.measure(&history);
        for i in 0..5 {
            history.push(Message::assistant(format!("reply {}", i)));
            let size = tracker.measure(&history);
            assert!(size >= last);
            last = size;
        }
    }

    #[test]
    fn test_token_measurement() {
        let profile = ModelProviderProfile {
            max_length: 8192,
            unit: LengthUnit::Tokens,
            supports_vision: false,
            supports_web_search: false,
            is_stable: false,
        };
        let tracker = ContextBudgetTracker::new(&profile);
        let size = tracker.measure(&[Message::user("Hello, world! This is a test.")]);
        assert!(size > 0);
        assert!(size < 20);
    }

    #[test]
    fn test_trim_noop_when_fits() {
        let tracker = char_tracker(10000);
        let mut history = history_with_system();
        let before = history.clone();
        assert!(tracker.trim(&mut history, 0.7));
        assert_eq!(history, before);
    }

    #[test]
    fn test_trim_preserves_leading_system_message() {
        let tracker = char_tracker(60);
        for factor in [0.5, 0.9, 2.0, 4.0] {
            let mut history = history_with_system();
            tracker.trim(&mut history, factor);
            assert_eq!(history[0], Message::system("be brief"), "factor {}", factor);
        }
    }

    #[test]
    fn test_trim_count_mode_keeps_last_n_non_system() {
        let tracker = char_tracker(10);
        let mut history = history_with_system();
        tracker.trim(&mut history, 2.0);

        let non_system: Vec<_> = history.iter().filter(|m| m.role != Role::System).collect();
        assert_eq!(non_system.len(), 2);
        assert_eq!(non_system[0].content, "second answer here");
        assert_eq!(non_system[1].content, "third question here");
    }

    #[test]
    fn test_trim_ratio_mode_drops_oldest_first() {
        let tracker = char_tracker(80);
        let mut history = history_with_system();
        let ok = tracker.trim(&mut history, 0.5);

        assert!(ok);
        assert!(tracker.measure(&history) <= 40);
        // Newest message survives the longest
        assert_eq!(history.last().unwrap().content, "third question here");
    }

    #[test]
    fn test_trim_fails_when_system_alone_exceeds_budget() {
        let tracker = char_tracker(10);
        let mut history = vec![
            Message::system("a very long system prompt that cannot fit"),
            Message::user("hi"),
        ];
        assert!(!tracker.trim(&mut history, 0.5));
        assert_eq!(history[0].role, Role::System);
    }

    #[test]
    fn test_shrink_stops_at_floor() {
        let mut tracker = char_tracker(700);
        assert!(tracker.shrink()); // 560
        assert_eq!(tracker.max_length(), 560);
        assert!(!tracker.shrink()); // 448, below the floor
    }

    #[test]
    fn test_adapt_to_limit_applies_margin() {
        let mut tracker = char_tracker(30000);
        assert!(tracker.would_lower(4096));
        tracker.adapt_to_limit(4096);
        assert_eq!(tracker.max_length(), 3596);
        assert!(!tracker.would_lower(8192));
    }

    #[test]
    fn test_parse_context_limit() {
        assert_eq!(
            parse_context_limit(
                "This model's maximum context length is 4096 tokens. However, your messages resulted in 5203 tokens."
            ),
            Some(4096)
        );
        assert_eq!(
            parse_context_limit("request exceeds maximum length of 8192 tokens"),
            Some(8192)
        );
        assert_eq!(parse_context_limit("rate limit exceeded"), None);
        assert_eq!(parse_context_limit("maximum context length reached"), None);
    }
}
