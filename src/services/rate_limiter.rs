//! Fixed-window request counting per (client, event type).
//!
//! Windows are not sliding: a client may spend `max` requests just before
//! a window rolls over and another `max` right after it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use moka::sync::Cache;

use crate::models::EventKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max: u32,
    pub window_ms: u64,
    pub message: String,
}

impl RateLimitRule {
    pub fn new(max: u32, window_ms: u64) -> Self {
        Self { max, window_ms, message: "Rate limit exceeded".to_string() }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Per-event limits. Events without a rule are never limited.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRules {
    rules: HashMap<EventKind, RateLimitRule>,
}

impl RateLimitRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, event: EventKind, rule: RateLimitRule) -> Self {
        self.rules.insert(event, rule);
        self
    }

    pub fn get(&self, event: EventKind) -> Option<&RateLimitRule> {
        self.rules.get(&event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub count: u32,
    /// Epoch milliseconds at which the window rolls over.
    pub reset_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { message: String },
}

impl RateLimitDecision {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitDecision::Limited { .. })
    }
}

type ClientWindows = Arc<Mutex<HashMap<EventKind, RateLimitState>>>;

pub struct RateLimiter {
    rules: RateLimitRules,
    windows: Cache<String, ClientWindows>,
}

impl RateLimiter {
    /// `idle` bounds how long windows of a client that never called
    /// [`RateLimiter::clear`] are retained.
    pub fn new(rules: RateLimitRules, idle: Duration) -> Self {
        let windows = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(idle)
            .build();
        Self { rules, windows }
    }

    pub fn check(&self, client_id: &str, event: EventKind) -> RateLimitDecision {
        self.check_at(client_id, event, Utc::now().timestamp_millis())
    }

    pub fn check_at(&self, client_id: &str, event: EventKind, now_ms: i64) -> RateLimitDecision {
        let Some(rule) = self.rules.get(event) else {
            return RateLimitDecision::Allowed;
        };

        let client = self
            .windows
            .get_with(client_id.to_string(), || Arc::new(Mutex::new(HashMap::new())));
        let mut windows = client.lock().unwrap_or_else(PoisonError::into_inner);

        match windows.get_mut(&event) {
            Some(state) if now_ms <= state.reset_time => {
                // Saturate: a rejected request does not count further
                if state.count >= rule.max {
                    return RateLimitDecision::Limited { message: rule.message.clone() };
                }
                state.count += 1;
                RateLimitDecision::Allowed
            }
            _ => {
                let window_ms = i64::try_from(rule.window_ms).unwrap_or(i64::MAX);
                windows.insert(
                    event,
                    RateLimitState { count: 1, reset_time: now_ms.saturating_add(window_ms) },
                );
                if rule.max == 0 {
                    RateLimitDecision::Limited { message: rule.message.clone() }
                } else {
                    RateLimitDecision::Allowed
                }
            }
        }
    }

    /// Drop every window of a client, across all event types.
    pub fn clear(&self, client_id: &str) {
        self.windows.invalidate(client_id);
    }

    pub fn state(&self, client_id: &str, event: EventKind) -> Option<RateLimitState> {
        let client = self.windows.get(client_id)?;
        let windows = client.lock().unwrap_or_else(PoisonError::into_inner);
        windows.get(&event).copied()
    }

    pub fn tracked_clients(&self) -> u64 {
        self.windows.run_pending_tasks();
        self.windows.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_ms: u64) -> RateLimiter {
        let rules = RateLimitRules::new()
            .with_rule(EventKind::ContentChange, RateLimitRule::new(max, window_ms).with_message("slow down"));
        RateLimiter::new(rules, Duration::from_secs(60))
    }

    #[test]
    fn allows_exactly_max_within_a_window() {
        let limiter = limiter(3, 1_000);
        let t = 1_000_000;
        for offset in [0, 10, 999] {
            assert_eq!(limiter.check_at("c1", EventKind::ContentChange, t + offset), RateLimitDecision::Allowed);
        }
        assert_eq!(
            limiter.check_at("c1", EventKind::ContentChange, t + 999),
            RateLimitDecision::Limited { message: "slow down".to_string() }
        );
        // Rejections do not push the counter past max
        assert_eq!(limiter.state("c1", EventKind::ContentChange).map(|s| s.count), Some(3));
    }

    #[test]
    fn window_reset_starts_a_fresh_count() {
        let limiter = limiter(2, 1_000);
        let t = 5_000;
        assert!(!limiter.check_at("c1", EventKind::ContentChange, t).is_limited());
        assert!(!limiter.check_at("c1", EventKind::ContentChange, t + 1).is_limited());
        assert!(limiter.check_at("c1", EventKind::ContentChange, t + 2).is_limited());
        // Exactly at the boundary the old window still applies
        assert!(limiter.check_at("c1", EventKind::ContentChange, t + 1_000).is_limited());

        assert!(!limiter.check_at("c1", EventKind::ContentChange, t + 1_001).is_limited());
        let state = limiter.state("c1", EventKind::ContentChange).unwrap();
        assert_eq!(state.count, 1);
        assert_eq!(state.reset_time, t + 1_001 + 1_000);
    }

    #[test]
    fn fixed_window_allows_a_burst_across_the_boundary() {
        let limiter = limiter(2, 100);
        assert!(!limiter.check_at("c", EventKind::ContentChange, 0).is_limited());
        assert!(!limiter.check_at("c", EventKind::ContentChange, 99).is_limited());
        // Window rolls over after 100: three requests land within 3ms
        assert!(!limiter.check_at("c", EventKind::ContentChange, 101).is_limited());
        assert!(!limiter.check_at("c", EventKind::ContentChange, 102).is_limited());
        assert!(limiter.check_at("c", EventKind::ContentChange, 103).is_limited());
    }

    #[test]
    fn clients_and_events_are_independent() {
        let limiter = limiter(1, 1_000);
        assert!(!limiter.check_at("a", EventKind::ContentChange, 0).is_limited());
        assert!(limiter.check_at("a", EventKind::ContentChange, 1).is_limited());
        assert!(!limiter.check_at("b", EventKind::ContentChange, 1).is_limited());
        // No rule configured: never limited and no state created
        for i in 0..100 {
            assert!(!limiter.check_at("a", EventKind::SelectionChange, i).is_limited());
        }
        assert!(limiter.state("a", EventKind::SelectionChange).is_none());
    }

    #[test]
    fn clear_discards_all_windows_of_a_client() {
        let limiter = limiter(1, 60_000);
        assert!(!limiter.check_at("a", EventKind::ContentChange, 0).is_limited());
        assert!(limiter.check_at("a", EventKind::ContentChange, 1).is_limited());
        assert_eq!(limiter.tracked_clients(), 1);

        limiter.clear("a");
        assert!(limiter.state("a", EventKind::ContentChange).is_none());
        assert_eq!(limiter.tracked_clients(), 0);
        assert!(!limiter.check_at("a", EventKind::ContentChange, 2).is_limited());
    }
}
