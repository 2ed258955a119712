//! Per-model health accounting: counters, failure classification, cooldown
//! advice and the suggested-state machine behind the admin dashboards.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::util::truncate;

/// Retained failure events in the global ring.
const FAILURE_RING_CAP: usize = 200;

/// Stored failure messages are truncated to this many characters.
const FAILURE_MESSAGE_CAP: usize = 1200;

/// Attempts required before the failure rate can mark a model degraded.
const DEGRADED_MIN_ATTEMPTS: u64 = 6;

/// Cooldown multiplier ceiling.
const COOLDOWN_MULTIPLIER_CAP: u64 = 8;

/// Classified failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    CapacityExhausted,
    QuotaExhausted,
    Timeout,
    Auth,
    ProviderExit,
    Config,
    InvalidModel,
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::CapacityExhausted => "capacity_exhausted",
            FailureKind::QuotaExhausted => "quota_exhausted",
            FailureKind::Timeout => "timeout",
            FailureKind::Auth => "auth",
            FailureKind::ProviderExit => "provider_exit",
            FailureKind::Config => "config",
            FailureKind::InvalidModel => "invalid_model",
            FailureKind::Unknown => "unknown",
        }
    }
}

/// Map an error message to a failure kind. Rules are checked in order and
/// the first match wins, so a message mentioning both quota and timeout
/// classifies as quota.
pub fn classify_failure(message: &str) -> FailureKind {
    let message = message.to_lowercase();
    let matches_any = |patterns: &[&str]| patterns.iter().any(|p| message.contains(p));

    if message.contains("unknown model:") {
        FailureKind::InvalidModel
    } else if matches_any(&[
        "fallback model not found",
        "duplicate model id",
        "does not expose model",
    ]) {
        FailureKind::Config
    } else if matches_any(&[
        "insufficient_quota",
        "quota",
        "billing",
        "credit balance",
        "out of credits",
    ]) {
        FailureKind::QuotaExhausted
    } else if matches_any(&[
        "resource_exhausted",
        "capacity",
        "model exhausted",
        "overloaded",
        "no available",
        "temporarily unavailable",
    ]) {
        FailureKind::CapacityExhausted
    } else if matches_any(&[
        "rate limit",
        "too many requests",
        "status code: 429",
        "http 429",
        "retry later",
    ]) {
        FailureKind::RateLimited
    } else if matches_any(&["timed out", "timeout"]) {
        FailureKind::Timeout
    } else if matches_any(&[
        "unauthorized",
        "forbidden",
        "invalid api key",
        "authentication",
        "not authenticated",
        "permission denied",
        "access denied",
    ]) {
        FailureKind::Auth
    } else if message.contains("provider command") {
        FailureKind::ProviderExit
    } else {
        FailureKind::Unknown
    }
}

fn base_cooldown_secs(kind: FailureKind) -> u64 {
    match kind {
        FailureKind::RateLimited => 60,
        FailureKind::CapacityExhausted => 120,
        FailureKind::QuotaExhausted => 3600,
        FailureKind::Timeout => 30,
        FailureKind::Auth => 600,
        _ => 0,
    }
}

/// Advisory state derived from a model's recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Healthy,
    Degraded,
    Cooldown,
    RateLimited,
    CapacityExhausted,
    QuotaExhausted,
    AuthBlocked,
}

#[derive(Debug, Default)]
struct ModelStats {
    provider_id: String,
    provider_model: String,
    attempts: u64,
    successes: u64,
    failures: u64,
    failures_by_kind: HashMap<FailureKind, u64>,
    consecutive_failures: u64,
    consecutive_rate_limited: u64,
    consecutive_capacity_exhausted: u64,
    consecutive_quota_exhausted: u64,
    total_attempt_ms: u64,
    total_success_ms: u64,
    last_attempt_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_failure_kind: Option<FailureKind>,
    last_failure_message: Option<String>,
    fallback_in: u64,
    fallback_out: u64,
}

impl ModelStats {
    fn consecutive_for(&self, kind: FailureKind) -> u64 {
        match kind {
            FailureKind::RateLimited => self.consecutive_rate_limited,
            FailureKind::CapacityExhausted => self.consecutive_capacity_exhausted,
            FailureKind::QuotaExhausted => self.consecutive_quota_exhausted,
            _ => self.consecutive_failures,
        }
    }

    fn cooldown_seconds(&self, now: DateTime<Utc>) -> u64 {
        let (Some(kind), Some(failed_at)) = (self.last_failure_kind, self.last_failure_at) else {
            return 0;
        };
        let base = base_cooldown_secs(kind);
        if base == 0 {
            return 0;
        }
        let multiplier = self.consecutive_for(kind).clamp(1, COOLDOWN_MULTIPLIER_CAP);
        let until = failed_at + chrono::Duration::milliseconds((base * 1000 * multiplier) as i64);
        let remaining_ms = (until - now).num_milliseconds();
        if remaining_ms <= 0 {
            0
        } else {
            (remaining_ms as u64).div_ceil(1000)
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.failures as f64 / self.attempts as f64
        }
    }

    fn suggested_state(&self, cooldown_seconds: u64) -> ModelState {
        if cooldown_seconds > 0 {
            return match self.last_failure_kind {
                Some(FailureKind::RateLimited) => ModelState::RateLimited,
                Some(FailureKind::CapacityExhausted) => ModelState::CapacityExhausted,
                Some(FailureKind::QuotaExhausted) => ModelState::QuotaExhausted,
                Some(FailureKind::Auth) => ModelState::AuthBlocked,
                _ => ModelState::Cooldown,
            };
        }
        if self.attempts >= DEGRADED_MIN_ATTEMPTS && self.failure_rate() >= 0.5 {
            ModelState::Degraded
        } else {
            ModelState::Healthy
        }
    }

    fn snapshot(&self, model_id: &str, now: DateTime<Utc>) -> ModelSnapshot {
        let cooldown_seconds_remaining = self.cooldown_seconds(now);
        let finished = self.successes + self.failures;
        ModelSnapshot {
            model_id: model_id.to_string(),
            provider_id: self.provider_id.clone(),
            provider_model: self.provider_model.clone(),
            attempts: self.attempts,
            successes: self.successes,
            failures: self.failures,
            failure_rate: self.failure_rate(),
            failures_by_kind: self
                .failures_by_kind
                .iter()
                .map(|(kind, count)| (kind.as_str().to_string(), *count))
                .collect(),
            consecutive_failures: self.consecutive_failures,
            consecutive_rate_limited: self.consecutive_rate_limited,
            consecutive_capacity_exhausted: self.consecutive_capacity_exhausted,
            consecutive_quota_exhausted: self.consecutive_quota_exhausted,
            avg_attempt_ms: if finished == 0 {
                0
            } else {
                self.total_attempt_ms / finished
            },
            avg_success_ms: if self.successes == 0 {
                0
            } else {
                self.total_success_ms / self.successes
            },
            last_attempt_at: self.last_attempt_at.map(|t| t.to_rfc3339()),
            last_success_at: self.last_success_at.map(|t| t.to_rfc3339()),
            last_failure_at: self.last_failure_at.map(|t| t.to_rfc3339()),
            last_failure_kind: self.last_failure_kind,
            last_failure_message: self.last_failure_message.clone(),
            fallback_in: self.fallback_in,
            fallback_out: self.fallback_out,
            cooldown_seconds_remaining,
            state: self.suggested_state(cooldown_seconds_remaining),
        }
    }
}

/// One entry in the recent-failure ring.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEvent {
    pub model_id: String,
    pub provider_id: String,
    pub kind: FailureKind,
    pub message: String,
    pub at: String,
}

/// Point-in-time view of one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSnapshot {
    pub model_id: String,
    pub provider_id: String,
    pub provider_model: String,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub failure_rate: f64,
    pub failures_by_kind: HashMap<String, u64>,
    pub consecutive_failures: u64,
    pub consecutive_rate_limited: u64,
    pub consecutive_capacity_exhausted: u64,
    pub consecutive_quota_exhausted: u64,
    pub avg_attempt_ms: u64,
    pub avg_success_ms: u64,
    pub last_attempt_at: Option<String>,
    pub last_success_at: Option<String>,
    pub last_failure_at: Option<String>,
    pub last_failure_kind: Option<FailureKind>,
    pub last_failure_message: Option<String>,
    pub fallback_in: u64,
    pub fallback_out: u64,
    pub cooldown_seconds_remaining: u64,
    pub state: ModelState,
}

/// Point-in-time view of the whole tracker.
#[derive(Debug, Serialize)]
pub struct TrackerSnapshot {
    pub started_at: String,
    pub fallback_transitions: u64,
    pub models: Vec<ModelSnapshot>,
    pub recent_failures: Vec<FailureEvent>,
}

/// Process-wide mutable health state. Writers take short critical sections
/// per event; snapshot reads copy out a coherent view under the same lock.
pub struct HealthTracker {
    started_at: DateTime<Utc>,
    fallback_transitions: AtomicU64,
    models: RwLock<HashMap<String, ModelStats>>,
    recent_failures: RwLock<VecDeque<FailureEvent>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            fallback_transitions: AtomicU64::new(0),
            models: RwLock::new(HashMap::new()),
            recent_failures: RwLock::new(VecDeque::new()),
        }
    }

    /// Record the start of one attempt against `model_id`.
    pub async fn record_attempt(
        &self,
        model_id: &str,
        requested_model_id: &str,
        provider_id: &str,
        provider_model: &str,
        attempt_index: usize,
    ) {
        let mut models = self.models.write().await;
        let stats = models.entry(model_id.to_string()).or_default();
        stats.attempts += 1;
        stats.provider_id = provider_id.to_string();
        stats.provider_model = provider_model.to_string();
        stats.last_attempt_at = Some(Utc::now());
        debug!(
            model_id,
            requested_model_id, provider_id, attempt_index, "recorded model attempt"
        );
    }

    /// Record a successful attempt; resets every consecutive-failure counter.
    pub async fn record_success(&self, model_id: &str, duration: Duration) {
        let mut models = self.models.write().await;
        let stats = models.entry(model_id.to_string()).or_default();
        stats.successes += 1;
        let elapsed_ms = duration.as_millis() as u64;
        stats.total_attempt_ms += elapsed_ms;
        stats.total_success_ms += elapsed_ms;
        stats.consecutive_failures = 0;
        stats.consecutive_rate_limited = 0;
        stats.consecutive_capacity_exhausted = 0;
        stats.consecutive_quota_exhausted = 0;
        stats.last_success_at = Some(Utc::now());
    }

    /// Record a failed attempt and return its classified kind.
    pub async fn record_failure(
        &self,
        model_id: &str,
        provider_id: &str,
        duration: Duration,
        message: &str,
    ) -> FailureKind {
        let kind = classify_failure(message);
        let now = Utc::now();
        let stored_message = truncate(message, FAILURE_MESSAGE_CAP);

        {
            let mut models = self.models.write().await;
            let stats = models.entry(model_id.to_string()).or_default();
            stats.failures += 1;
            *stats.failures_by_kind.entry(kind).or_insert(0) += 1;
            stats.consecutive_failures += 1;
            match kind {
                FailureKind::RateLimited => {
                    stats.consecutive_rate_limited += 1;
                    stats.consecutive_capacity_exhausted = 0;
                    stats.consecutive_quota_exhausted = 0;
                }
                FailureKind::CapacityExhausted => {
                    stats.consecutive_rate_limited = 0;
                    stats.consecutive_capacity_exhausted += 1;
                    stats.consecutive_quota_exhausted = 0;
                }
                FailureKind::QuotaExhausted => {
                    stats.consecutive_rate_limited = 0;
                    stats.consecutive_capacity_exhausted = 0;
                    stats.consecutive_quota_exhausted += 1;
                }
                _ => {
                    stats.consecutive_rate_limited = 0;
                    stats.consecutive_capacity_exhausted = 0;
                    stats.consecutive_quota_exhausted = 0;
                }
            }
            stats.total_attempt_ms += duration.as_millis() as u64;
            stats.last_failure_at = Some(now);
            stats.last_failure_kind = Some(kind);
            stats.last_failure_message = Some(stored_message.clone());
        }

        let mut ring = self.recent_failures.write().await;
        ring.push_back(FailureEvent {
            model_id: model_id.to_string(),
            provider_id: provider_id.to_string(),
            kind,
            message: stored_message,
            at: now.to_rfc3339(),
        });
        while ring.len() > FAILURE_RING_CAP {
            ring.pop_front();
        }

        kind
    }

    /// Record one fallback transition between two models.
    pub async fn record_fallback(&self, from_model_id: &str, to_model_id: &str) {
        let mut models = self.models.write().await;
        models
            .entry(from_model_id.to_string())
            .or_default()
            .fallback_out += 1;
        models
            .entry(to_model_id.to_string())
            .or_default()
            .fallback_in += 1;
        self.fallback_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        let now = Utc::now();
        let models = self.models.read().await;
        let mut snapshots: Vec<ModelSnapshot> = models
            .iter()
            .map(|(model_id, stats)| stats.snapshot(model_id, now))
            .collect();
        snapshots.sort_by(|a, b| a.model_id.cmp(&b.model_id));

        let recent_failures = self.recent_failures.read().await.iter().cloned().collect();

        TrackerSnapshot {
            started_at: self.started_at.to_rfc3339(),
            fallback_transitions: self.fallback_transitions.load(Ordering::Relaxed),
            models: snapshots,
            recent_failures,
        }
    }

    pub async fn snapshot_model(&self, model_id: &str) -> Option<ModelSnapshot> {
        let models = self.models.read().await;
        models
            .get(model_id)
            .map(|stats| stats.snapshot(model_id, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_follows_rule_order() {
        assert_eq!(
            classify_failure("unknown model: m9"),
            FailureKind::InvalidModel
        );
        assert_eq!(
            classify_failure("Fallback model not found: m9"),
            FailureKind::Config
        );
        assert_eq!(
            classify_failure("provider 'p' does not expose model 'm'"),
            FailureKind::Config
        );
        assert_eq!(
            classify_failure("your credit balance is exhausted"),
            FailureKind::QuotaExhausted
        );
        assert_eq!(
            classify_failure("model exhausted, no available backends"),
            FailureKind::CapacityExhausted
        );
        assert_eq!(
            classify_failure("HTTP 429 Too Many Requests"),
            FailureKind::RateLimited
        );
        assert_eq!(
            classify_failure("provider command timed out after 1000 ms"),
            FailureKind::Timeout
        );
        assert_eq!(
            classify_failure("401 Unauthorized: invalid api key"),
            FailureKind::Auth
        );
        assert_eq!(
            classify_failure("provider command exited with status 3: boom"),
            FailureKind::ProviderExit
        );
        assert_eq!(classify_failure("something odd"), FailureKind::Unknown);
    }

    #[test]
    fn overlapping_rules_resolve_by_order() {
        // quota is checked before timeout
        assert_eq!(
            classify_failure("quota refresh timed out"),
            FailureKind::QuotaExhausted
        );
        // rate limit is checked before timeout
        assert_eq!(
            classify_failure("rate limit window timeout"),
            FailureKind::RateLimited
        );
    }

    #[tokio::test]
    async fn success_resets_consecutive_counters() {
        let tracker = HealthTracker::new();
        tracker.record_attempt("m1", "m1", "p", "m1", 0).await;
        tracker
            .record_failure("m1", "p", Duration::from_millis(5), "HTTP 429")
            .await;
        tracker.record_attempt("m1", "m1", "p", "m1", 0).await;
        tracker.record_success("m1", Duration::from_millis(7)).await;

        let snapshot = tracker.snapshot_model("m1").await.unwrap();
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.consecutive_rate_limited, 0);
        assert_eq!(snapshot.state, ModelState::Healthy);
        assert_eq!(snapshot.failures_by_kind.get("rate_limited"), Some(&1));
    }

    #[tokio::test]
    async fn failure_counters_and_ring_accumulate() {
        let tracker = HealthTracker::new();
        for _ in 0..3 {
            tracker.record_attempt("m1", "m1", "p", "m1", 0).await;
            let kind = tracker
                .record_failure("m1", "p", Duration::from_millis(2), "HTTP 429 again")
                .await;
            assert_eq!(kind, FailureKind::RateLimited);
        }

        let snapshot = tracker.snapshot().await;
        let model = &snapshot.models[0];
        assert_eq!(model.failures, 3);
        assert_eq!(model.consecutive_failures, 3);
        assert_eq!(model.consecutive_rate_limited, 3);
        assert_eq!(model.state, ModelState::RateLimited);
        assert!(model.cooldown_seconds_remaining >= 60);
        assert_eq!(snapshot.recent_failures.len(), 3);

        // attempts = successes + failures + ongoing
        assert_eq!(
            model.attempts,
            model.successes + model.failures
        );
    }

    #[tokio::test]
    async fn kind_switch_resets_other_consecutive_counters() {
        let tracker = HealthTracker::new();
        tracker.record_attempt("m1", "m1", "p", "m1", 0).await;
        tracker
            .record_failure("m1", "p", Duration::ZERO, "HTTP 429")
            .await;
        tracker.record_attempt("m1", "m1", "p", "m1", 0).await;
        tracker
            .record_failure("m1", "p", Duration::ZERO, "model exhausted")
            .await;

        let snapshot = tracker.snapshot_model("m1").await.unwrap();
        assert_eq!(snapshot.consecutive_failures, 2);
        assert_eq!(snapshot.consecutive_rate_limited, 0);
        assert_eq!(snapshot.consecutive_capacity_exhausted, 1);
    }

    #[tokio::test]
    async fn fallback_transitions_are_counted_on_both_models() {
        let tracker = HealthTracker::new();
        tracker.record_fallback("m1", "m2").await;
        tracker.record_fallback("m1", "m3").await;

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.fallback_transitions, 2);
        let m1 = snapshot.models.iter().find(|m| m.model_id == "m1").unwrap();
        let m2 = snapshot.models.iter().find(|m| m.model_id == "m2").unwrap();
        assert_eq!(m1.fallback_out, 2);
        assert_eq!(m2.fallback_in, 1);
    }

    #[tokio::test]
    async fn degraded_needs_enough_attempts_and_failures() {
        let tracker = HealthTracker::new();
        for _ in 0..3 {
            tracker.record_attempt("m1", "m1", "p", "m1", 0).await;
            tracker
                .record_failure("m1", "p", Duration::ZERO, "boom")
                .await;
            tracker.record_attempt("m1", "m1", "p", "m1", 0).await;
            tracker.record_success("m1", Duration::ZERO).await;
        }

        let snapshot = tracker.snapshot_model("m1").await.unwrap();
        // unknown failures carry no cooldown, 6 attempts at 50% failure rate
        assert_eq!(snapshot.cooldown_seconds_remaining, 0);
        assert_eq!(snapshot.state, ModelState::Degraded);
    }

    #[test]
    fn cooldown_multiplier_is_capped() {
        let mut stats = ModelStats {
            consecutive_rate_limited: 100,
            last_failure_kind: Some(FailureKind::RateLimited),
            ..Default::default()
        };
        let now = Utc::now();
        stats.last_failure_at = Some(now);

        // 60s base * capped multiplier of 8
        assert_eq!(stats.cooldown_seconds(now), 480);
    }

    #[test]
    fn cooldown_decays_and_expires() {
        let now = Utc::now();
        let stats = ModelStats {
            consecutive_failures: 1,
            last_failure_kind: Some(FailureKind::Timeout),
            last_failure_at: Some(now - chrono::Duration::seconds(10)),
            ..Default::default()
        };
        // 30s base, 10s elapsed
        assert_eq!(stats.cooldown_seconds(now), 20);

        let expired = ModelStats {
            consecutive_failures: 1,
            last_failure_kind: Some(FailureKind::Timeout),
            last_failure_at: Some(now - chrono::Duration::seconds(120)),
            ..Default::default()
        };
        assert_eq!(expired.cooldown_seconds(now), 0);
    }

    #[test]
    fn auth_cooldown_maps_to_auth_blocked() {
        let now = Utc::now();
        let stats = ModelStats {
            attempts: 1,
            failures: 1,
            consecutive_failures: 1,
            last_failure_kind: Some(FailureKind::Auth),
            last_failure_at: Some(now),
            ..Default::default()
        };
        let cooldown = stats.cooldown_seconds(now);
        assert_eq!(cooldown, 600);
        assert_eq!(stats.suggested_state(cooldown), ModelState::AuthBlocked);
    }

    #[tokio::test]
    async fn long_failure_messages_are_truncated() {
        let tracker = HealthTracker::new();
        let message = "x".repeat(5000);
        tracker.record_attempt("m1", "m1", "p", "m1", 0).await;
        tracker
            .record_failure("m1", "p", Duration::ZERO, &message)
            .await;

        let snapshot = tracker.snapshot_model("m1").await.unwrap();
        assert_eq!(
            snapshot.last_failure_message.unwrap().len(),
            FAILURE_MESSAGE_CAP
        );
    }
}
