//! Per-provider circuit breaker (§3.6, §4.3).
//!
//! Three states gate traffic to a provider: `closed` admits everything,
//! `open` rejects everything until a cooldown elapses, `half-open` probes
//! with live traffic and closes again after `successThreshold` consecutive
//! successes. One breaker instance per provider id (§3.6), held in a
//! registry so `services::transport` can look one up by provider without
//! threading it through every call.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::domain::error::CircuitOpenError;
use crate::domain::models::CircuitBreakerConfig;

/// Admission state of a single provider's breaker (§3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half_open",
            Self::Open => "open",
        }
    }
}

/// Point-in-time snapshot of one provider's breaker, for the report
/// synthesizer's operational aggregation (SPEC_FULL §11).
#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// One provider's breaker state (§3.6). Transitions are driven entirely by
/// `record_success`/`record_failure`/`allow_request` below; nothing else
/// mutates these fields.
#[derive(Debug, Clone)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            opened_at: None,
        }
    }
}

/// Registry of per-provider breakers (§3.6: "per-provider instance"). A
/// single instance is created at process init (§9: "Global state ... a
/// single initialization site") and shared by every transport call.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Breaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, breakers: RwLock::new(HashMap::new()) }
    }

    /// Tear down all breaker state, for test isolation (§9: explicit
    /// `reset()`, no implicit construction on first access).
    pub fn reset(&self) {
        self.breakers.write().expect("breaker registry lock poisoned").clear();
    }

    /// Check whether a request to `provider` may proceed right now (§4.3).
    /// A first request after `cooldownMs` transitions `open -> half-open`
    /// and is admitted as the probe.
    pub fn allow_request(&self, provider: &str, now: DateTime<Utc>) -> Result<(), CircuitOpenError> {
        let mut breakers = self.breakers.write().expect("breaker registry lock poisoned");
        let breaker = breakers.entry(provider.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let opened_at = breaker.opened_at.unwrap_or(now);
                let cooldown = chrono::Duration::milliseconds(self.config.cooldown_ms as i64);
                let retry_after = opened_at + cooldown;
                if now >= retry_after {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.consecutive_successes = 0;
                    Ok(())
                } else {
                    Err(CircuitOpenError { provider: provider.to_string(), retry_after })
                }
            }
        }
    }

    /// Record a successful call (§3.6, §4.3).
    pub fn record_success(&self, provider: &str) {
        let mut breakers = self.breakers.write().expect("breaker registry lock poisoned");
        let breaker = breakers.entry(provider.to_string()).or_insert_with(Breaker::new);
        match breaker.state {
            CircuitState::Closed => {
                breaker.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                breaker.consecutive_successes += 1;
                if breaker.consecutive_successes >= self.config.success_threshold {
                    breaker.state = CircuitState::Closed;
                    breaker.consecutive_failures = 0;
                    breaker.consecutive_successes = 0;
                    breaker.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call (§3.6, §4.3).
    pub fn record_failure(&self, provider: &str, now: DateTime<Utc>) {
        let mut breakers = self.breakers.write().expect("breaker registry lock poisoned");
        let breaker = breakers.entry(provider.to_string()).or_insert_with(Breaker::new);
        breaker.last_failure_at = Some(now);
        match breaker.state {
            CircuitState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                // Any half-open failure reopens and resets the cooldown
                // timer (§3.6); `failureThreshold` is not reconsidered
                // until the breaker closes again (P9).
                breaker.state = CircuitState::Open;
                breaker.opened_at = Some(now);
                breaker.consecutive_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn stats(&self, provider: &str) -> CircuitStats {
        let breakers = self.breakers.read().expect("breaker registry lock poisoned");
        match breakers.get(provider) {
            Some(b) => CircuitStats {
                provider: provider.to_string(),
                state: b.state,
                consecutive_failures: b.consecutive_failures,
                consecutive_successes: b.consecutive_successes,
                last_failure_at: b.last_failure_at,
            },
            None => CircuitStats {
                provider: provider.to_string(),
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
            },
        }
    }

    pub fn all_stats(&self) -> Vec<CircuitStats> {
        let breakers = self.breakers.read().expect("breaker registry lock poisoned");
        breakers.keys().map(|p| self.stats(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitBreakerConfig { failure_threshold: 2, cooldown_ms: 1000, success_threshold: 1 })
    }

    #[test]
    fn closed_admits_requests_and_resets_on_success() {
        let reg = registry();
        let t0 = Utc::now();
        reg.record_failure("openai", t0);
        reg.record_success("openai");
        assert_eq!(reg.stats("openai").consecutive_failures, 0);
        assert!(reg.allow_request("openai", t0).is_ok());
    }

    #[test]
    fn seed_scenario_s4_circuit_breaker_lifecycle() {
        let reg = registry();
        let t0 = Utc::now();
        reg.record_failure("openai", t0);
        reg.record_failure("openai", t0);
        assert_eq!(reg.stats("openai").state, CircuitState::Open);

        let rejected = reg.allow_request("openai", t0 + chrono::Duration::milliseconds(500));
        assert!(rejected.is_err());

        let admitted = reg.allow_request("openai", t0 + chrono::Duration::milliseconds(1100));
        assert!(admitted.is_ok());
        assert_eq!(reg.stats("openai").state, CircuitState::HalfOpen);

        reg.record_success("openai");
        assert_eq!(reg.stats("openai").state, CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_resets_cooldown() {
        let reg = registry();
        let t0 = Utc::now();
        reg.record_failure("anthropic", t0);
        reg.record_failure("anthropic", t0);
        let t1 = t0 + chrono::Duration::milliseconds(1100);
        reg.allow_request("anthropic", t1).unwrap();
        assert_eq!(reg.stats("anthropic").state, CircuitState::HalfOpen);

        reg.record_failure("anthropic", t1);
        assert_eq!(reg.stats("anthropic").state, CircuitState::Open);
        // Cooldown restarted from t1, not t0.
        assert!(reg.allow_request("anthropic", t1 + chrono::Duration::milliseconds(500)).is_err());
    }

    #[test]
    fn open_error_carries_remaining_cooldown() {
        let reg = registry();
        let t0 = Utc::now();
        reg.record_failure("openai", t0);
        reg.record_failure("openai", t0);
        let err = reg.allow_request("openai", t0 + chrono::Duration::milliseconds(100)).unwrap_err();
        assert_eq!(err.provider, "openai");
        assert!(err.retry_after > t0);
    }

    #[test]
    fn unknown_provider_starts_closed() {
        let reg = registry();
        assert_eq!(reg.stats("never-seen").state, CircuitState::Closed);
        assert!(reg.allow_request("never-seen", Utc::now()).is_ok());
    }

    #[test]
    fn reset_clears_all_breaker_state() {
        let reg = registry();
        let t0 = Utc::now();
        reg.record_failure("openai", t0);
        reg.record_failure("openai", t0);
        reg.reset();
        assert_eq!(reg.stats("openai").state, CircuitState::Closed);
    }
}
