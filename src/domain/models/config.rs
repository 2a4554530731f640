//! Configuration surface (§6.4). Layered via `figment` in
//! `infrastructure::config` (YAML file + `NIDRA_`-prefixed env overrides);
//! this module only owns the shapes and their defaults.

use serde::{Deserialize, Serialize};

use super::plan::Strategy;

/// Top-level configuration root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub svapna: SvapnaConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            svapna: SvapnaConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Scheduler policy defaults (§6.4). `strategy` has no universal default in
/// the spec; `least-loaded` is chosen here as the least surprising baseline
/// since it requires no caller-supplied routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,

    #[serde(default)]
    pub tolerate_failures: bool,

    #[serde(default)]
    pub max_failures: Option<u32>,

    #[serde(default)]
    pub escalate_to_human: bool,
}

fn default_strategy() -> Strategy {
    Strategy::LeastLoaded
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            tolerate_failures: true,
            max_failures: None,
            escalate_to_human: false,
        }
    }
}

/// Retry policy knobs (§6.4, §4.1.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}
const fn default_base_ms() -> u64 {
    500
}
const fn default_cap_ms() -> u64 {
    30_000
}
const fn default_jitter_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_ms: default_base_ms(),
            cap_ms: default_cap_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Circuit breaker knobs (§6.4, §4.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

const fn default_failure_threshold() -> u32 {
    5
}
const fn default_cooldown_ms() -> u64 {
    30_000
}
const fn default_success_threshold() -> u32 {
    2
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Memory consolidation ("svapna") knobs (§6.4, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SvapnaConfig {
    #[serde(default = "default_max_sessions_per_cycle")]
    pub max_sessions_per_cycle: u32,
    #[serde(default = "default_surprise_threshold")]
    pub surprise_threshold: f64,
    #[serde(default = "default_min_pattern_frequency")]
    pub min_pattern_frequency: u32,
    #[serde(default = "default_min_sequence_length")]
    pub min_sequence_length: u32,
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
    /// `None` consolidates across all projects.
    #[serde(default)]
    pub project: Option<String>,
}

const fn default_max_sessions_per_cycle() -> u32 {
    50
}
const fn default_surprise_threshold() -> f64 {
    0.7
}
const fn default_min_pattern_frequency() -> u32 {
    3
}
const fn default_min_sequence_length() -> u32 {
    2
}
const fn default_min_success_rate() -> f64 {
    0.8
}

impl Default for SvapnaConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_cycle: default_max_sessions_per_cycle(),
            surprise_threshold: default_surprise_threshold(),
            min_pattern_frequency: default_min_pattern_frequency(),
            min_sequence_length: default_min_sequence_length(),
            min_success_rate: default_min_success_rate(),
            project: None,
        }
    }
}

/// Database configuration (ambient stack, §10.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".nidra/nidra.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path(), max_connections: default_max_connections() }
    }
}

/// Logging configuration (ambient stack, §10.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            retention_days: default_retention_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_defaults_match_spec_table() {
        let r = RetryConfig::default();
        assert_eq!(r.max_attempts, 3);
        assert_eq!(r.base_ms, 500);
        assert_eq!(r.cap_ms, 30_000);
        assert_eq!(r.jitter_ms, 250);
    }

    #[test]
    fn circuit_breaker_defaults_match_spec_table() {
        let c = CircuitBreakerConfig::default();
        assert_eq!(c.failure_threshold, 5);
        assert_eq!(c.cooldown_ms, 30_000);
        assert_eq!(c.success_threshold, 2);
    }

    #[test]
    fn svapna_defaults_match_spec_table() {
        let s = SvapnaConfig::default();
        assert_eq!(s.max_sessions_per_cycle, 50);
        assert_eq!(s.surprise_threshold, 0.7);
        assert_eq!(s.min_pattern_frequency, 3);
        assert_eq!(s.min_sequence_length, 2);
        assert_eq!(s.min_success_rate, 0.8);
        assert!(s.project.is_none());
    }

    #[test]
    fn scheduler_default_tolerates_failures_uncapped() {
        let s = SchedulerConfig::default();
        assert!(s.tolerate_failures);
        assert!(s.max_failures.is_none());
        assert!(!s.escalate_to_human);
    }
}
