//! Exponential backoff and the endpoint-level retry policy.

use crate::config::ReconnectOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use switchboard_types::{BridgeError, ErrorCode};

/// Backoff curve: `delay_n = min(max, initial × multiplier^(n-1))`.
///
/// Multipliers below 1.0 are clamped so the delay sequence is always
/// non-decreasing.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
        }
    }

    pub fn from_options(options: &ReconnectOptions) -> Self {
        Self::new(
            Duration::from_millis(options.initial_interval_ms),
            Duration::from_millis(options.max_interval_ms),
            options.backoff_multiplier,
        )
    }

    /// Delay before attempt `n` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial.min(self.max);
        }
        let factor = self.multiplier.powi(attempt as i32 - 1);
        let millis = self.initial.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max.as_millis() as f64 {
            self.max
        } else {
            Duration::from_millis(millis as u64).min(self.max)
        }
    }
}

/// Retry policy applied by the endpoint tool-call pipeline.
///
/// `max_attempts` counts total attempts, including the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable_codes: Vec<ErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retryable_codes: vec![
                ErrorCode::ServiceUnavailable,
                ErrorCode::Timeout,
                ErrorCode::Transport,
                ErrorCode::ToolExecution,
            ],
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, error: &BridgeError) -> bool {
        self.retryable_codes.contains(&error.code())
    }

    /// Delay after failed attempt `n` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Backoff::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
        .delay_for(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_nondecreasing_and_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5), 2.0);
        let delays: Vec<Duration> = (1..=12).map(|n| backoff.delay_for(n)).collect();
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1], "sequence decreased: {delays:?}");
        }
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn backoff_clamps_sub_unit_multipliers() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 0.5);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(100));
    }

    #[test]
    fn backoff_survives_large_exponents() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 10.0);
        assert_eq!(backoff.delay_for(200), Duration::from_secs(60));
    }

    #[test]
    fn backoff_caps_initial_above_max() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(2), 2.0);
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
    }

    #[test]
    fn policy_defaults_match_taxonomy() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&BridgeError::service_unavailable("a")));
        assert!(policy.is_retryable(&BridgeError::timeout("op", 1)));
        assert!(policy.is_retryable(&BridgeError::tool_execution("add", "boom")));
        assert!(policy.is_retryable(&BridgeError::transport("reset")));
        assert!(!policy.is_retryable(&BridgeError::tool_not_found("x")));
        assert!(!policy.is_retryable(&BridgeError::protocol("bad")));
    }

    #[test]
    fn policy_deserializes_code_names() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"maxAttempts": 5, "retryableCodes": ["timeout", "transport"]}"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert!(policy.is_retryable(&BridgeError::transport("reset")));
        assert!(!policy.is_retryable(&BridgeError::service_unavailable("a")));
    }
}
