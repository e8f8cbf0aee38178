//! Consecutive-failure circuit breaker.
//!
//! Closed/open only: there is no half-open probe. Once `should_stop` is true
//! it stays true until `record_success` or `reset` is called, and the loop
//! treats a trip as terminal.

use serde::Serialize;

/// Snapshot of breaker state for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub consecutive_failures: u32,
    pub max_failures: u32,
    pub should_stop: bool,
    /// Human-readable trip reason; empty while the breaker is closed.
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    max_failures: u32,
    consecutive_failures: u32,
    last_failure_reason: Option<String>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            consecutive_failures: 0,
            last_failure_reason: None,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_failure_reason = None;
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let reason = reason.into();
        self.last_failure_reason = (!reason.is_empty()).then_some(reason);
    }

    pub fn should_stop(&self) -> bool {
        self.consecutive_failures >= self.max_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure_reason(&self) -> Option<&str> {
        self.last_failure_reason.as_deref()
    }

    pub fn status(&self) -> BreakerStatus {
        let should_stop = self.should_stop();
        let mut reason = String::new();
        if should_stop {
            reason = format!(
                "Circuit breaker tripped after {} consecutive failures",
                self.consecutive_failures
            );
            if let Some(last) = &self.last_failure_reason {
                reason.push_str(": ");
                reason.push_str(last);
            }
        }
        BreakerStatus {
            consecutive_failures: self.consecutive_failures,
            max_failures: self.max_failures,
            should_stop,
            reason,
        }
    }

    pub fn reset(&mut self) {
        self.record_success();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_max_consecutive_failures() {
        let mut breaker = CircuitBreaker::new(3);
        breaker.record_failure("no_progress");
        breaker.record_failure("no_progress");
        assert!(!breaker.should_stop());
        breaker.record_failure("timeout");
        assert!(breaker.should_stop());

        let status = breaker.status();
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(
            status.reason,
            "Circuit breaker tripped after 3 consecutive failures: timeout"
        );
    }

    #[test]
    fn success_requires_fresh_run_of_failures() {
        let mut breaker = CircuitBreaker::new(2);
        breaker.record_failure("exit_code_1");
        breaker.record_success();
        breaker.record_failure("exit_code_1");
        assert!(!breaker.should_stop());
        assert_eq!(breaker.last_failure_reason(), Some("exit_code_1"));
        breaker.record_failure("exit_code_1");
        assert!(breaker.should_stop());
    }

    #[test]
    fn stays_tripped_until_reset() {
        let mut breaker = CircuitBreaker::new(1);
        breaker.record_failure("");
        assert!(breaker.should_stop());
        assert!(breaker.should_stop());
        assert_eq!(
            breaker.status().reason,
            "Circuit breaker tripped after 1 consecutive failures"
        );

        breaker.reset();
        assert!(!breaker.should_stop());
        assert_eq!(breaker.status().reason, "");
        assert_eq!(breaker.last_failure_reason(), None);
    }
}
