//! Error taxonomy (spec.md §7): five kinds, one enum, one exit-code mapping,
//! generalized from the teacher's per-domain `thiserror` enums
//! (`BatteryError`, `ScheduleValidationError`) into a single crate-wide type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// No price data, no telemetry, or stale telemetry. Recovered locally by
    /// writing an IDLE safety record; never propagated as a process exit
    /// failure on its own.
    #[error("required input missing: {0}")]
    InputMissing(String),

    /// HTTP 5xx, timeout, network blip. Retried with backoff by the caller;
    /// surfaced here only once retries are exhausted.
    #[error("transient adapter error: {0}")]
    TransientAdapter(String),

    /// 4xx misauth/forbidden. Not retried.
    #[error("fatal adapter error: {0}")]
    FatalAdapter(String),

    /// Misaligned interval, duplicate (system, interval_start), or an
    /// unknown action value. The ledger remains consistent; this is a
    /// precise, fail-fast signal, not an accumulation point.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Thresholds inverted, missing capacity, or any other startup-time
    /// misconfiguration. The process refuses to start.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ControllerError {
    /// CLI exit code per spec.md §6: `0` success (including no-op), `1`
    /// precondition failure. `InputMissing` on its own is not a precondition
    /// failure — the controller already recovered by writing a safety
    /// record — so it maps to success unless the caller decides otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            ControllerError::InputMissing(_) => 0,
            ControllerError::TransientAdapter(_) => 1,
            ControllerError::FatalAdapter(_) => 1,
            ControllerError::InvariantViolation(_) => 1,
            ControllerError::Configuration(_) => 1,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ControllerError::TransientAdapter(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_and_invariant_errors_exit_nonzero() {
        assert_eq!(ControllerError::FatalAdapter("forbidden".into()).exit_code(), 1);
        assert_eq!(
            ControllerError::InvariantViolation("duplicate".into()).exit_code(),
            1
        );
    }

    #[test]
    fn input_missing_is_recovered_locally() {
        assert_eq!(ControllerError::InputMissing("no price data".into()).exit_code(), 0);
    }

    #[test]
    fn only_transient_adapter_errors_are_retryable() {
        assert!(ControllerError::TransientAdapter("timeout".into()).is_retryable());
        assert!(!ControllerError::FatalAdapter("forbidden".into()).is_retryable());
    }
}
