//! Circuit breaker for unreliable dependency calls.
//!
//! The extraction engine is the dominant cost of a job and the least
//! reliable collaborator. Every extraction call goes through a shared
//! [`CircuitBreaker`] so that a failing engine fails fast instead of tying
//! up workers in doomed calls.

#[allow(clippy::module_inception)]
mod breaker;

pub use breaker::{
    BreakerConfig, BreakerStats, CircuitBreaker, CircuitError, CircuitState,
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_OPEN_MAX_CALLS, DEFAULT_OPEN_TIMEOUT_MS,
};
