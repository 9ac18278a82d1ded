//! Circuit breaker guarding planner API calls
//!
//! After `threshold` consecutive failures the breaker opens and calls fail fast
//! until `cooldown` has elapsed; the next call is then let through as a probe.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Too many failures - reject requests immediately
    Open,
    /// Cooldown elapsed - allow a probe request
    HalfOpen,
}

/// Consecutive-failure circuit breaker
///
/// ```
/// use kiln_agent::{CircuitBreaker, CircuitState};
/// use std::time::Duration;
///
/// let cb = CircuitBreaker::new(2, Duration::from_secs(60));
/// cb.record_failure();
/// cb.record_failure();
/// assert_eq!(cb.state(), CircuitState::Open);
/// assert!(!cb.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    failures: AtomicU32,
    /// Millis since `epoch` of the most recent failure
    last_failure_ms: AtomicU64,
    epoch: Instant,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn since_last_failure(&self) -> Duration {
        let last = self.last_failure_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    pub fn state(&self) -> CircuitState {
        if self.failures.load(Ordering::Acquire) < self.threshold {
            CircuitState::Closed
        } else if self.since_last_failure() >= self.cooldown {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        self.last_failure_ms.store(self.now_ms(), Ordering::Release);
        self.failures.fetch_add(1, Ordering::AcqRel);
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Time left before a probe is allowed; zero unless open
    pub fn retry_after(&self) -> Duration {
        match self.state() {
            CircuitState::Open => self.cooldown.saturating_sub(self.since_last_failure()),
            _ => Duration::ZERO,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}
