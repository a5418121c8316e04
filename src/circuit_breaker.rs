//! # Circuit Breaker Module
//!
//! Stops the page fetcher from hammering Amazon once requests keep failing
//! (usually because the bot has been served a robot check). While the circuit
//! is open every fetch fails fast with `FetchError::CircuitOpen`, which the
//! scheduler records as `FETCH_ERROR` like any other failed poll.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial request is let through
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(120),
        }
    }
}

/// Observable state of the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker for outgoing page fetches
///
/// ```text
/// CLOSED ──failures ≥ threshold──► OPEN
///    ▲                               │
///    │                         reset timeout
///    │                               ▼
///    └────────success─────────── HALF-OPEN ──failure──► OPEN
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use amazon_stock_tracker::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    ///
    /// let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
    /// assert_eq!(breaker.state(), CircuitState::Closed);
    /// ```
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            config,
        }
    }

    /// Current state, derived from the failure count and the open timestamp
    pub fn state(&self) -> CircuitState {
        let state = self.state.lock();
        match state.opened_at {
            None => CircuitState::Closed,
            Some(opened_at) if opened_at.elapsed() < self.config.reset_timeout => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }

    /// Whether requests should be blocked right now.
    ///
    /// Returns `false` once the reset timeout has elapsed so that one trial
    /// request can check whether the remote side recovered.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);

        let half_open = state
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= self.config.reset_timeout);
        if half_open || state.failure_count >= self.config.failure_threshold {
            // a failed trial request restarts the open window
            state.opened_at = Some(Instant::now());
        }
    }

    /// Record a successful request, closing the circuit
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.failure_count = 0;
        state.opened_at = None;
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }
}
