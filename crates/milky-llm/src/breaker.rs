use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{info, warn};

/// Circuit breaker state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Process-wide consecutive-failure guard.
///
/// Counts failed attempts across all calls. Once the count reaches the
/// threshold the circuit opens and stays open until a success is recorded,
/// [`CircuitBreaker::reset`] is called, or (when a cooldown is configured)
/// the cooldown elapses and a single half-open probe is admitted.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Option<Duration>,
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Option<Duration>) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Whether an attempt may be issued right now.
    pub fn allow(&self) -> bool {
        let state = self.state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open { since } => match self.cooldown {
                Some(cooldown) if since.elapsed() >= cooldown => {
                    drop(state);
                    *self.state.write() = CircuitState::HalfOpen;
                    info!("circuit breaker half-open, admitting probe");
                    true
                }
                _ => false,
            },
        }
    }

    /// Any success closes the circuit and zeroes the counter.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful request");
            *state = CircuitState::Closed;
        }
    }

    /// Count one failed attempt. Returns true when this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < self.threshold {
            return false;
        }
        let mut state = self.state.write();
        if matches!(*state, CircuitState::Closed | CircuitState::HalfOpen) {
            warn!(
                failures,
                threshold = self.threshold,
                "circuit breaker opened after {} consecutive failures",
                failures
            );
            *state = CircuitState::Open {
                since: Instant::now(),
            };
            return true;
        }
        false
    }

    /// Operator override: close the circuit and forget past failures.
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.state.write() = CircuitState::Closed;
        info!("circuit breaker reset by operator");
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state_name(&self) -> &'static str {
        match &*self.state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}
