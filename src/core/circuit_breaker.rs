//! Per-worker circuit breaker.
//!
//! Three states: `Closed` (normal), `Open` (requests refused), `HalfOpen`
//! (probing recovery). `failure_threshold` consecutive failures open the
//! circuit; once `cooldown` has elapsed since the last recorded failure the
//! next `allow_request` admits a probe; `success_threshold` successes in
//! half-open close it again, and any half-open failure reopens it.

use std::{
    sync::atomic::{AtomicU8, Ordering},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// Time since the last failure before a probe is admitted.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, requests flow through.
    Closed,
    /// Worker considered down, requests are refused.
    Open,
    /// Cool-down elapsed, probes admitted.
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Gate {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Point-in-time view of a breaker, for the router `/stats` payload.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

/// Per-worker three-state health gate.
///
/// Transitions are linearised under one mutex; the current state is also
/// mirrored into an atomic so observers never take the lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    gate: Mutex<Gate>,
    state: AtomicU8,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            gate: Mutex::new(Gate {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
            state: AtomicU8::new(CircuitState::Closed as u8),
        }
    }

    /// Whether a request may be dispatched right now.
    ///
    /// In `Open`, the first call after the cool-down elapses flips the
    /// breaker to `HalfOpen` and admits the probe. Half-open admission is
    /// deliberately loose: every call in `HalfOpen` is admitted, so a burst
    /// of concurrent probes is possible.
    pub fn allow_request(&self) -> bool {
        let mut gate = self.gate.lock();
        match gate.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = gate
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.cooldown);
                if cooled_down {
                    self.transition(&mut gate, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut gate = self.gate.lock();
        match gate.state {
            CircuitState::HalfOpen => {
                gate.success_count += 1;
                if gate.success_count >= self.config.success_threshold {
                    self.transition(&mut gate, CircuitState::Closed);
                }
            }
            // Isolated failures must not accumulate across successes.
            CircuitState::Closed => gate.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut gate = self.gate.lock();
        gate.last_failure = Some(Instant::now());
        match gate.state {
            CircuitState::HalfOpen => self.transition(&mut gate, CircuitState::Open),
            CircuitState::Closed => {
                gate.failure_count += 1;
                if gate.failure_count >= self.config.failure_threshold {
                    self.transition(&mut gate, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, without taking the transition lock.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let gate = self.gate.lock();
        BreakerSnapshot {
            state: gate.state,
            failure_count: gate.failure_count,
            success_count: gate.success_count,
        }
    }

    fn transition(&self, gate: &mut Gate, new_state: CircuitState) {
        let old_state = gate.state;
        if old_state == new_state {
            return;
        }
        gate.state = new_state;
        match new_state {
            CircuitState::Open => gate.success_count = 0,
            CircuitState::HalfOpen | CircuitState::Closed => {
                gate.failure_count = 0;
                gate.success_count = 0;
            }
        }
        self.state.store(new_state as u8, Ordering::Release);
        info!(from = %old_state, to = %new_state, "circuit breaker transition");
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
