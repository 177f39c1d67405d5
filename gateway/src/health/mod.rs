//! Backend health tracking
//!
//! Keeps a circuit breaker per backend kind. The orchestrator consults
//! `before_call` ahead of every backend call and reports the outcome of
//! every attempt through `record`.
//!
//! State machine per backend:
//!
//! - **Closed → Open** after `failure_threshold` consecutive failures
//! - **Open → Half-open** once the cooldown elapses; exactly one probe
//!   call is admitted in half-open
//! - **Half-open → Closed** on probe success, **→ Open** (cooldown reset)
//!   on probe failure
//!
//! Health is advisory, not authoritative: state is purely in-memory and
//! resets on process restart.

use sdk::types::BackendKind;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker state for one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Verdict on whether a backend call may be dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Dispatch the call
    Allowed,

    /// Skip the call and treat it as failed, without incurring latency
    CircuitOpen,
}

#[derive(Debug)]
struct BackendHealth {
    consecutive_failures: u32,
    circuit: CircuitState,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BackendHealth {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            circuit: CircuitState::Closed,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Per-backend circuit breakers shared across all orchestrations
#[derive(Debug)]
pub struct HealthTracker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<HashMap<BackendKind, BackendHealth>>,
}

impl HealthTracker {
    /// Create a tracker with the given threshold and cooldown
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Consult the breaker before dispatching a call to `kind`
    pub fn before_call(&self, kind: BackendKind) -> Gate {
        let mut inner = self.lock();
        let health = inner.entry(kind).or_insert_with(BackendHealth::new);

        match health.circuit {
            CircuitState::Closed => Gate::Allowed,
            CircuitState::Open => {
                let cooled_down = health
                    .opened_at
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);

                if cooled_down {
                    info!("Circuit for {} backend entering half-open", kind);
                    health.circuit = CircuitState::HalfOpen;
                    health.probe_in_flight = true;
                    Gate::Allowed
                } else {
                    Gate::CircuitOpen
                }
            }
            CircuitState::HalfOpen => {
                if health.probe_in_flight {
                    // One probe at a time; everyone else keeps failing fast
                    Gate::CircuitOpen
                } else {
                    health.probe_in_flight = true;
                    Gate::Allowed
                }
            }
        }
    }

    /// Record the outcome of a dispatched call
    ///
    /// Calls skipped because of an open circuit must not be recorded.
    pub fn record(&self, kind: BackendKind, success: bool) {
        let mut inner = self.lock();
        let health = inner.entry(kind).or_insert_with(BackendHealth::new);

        match health.circuit {
            CircuitState::Closed => {
                if success {
                    health.consecutive_failures = 0;
                } else {
                    health.consecutive_failures += 1;
                    if health.consecutive_failures >= self.failure_threshold {
                        warn!(
                            "Circuit for {} backend opened after {} consecutive failures",
                            kind, health.consecutive_failures
                        );
                        health.circuit = CircuitState::Open;
                        health.opened_at = Some(Instant::now());
                    }
                }
            }
            CircuitState::HalfOpen => {
                health.probe_in_flight = false;
                if success {
                    info!("Circuit for {} backend closed after successful probe", kind);
                    health.circuit = CircuitState::Closed;
                    health.consecutive_failures = 0;
                    health.opened_at = None;
                } else {
                    warn!("Probe to {} backend failed, circuit re-opened", kind);
                    health.circuit = CircuitState::Open;
                    health.opened_at = Some(Instant::now());
                }
            }
            // A late result for a call dispatched before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Current circuit state for a backend
    pub fn circuit_state(&self, kind: BackendKind) -> CircuitState {
        self.lock()
            .get(&kind)
            .map(|h| h.circuit)
            .unwrap_or(CircuitState::Closed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BackendKind, BackendHealth>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
