//! Per-service circuit breakers.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: one trial request tests whether the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: recovery_timeout elapsed since the last failure
//! Half-Open → Closed: trial request succeeds
//! Half-Open → Open: trial request fails (timer restarts)
//! ```
//!
//! The state machine, including the single trial slot, lives behind one
//! short, non-async mutex. Checking the state and claiming the trial happen in
//! the same critical section, so concurrent callers racing through Half-Open
//! get exactly one winner. Each trial carries a sequence number; results and
//! releases from an older trial are ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit state of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
    /// Sequence number of the most recently issued trial.
    trial_seq: u64,
}

/// Breaker for a single service.
#[derive(Debug)]
pub struct ServiceCircuit {
    service: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<CircuitInner>,
}

impl ServiceCircuit {
    fn new(service: &str, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            service: service.to_string(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_time: None,
                trial_in_flight: false,
                trial_seq: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission check. `Some(Some(seq))` means the caller holds trial `seq`.
    fn admit(&self) -> Option<Option<u64>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => return Some(None),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_time
                    .map_or(true, |at| at.elapsed() > self.recovery_timeout);
                if !cooled_down {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
            }
            CircuitState::HalfOpen => {}
        }

        if inner.trial_in_flight {
            return None;
        }
        inner.trial_in_flight = true;
        inner.trial_seq += 1;
        Some(Some(inner.trial_seq))
    }

    /// Apply the outcome of a call. `trial` is the sequence number of the
    /// Half-Open trial the caller holds, if any.
    fn record(&self, success: bool, trial: Option<u64>) {
        let mut inner = self.lock();
        self.apply(&mut inner, success, trial);
    }

    /// Apply an outcome reported without a permit. While Half-Open it is
    /// taken to be the result of the trial in flight.
    fn record_untracked(&self, success: bool) {
        let mut inner = self.lock();
        let trial = inner.trial_in_flight.then_some(inner.trial_seq);
        self.apply(&mut inner, success, trial);
    }

    fn apply(&self, inner: &mut CircuitInner, success: bool, trial: Option<u64>) {
        let current_trial = inner.state == CircuitState::HalfOpen
            && inner.trial_in_flight
            && trial == Some(inner.trial_seq);

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.consecutive_failures = 0,
            (CircuitState::Closed, false) => {
                inner.consecutive_failures += 1;
                inner.last_failure_time = Some(Instant::now());
                if inner.consecutive_failures >= self.failure_threshold {
                    self.transition(inner, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, _) if !current_trial => {
                // Late result from a call admitted before the circuit opened.
            }
            (CircuitState::HalfOpen, true) => {
                inner.consecutive_failures = 0;
                inner.last_failure_time = None;
                inner.trial_in_flight = false;
                self.transition(inner, CircuitState::Closed);
            }
            (CircuitState::HalfOpen, false) => {
                inner.consecutive_failures += 1;
                inner.last_failure_time = Some(Instant::now());
                inner.trial_in_flight = false;
                self.transition(inner, CircuitState::Open);
            }
            (CircuitState::Open, _) => {
                // Stragglers admitted while closed; the open timer is not extended.
            }
        }
    }

    /// Free trial `seq` if it is still the one in flight.
    fn release_trial(&self, seq: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight && inner.trial_seq == seq
        {
            inner.trial_in_flight = false;
        }
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                from = from.as_str(),
                consecutive_failures = inner.consecutive_failures,
                "Circuit opened"
            ),
            _ => tracing::info!(
                service = %self.service,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            ),
        }
        metrics::record_circuit_transition(&self.service, to.as_str());
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            service: self.service.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout.as_secs(),
            secs_since_last_failure: inner.last_failure_time.map(|at| at.elapsed().as_secs()),
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub secs_since_last_failure: Option<u64>,
}

/// Proof of admission through a breaker.
///
/// Report the call outcome with [`CircuitPermit::record`]. A trial permit
/// dropped without a report (the request was cancelled) frees the trial slot
/// so the breaker cannot stay stuck in Half-Open.
#[derive(Debug)]
pub struct CircuitPermit {
    circuit: Arc<ServiceCircuit>,
    trial: Option<u64>,
    settled: bool,
}

impl CircuitPermit {
    /// Whether this permit is the Half-Open trial.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn record(mut self, success: bool) {
        self.settled = true;
        self.circuit.record(success, self.trial);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if let (Some(seq), false) = (self.trial, self.settled) {
            tracing::debug!(service = %self.circuit.service, "Trial permit abandoned");
            self.circuit.release_trial(seq);
        }
    }
}

/// Registry of breakers, one per service, created on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    failure_threshold: u32,
    recovery_timeout: Duration,
    circuits: DashMap<String, Arc<ServiceCircuit>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self::with_settings(config.failure_threshold, config.recovery_timeout())
    }

    pub fn with_settings(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            circuits: DashMap::new(),
        }
    }

    fn circuit(&self, service: &str) -> Arc<ServiceCircuit> {
        if let Some(circuit) = self.circuits.get(service) {
            return circuit.clone();
        }
        self.circuits
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(ServiceCircuit::new(
                    service,
                    self.failure_threshold,
                    self.recovery_timeout,
                ))
            })
            .clone()
    }

    /// Whether a call to `service` may proceed.
    ///
    /// In Half-Open a `true` claims the trial slot; the caller must follow up
    /// with [`record_outcome`](Self::record_outcome).
    pub fn allow(&self, service: &str) -> bool {
        self.circuit(service).admit().is_some()
    }

    /// Report the outcome of a call admitted by [`allow`](Self::allow).
    ///
    /// While Half-Open the outcome is taken to be the trial's.
    pub fn record_outcome(&self, service: &str, success: bool) {
        self.circuit(service).record_untracked(success);
    }

    /// Admission returning an RAII permit, used by the dispatcher.
    pub fn acquire(&self, service: &str) -> Option<CircuitPermit> {
        let circuit = self.circuit(service);
        let trial = circuit.admit()?;
        Some(CircuitPermit {
            circuit,
            trial,
            settled: false,
        })
    }

    pub fn state(&self, service: &str) -> CircuitState {
        let circuit = self.circuit(service);
        let state = circuit.lock().state;
        state
    }

    /// Snapshots of every breaker that has seen traffic, sorted by service.
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self
            .circuits
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }
}
