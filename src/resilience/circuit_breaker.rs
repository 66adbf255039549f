//! Circuit Breaker implementation
//!
//! Prevents cascading failures by temporarily stopping calls to failing endpoints.
//! States: Closed -> Open -> HalfOpen -> {Closed | Open}
//!
//! The failure rate is computed over a fixed-size ring buffer of recent call
//! outcomes and only evaluated once the window is full, so a single early
//! failure cannot trip the circuit.
//!
//! Admission hands out a [`CallPermit`] tagged with the breaker's current
//! generation (bumped on every state transition). Recording through the
//! permit drops outcomes from calls admitted under an earlier state, and a
//! permit dropped without an outcome (caller cancelled mid-call) releases
//! any half-open trial slot it held instead of wedging the breaker.
//!
//! # Thread Safety
//! Each breaker serializes its transitions and outcome recording behind one
//! mutex; there is no lock shared between breakers. Critical sections only
//! touch in-memory counters, never the calling path.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::config::BreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of a single call, as seen by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Excluded from the failure rate (matched an ignored failure kind)
    Ignored,
}

/// Fixed-capacity ring buffer of call outcomes.
///
/// Only successes and failures occupy slots; ignored outcomes are never
/// stored since they must not move the failure rate either way.
struct CallRecord {
    // true = failure
    slots: Vec<bool>,
    head: usize,
    len: usize,
}

impl CallRecord {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![false; capacity],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, failure: bool) {
        self.slots[self.head] = failure;
        self.head = (self.head + 1) % self.slots.len();
        if self.len < self.slots.len() {
            self.len += 1;
        }
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    fn failures(&self) -> usize {
        // Before the first wrap head == len, so the live entries are always
        // slots[0..len]; after wrapping, every slot is live.
        self.slots[..self.len].iter().filter(|&&f| f).count()
    }

    /// Failure rate in percent over the recorded outcomes (0 when empty)
    fn failure_rate(&self) -> u32 {
        if self.len == 0 {
            return 0;
        }
        (self.failures() * 100 / self.len) as u32
    }
}

struct BreakerInner {
    state: CircuitState,
    record: CallRecord,
    /// Bumped on every state transition; stale permits record against an
    /// older generation and their outcomes are dropped
    generation: u64,
    /// When the circuit last opened
    opened_at: Option<Instant>,
    /// Trial calls admitted since entering half-open
    trial_admitted: u32,
    /// Trial outcomes counted toward the recovery decision
    trial_done: u32,
    trial_failures: u32,
}

/// Per-endpoint circuit breaker with a sliding failure-rate window
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Proof of admission for a single call
///
/// Report the call's result through [`record`](Self::record). Dropping the
/// permit without recording (the caller cancelled the call) counts as
/// neither success nor failure and releases any half-open trial slot the
/// permit held.
#[must_use = "an admitted call must report its outcome through the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    recorded: bool,
}

impl CallPermit<'_> {
    /// Record the outcome of the admitted call
    ///
    /// Outcomes from calls admitted before the breaker last changed state
    /// are dropped; they must not perturb the current window or trial set.
    pub fn record(mut self, outcome: Outcome) {
        self.recorded = true;
        self.breaker.record_admitted(self.generation, outcome);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            // Abandoned call: free the trial slot so the breaker can still
            // reach a recovery decision
            self.breaker.record_admitted(self.generation, Outcome::Ignored);
        }
    }
}

impl CircuitBreaker {
    /// Create a closed circuit breaker
    ///
    /// # Arguments
    /// * `name` - Endpoint identifier for logging
    /// * `config` - Breaker configuration
    ///
    /// # Panics
    /// Panics if `sliding_window_size` or `permitted_calls_in_half_open`
    /// is zero
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        assert!(
            config.sliding_window_size > 0,
            "sliding_window_size must be > 0"
        );
        assert!(
            config.permitted_calls_in_half_open > 0,
            "permitted_calls_in_half_open must be > 0"
        );

        let window = config.sliding_window_size;
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                record: CallRecord::new(window),
                generation: 0,
                opened_at: None,
                trial_admitted: 0,
                trial_done: 0,
                trial_failures: 0,
            }),
        }
    }

    // State stays consistent between mutations, so a poisoned lock can be
    // recovered instead of propagating the panic to every later caller.
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask the breaker to admit a call
    ///
    /// Returns `None` when the call must be rejected without being
    /// attempted. The returned permit must be used to report the call's
    /// outcome; a permit dropped unrecorded releases its half-open slot.
    ///
    /// In open state the open-to-half-open transition is evaluated lazily
    /// here when `auto_transition_to_half_open` is set; concurrent callers
    /// race on the mutex, so the transition happens exactly once.
    pub fn try_admit(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.lock();

        let admitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let waited = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.wait_duration())
                    .unwrap_or(true);

                if self.config.auto_transition_to_half_open && waited {
                    self.to_half_open(&mut inner);
                    self.admit_trial(&mut inner)
                } else {
                    tracing::debug!("Circuit breaker '{}' rejected call (open)", self.name);
                    false
                }
            }
            CircuitState::HalfOpen => self.admit_trial(&mut inner),
        };

        if admitted {
            Some(CallPermit {
                breaker: self,
                generation: inner.generation,
                recorded: false,
            })
        } else {
            None
        }
    }

    /// Record an outcome directly against the current state
    ///
    /// For callers managing admission themselves. Calls that went through
    /// [`try_admit`](Self::try_admit) should record through their
    /// [`CallPermit`] instead, so outcomes that outlived a state transition
    /// are dropped.
    pub fn record_outcome(&self, outcome: Outcome) {
        let mut inner = self.lock();
        self.record_inner(&mut inner, outcome);
    }

    /// Record an outcome from a permit, dropping it when stale
    fn record_admitted(&self, generation: u64, outcome: Outcome) {
        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::trace!(
                "Circuit breaker '{}' dropped outcome from a previous generation",
                self.name
            );
            return;
        }
        self.record_inner(&mut inner, outcome);
    }

    fn record_inner(&self, inner: &mut BreakerInner, outcome: Outcome) {
        match inner.state {
            CircuitState::Closed => match outcome {
                Outcome::Success => {
                    inner.record.push(false);
                    self.evaluate_window(inner);
                }
                Outcome::Failure => {
                    inner.record.push(true);
                    self.evaluate_window(inner);
                }
                Outcome::Ignored => {
                    tracing::trace!("Circuit breaker '{}' ignored an outcome", self.name);
                }
            },
            CircuitState::HalfOpen => match outcome {
                Outcome::Success => {
                    inner.trial_done += 1;
                    self.evaluate_trials(inner);
                }
                Outcome::Failure => {
                    inner.trial_done += 1;
                    inner.trial_failures += 1;
                    self.evaluate_trials(inner);
                }
                Outcome::Ignored => {
                    // The trial slot is handed back so another probe can run
                    inner.trial_admitted = inner.trial_admitted.saturating_sub(1);
                }
            },
            CircuitState::Open => {
                // Straggler from before the circuit opened; must not seed the
                // next window
                tracing::trace!(
                    "Circuit breaker '{}' dropped outcome recorded while open",
                    self.name
                );
            }
        }
    }

    /// Force an open circuit into half-open
    ///
    /// External trigger for deployments that keep
    /// `auto_transition_to_half_open` disabled. No-op unless the circuit is
    /// open.
    pub fn force_half_open(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            self.to_half_open(&mut inner);
        }
    }

    /// Reset the breaker to closed with an empty window
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.record.clear();
        inner.generation += 1;
        inner.opened_at = None;
        inner.trial_admitted = 0;
        inner.trial_done = 0;
        inner.trial_failures = 0;
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current state as string (for logging/metrics)
    pub fn state_name(&self) -> &'static str {
        match self.state() {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Failure rate in percent over the current window contents
    pub fn failure_rate(&self) -> u32 {
        self.lock().record.failure_rate()
    }

    /// Number of outcomes currently recorded in the window
    pub fn recorded_calls(&self) -> usize {
        self.lock().record.len
    }

    /// Admit a trial call if a half-open slot is free
    fn admit_trial(&self, inner: &mut BreakerInner) -> bool {
        if inner.trial_admitted < self.config.permitted_calls_in_half_open {
            inner.trial_admitted += 1;
            true
        } else {
            tracing::debug!(
                "Circuit breaker '{}' half-open limit reached ({}/{})",
                self.name,
                inner.trial_admitted,
                self.config.permitted_calls_in_half_open
            );
            false
        }
    }

    /// Closed state: trip the circuit once the full window crosses the threshold
    fn evaluate_window(&self, inner: &mut BreakerInner) {
        if !inner.record.is_full() {
            return;
        }
        let rate = inner.record.failure_rate();
        if rate >= u32::from(self.config.failure_rate_threshold) {
            self.trip_open(inner, rate);
        }
    }

    /// Half-open state: decide once all permitted trials have reported back
    fn evaluate_trials(&self, inner: &mut BreakerInner) {
        if inner.trial_done < self.config.permitted_calls_in_half_open {
            return;
        }
        let rate = inner.trial_failures * 100 / inner.trial_done;
        if rate >= u32::from(self.config.failure_rate_threshold) {
            self.trip_open(inner, rate);
        } else {
            inner.state = CircuitState::Closed;
            inner.record.clear();
            inner.generation += 1;
            inner.opened_at = None;
            inner.trial_admitted = 0;
            inner.trial_done = 0;
            inner.trial_failures = 0;
            tracing::info!("Circuit breaker '{}' closed after recovery", self.name);
        }
    }

    fn trip_open(&self, inner: &mut BreakerInner, rate: u32) {
        inner.state = CircuitState::Open;
        inner.generation += 1;
        inner.opened_at = Some(Instant::now());
        inner.trial_admitted = 0;
        inner.trial_done = 0;
        inner.trial_failures = 0;
        tracing::warn!(
            "Circuit breaker '{}' opened at {}% failure rate",
            self.name,
            rate
        );
    }

    fn to_half_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::HalfOpen;
        inner.generation += 1;
        inner.trial_admitted = 0;
        inner.trial_done = 0;
        inner.trial_failures = 0;
        tracing::info!("Circuit breaker '{}' transitioning to half-open", self.name);
    }
}
