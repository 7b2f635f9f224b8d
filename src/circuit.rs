//! Per-endpoint circuit breaker.
//!
//! ```text
//! Closed   -> Open      consecutive failures reach the threshold
//! Open     -> HalfOpen  first access after the cooldown (checked lazily)
//! HalfOpen -> Closed    the single trial request succeeds
//! HalfOpen -> Open      the trial fails; cooldown restarts
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::util::lock_unpoisoned;

/// Phase of one circuit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of one circuit, as reported by stats.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub key: String,
    pub phase: CircuitPhase,
    pub consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct CircuitState {
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    phase: CircuitPhase,
    trial_in_flight: bool,
}

/// Tracks failures per key and fails fast while a circuit is open.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether a request for `key` may be sent now.
    ///
    /// An open circuit whose cooldown has elapsed moves to `HalfOpen` and the
    /// caller receives the single trial; everyone else is refused until that
    /// trial reports back through [`CircuitBreaker::record_outcome`] or
    /// [`CircuitBreaker::release_trial`].
    pub fn can_proceed(&self, key: &str) -> bool {
        self.admit(key).is_some()
    }

    /// Like [`CircuitBreaker::can_proceed`]; `Some(true)` means the caller
    /// holds the half-open trial.
    pub(crate) fn admit(&self, key: &str) -> Option<bool> {
        let now = Instant::now();
        let mut states = lock_unpoisoned(&self.states);
        let state = states.entry(key.to_owned()).or_default();

        match state.phase {
            CircuitPhase::Closed => Some(false),
            CircuitPhase::Open => {
                let cooled_down = state
                    .last_failure_at
                    .map_or(true, |at| now.duration_since(at) > self.cooldown);
                if !cooled_down {
                    return None;
                }
                state.phase = CircuitPhase::HalfOpen;
                state.trial_in_flight = true;

                #[cfg(feature = "tracing")]
                tracing::info!(key, "circuit half-open, sending trial request");

                Some(true)
            }
            CircuitPhase::HalfOpen => {
                if state.trial_in_flight {
                    None
                } else {
                    state.trial_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    /// Records the final outcome of one logical request.
    pub fn record_outcome(&self, key: &str, success: bool) {
        let now = Instant::now();
        let mut states = lock_unpoisoned(&self.states);
        let state = states.entry(key.to_owned()).or_default();
        state.trial_in_flight = false;

        if success {
            state.consecutive_failures = 0;
            if state.phase == CircuitPhase::HalfOpen {
                state.phase = CircuitPhase::Closed;

                #[cfg(feature = "tracing")]
                tracing::info!(key, "circuit closed after successful trial");
            }
            return;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = Some(now);
        if state.consecutive_failures >= self.failure_threshold
            || state.phase == CircuitPhase::HalfOpen
        {
            if state.phase != CircuitPhase::Open {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    key,
                    failures = state.consecutive_failures,
                    "circuit opened"
                );
            }
            state.phase = CircuitPhase::Open;
        }
    }

    /// Hands back a trial claimed by [`CircuitBreaker::can_proceed`] that never
    /// reached the network, without counting an outcome.
    pub fn release_trial(&self, key: &str) {
        let mut states = lock_unpoisoned(&self.states);
        if let Some(state) = states.get_mut(key) {
            state.trial_in_flight = false;
        }
    }

    /// Current state of every known circuit, sorted by key.
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let states = lock_unpoisoned(&self.states);
        let mut circuits: Vec<CircuitSnapshot> = states
            .iter()
            .map(|(key, state)| CircuitSnapshot {
                key: key.clone(),
                phase: state.phase,
                consecutive_failures: state.consecutive_failures,
            })
            .collect();
        circuits.sort_by(|a, b| a.key.cmp(&b.key));
        circuits
    }

    pub fn phase(&self, key: &str) -> CircuitPhase {
        lock_unpoisoned(&self.states)
            .get(key)
            .map_or(CircuitPhase::Closed, |state| state.phase)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::advance;

    use super::{CircuitBreaker, CircuitPhase};

    const KEY: &str = "https://api:/sites";

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_millis(60_000))
    }

    fn failures(breaker: &CircuitBreaker) -> u32 {
        breaker
            .snapshot()
            .into_iter()
            .find(|c| c.key == KEY)
            .map_or(0, |c| c.consecutive_failures)
    }

    fn open(breaker: &CircuitBreaker) {
        for _ in 0..5 {
            assert!(breaker.can_proceed(KEY));
            breaker.record_outcome(KEY, false);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_open_the_circuit() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_outcome(KEY, false);
        }
        assert_eq!(breaker.phase(KEY), CircuitPhase::Closed);

        breaker.record_outcome(KEY, false);
        assert_eq!(breaker.phase(KEY), CircuitPhase::Open);
        assert!(!breaker.can_proceed(KEY));
        assert_eq!(failures(&breaker), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_outcome(KEY, false);
        }
        breaker.record_outcome(KEY, true);
        breaker.record_outcome(KEY, false);

        assert_eq!(failures(&breaker), 1);
        assert_eq!(breaker.phase(KEY), CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_must_strictly_elapse() {
        let breaker = breaker();
        open(&breaker);

        advance(Duration::from_millis(60_000)).await;
        assert!(!breaker.can_proceed(KEY));

        advance(Duration::from_millis(1)).await;
        assert!(breaker.can_proceed(KEY));
        assert_eq!(breaker.phase(KEY), CircuitPhase::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_trial_and_closes_on_success() {
        let breaker = breaker();
        open(&breaker);
        advance(Duration::from_millis(60_001)).await;

        assert!(breaker.can_proceed(KEY));
        assert!(!breaker.can_proceed(KEY));

        breaker.record_outcome(KEY, true);
        assert_eq!(breaker.phase(KEY), CircuitPhase::Closed);
        assert_eq!(failures(&breaker), 0);
        assert!(breaker.can_proceed(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_immediately() {
        let breaker = breaker();
        open(&breaker);
        advance(Duration::from_millis(60_001)).await;

        assert!(breaker.can_proceed(KEY));
        breaker.record_outcome(KEY, false);

        assert_eq!(breaker.phase(KEY), CircuitPhase::Open);
        assert!(!breaker.can_proceed(KEY));

        advance(Duration::from_millis(60_001)).await;
        assert!(breaker.can_proceed(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn released_trial_can_be_claimed_again() {
        let breaker = breaker();
        open(&breaker);
        advance(Duration::from_millis(60_001)).await;

        assert!(breaker.can_proceed(KEY));
        breaker.release_trial(KEY);

        assert_eq!(breaker.phase(KEY), CircuitPhase::HalfOpen);
        assert!(breaker.can_proceed(KEY));
        assert!(!breaker.can_proceed(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn admit_reports_who_holds_the_trial() {
        let breaker = breaker();
        assert_eq!(breaker.admit(KEY), Some(false));

        open(&breaker);
        assert_eq!(breaker.admit(KEY), None);

        advance(Duration::from_millis(60_001)).await;
        assert_eq!(breaker.admit(KEY), Some(true));
        assert_eq!(breaker.admit(KEY), None);
    }
}
