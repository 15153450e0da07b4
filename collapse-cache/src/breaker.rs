/*!
The [`CircuitBreaker`]: CLOSED/OPEN/HALF_OPEN state machine shared across
every operation of one [`crate::ResilientCache`] (spec §4.5), guarded by a
single lock the way `emit_batcher::Shared` confines its own mutable state
to one `Mutex`.
*/

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use collapse_core::{clock::Clock, CollapseError};

/**
A single call's result, as recorded into the breaker's sliding window.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

/**
Which of the three states the breaker is in right now.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /**
    Calls pass through; outcomes feed the sliding window.
    */
    Closed,
    /**
    Calls are rejected without reaching the delegate.
    */
    Open,
    /**
    A bounded number of trial calls are admitted to probe recovery.
    */
    HalfOpen,
}

/**
Configuration for one [`CircuitBreaker`] (spec §4.5, §6's `breakerConfig`).
*/
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /**
    Failure rate (0.0-1.0) over a full window that trips the breaker.
    */
    pub failure_rate_threshold: f64,
    /**
    Fixed count-based window size (spec §9: count-based, not time-based).
    */
    pub sliding_window_size: usize,
    /**
    Calls required in the window before the failure rate is evaluated.
    */
    pub minimum_number_of_calls: usize,
    /**
    Trial calls admitted while `HalfOpen`.
    */
    pub permitted_calls_in_half_open_state: usize,
    /**
    How long the breaker stays `Open` before probing with a trial call.
    */
    pub wait_duration_in_open_state: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_rate_threshold: 0.5,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
            permitted_calls_in_half_open_state: 10,
            wait_duration_in_open_state: Duration::from_secs(60),
        }
    }
}

struct Inner {
    state: CircuitState,
    window: VecDeque<Outcome>,
    opened_at: Option<tokio::time::Instant>,
    half_open_remaining: usize,
    successful: f64,
    failed: f64,
    rejected: f64,
}

/**
A call admitted by [`CircuitBreaker::acquire`]; record its outcome by
consuming this permit.
*/
#[must_use = "a call admitted by the breaker must report its outcome"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
}

impl Permit<'_> {
    /**
    Report that the admitted call succeeded.
    */
    pub fn success(self) {
        self.breaker.record(Outcome::Success);
    }

    /**
    Report that the admitted call failed.
    */
    pub fn failure(self) {
        self.breaker.record(Outcome::Failure);
    }
}

/**
The shared breaker instance for one resilient cache (spec §4.5: "a
single breaker instance per resilient cache is shared across all
operations").
*/
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /**
    Build a new breaker in the `Closed` state.
    */
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        CircuitBreaker {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.sliding_window_size),
                opened_at: None,
                half_open_remaining: 0,
                successful: 0.0,
                failed: 0.0,
                rejected: 0.0,
            }),
            config,
            clock,
        }
    }

    /**
    The breaker's current state.
    */
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /**
    The floating-point successful/failed/rejected gauges (spec §4.5).
    */
    pub fn gauges(&self) -> (f64, f64, f64) {
        let inner = self.inner.lock().unwrap();
        (inner.successful, inner.failed, inner.rejected)
    }

    /**
    Ask permission to make a call. `Err` means the breaker is `Open`
    (or `HalfOpen` with no trial slots left): the delegate must not be
    invoked and the rejection counter has already been incremented.
    */
    pub fn acquire(&self) -> Result<Permit<'_>, CollapseError> {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => Ok(Permit { breaker: self }),

            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| self.clock.now().saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);

                if elapsed >= self.config.wait_duration_in_open_state {
                    tracing::debug!("circuit breaker probing recovery; entering half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_remaining = self.config.permitted_calls_in_half_open_state.saturating_sub(1);
                    // Trial outcomes must be judged on their own; clear the
                    // window so failures recorded before the breaker opened
                    // can't tip the half-open recompute back to `Open`.
                    inner.window.clear();
                    Ok(Permit { breaker: self })
                } else {
                    inner.rejected += 1.0;
                    Err(CollapseError::CallNotPermitted("circuit open".into()))
                }
            }

            CircuitState::HalfOpen => {
                if inner.half_open_remaining > 0 {
                    inner.half_open_remaining -= 1;
                    Ok(Permit { breaker: self })
                } else {
                    inner.rejected += 1.0;
                    Err(CollapseError::CallNotPermitted("circuit half-open, trials exhausted".into()))
                }
            }
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut inner = self.inner.lock().unwrap();

        match outcome {
            Outcome::Success => inner.successful += 1.0,
            Outcome::Failure => inner.failed += 1.0,
        }

        if inner.window.len() == self.config.sliding_window_size {
            inner.window.pop_front();
        }
        inner.window.push_back(outcome);

        match inner.state {
            CircuitState::Closed => {
                if inner.window.len() >= self.config.minimum_number_of_calls {
                    let rate = failure_rate(&inner.window);
                    if rate >= self.config.failure_rate_threshold {
                        tracing::warn!(failure_rate = rate, "circuit breaker tripped; opening");
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(self.clock.now());
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_remaining == 0 {
                    let rate = failure_rate(&inner.window);
                    if rate >= self.config.failure_rate_threshold {
                        tracing::warn!(failure_rate = rate, "half-open trials failed; reopening");
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(self.clock.now());
                    } else {
                        tracing::debug!(failure_rate = rate, "half-open trials recovered; closing");
                        inner.state = CircuitState::Closed;
                        inner.window.clear();
                    }
                }
            }
            CircuitState::Open => {
                // A trial call that was admitted while transitioning out of
                // `Open` records after the state already moved on; nothing
                // further to do here.
            }
        }
    }
}

fn failure_rate(window: &VecDeque<Outcome>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let failures = window.iter().filter(|o| **o == Outcome::Failure).count();
    failures as f64 / window.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use collapse_core::clock::TokioClock;

    fn breaker(config: BreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new(config, Arc::new(TokioClock))
    }

    #[test]
    fn opens_after_the_failure_rate_crosses_the_threshold() {
        let b = breaker(BreakerConfig {
            failure_rate_threshold: 0.5,
            sliding_window_size: 2,
            minimum_number_of_calls: 2,
            ..Default::default()
        });

        b.acquire().unwrap().failure();
        assert_eq!(b.state(), CircuitState::Closed);

        b.acquire().unwrap().failure();
        assert_eq!(b.state(), CircuitState::Open);

        assert!(b.acquire().is_err());
        let (successful, failed, rejected) = b.gauges();
        assert_eq!(successful, 0.0);
        assert_eq!(failed, 2.0);
        assert_eq!(rejected, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_recovers_to_closed_when_trials_succeed() {
        let b = breaker(BreakerConfig {
            failure_rate_threshold: 0.5,
            sliding_window_size: 2,
            minimum_number_of_calls: 2,
            permitted_calls_in_half_open_state: 1,
            wait_duration_in_open_state: Duration::from_millis(10),
            ..Default::default()
        });

        b.acquire().unwrap().failure();
        b.acquire().unwrap().failure();
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(11)).await;

        let permit = b.acquire().expect("trial call should be admitted");
        permit.success();
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
