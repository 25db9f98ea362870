// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Rate-based circuit breaker

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Tracks the outcome of the most recent invocations across a whole
/// execution context
///
/// The breaker is open once the window holds at least `samples` outcomes and
/// the failure rate reaches `rate`. A rate of zero keeps it permanently open.
/// Workers that find it open wait `delay` before invoking.
#[derive(Debug)]
pub struct CircuitBreaker {
    samples: usize,
    rate: f64,
    delay: Duration,
    window: Mutex<VecDeque<bool>>,
}

impl CircuitBreaker {
    pub fn new(samples: usize, rate: f64, delay: Duration) -> Self {
        let samples = samples.max(1);
        Self {
            samples,
            rate,
            delay,
            window: Mutex::new(VecDeque::with_capacity(samples)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn success(&self) {
        self.record(true);
    }

    pub fn fail(&self) {
        self.record(false);
    }

    /// Share of failures in the window, zero when empty
    pub fn error_rate(&self) -> f64 {
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.is_empty() {
            return 0.0;
        }
        let failures = window.iter().filter(|ok| !**ok).count();
        failures as f64 / window.len() as f64
    }

    pub fn is_open(&self) -> bool {
        if self.rate <= 0.0 {
            return true;
        }
        let filled = self.window.lock().unwrap_or_else(PoisonError::into_inner).len() >= self.samples;
        filled && self.error_rate() >= self.rate
    }

    /// Whether an invocation may proceed without delay
    pub fn ready(&self) -> bool {
        !self.is_open()
    }

    fn record(&self, ok: bool) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.len() == self.samples {
            window.pop_front();
        }
        window.push_back(ok);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_enough_failures() {
        let breaker = CircuitBreaker::new(4, 0.5, Duration::from_millis(10));

        breaker.fail();
        breaker.fail();
        assert!(breaker.ready(), "window not filled yet");

        breaker.success();
        breaker.success();
        assert!(breaker.is_open());
        assert!((breaker.error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_rolls_and_recovers() {
        let breaker = CircuitBreaker::new(2, 0.5, Duration::from_millis(10));

        breaker.fail();
        breaker.fail();
        assert!(breaker.is_open());

        breaker.success();
        breaker.success();
        assert!(breaker.ready());
    }

    #[test]
    fn test_zero_rate_is_always_open() {
        let breaker = CircuitBreaker::new(10, 0.0, Duration::from_millis(10));
        assert!(breaker.is_open());

        breaker.success();
        assert!(breaker.is_open());
    }
}
