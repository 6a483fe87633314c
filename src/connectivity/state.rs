//! Hysteresis state machine for internet reachability.
//!
//! Pure bookkeeping: no locking, no I/O, time passed in by the caller.

use std::time::Duration;

use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tokio::time::Instant;

use crate::config::{CONSECUTIVE_SUCCESSES_FOR_GREEN, YELLOW_TO_RED_AFTER};

/// Internet reachability as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectivityState {
    /// Network calls are succeeding
    Green,
    /// Recent failure, outage not yet confirmed
    Yellow,
    /// Failures for at least the escalation period
    Red,
}

/// A state change, reported exactly once per actual change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectivityState,
    pub to: ConnectivityState,
}

/// Tracks consecutive successes and the start of the current outage.
///
/// Allowed edges: green→yellow on failure, yellow→red once the outage is old
/// enough, yellow/red→green after enough consecutive successes.
#[derive(Debug, Clone)]
pub struct ConnectivityTracker {
    state: ConnectivityState,
    consecutive_ok: u32,
    failure_start: Option<Instant>,
    required_successes: u32,
    red_after: Duration,
}

impl ConnectivityTracker {
    /// Creates a tracker. A non-green initial state starts its outage at `now`.
    pub fn new(initial: ConnectivityState, now: Instant) -> Self {
        Self::with_thresholds(
            initial,
            now,
            CONSECUTIVE_SUCCESSES_FOR_GREEN,
            YELLOW_TO_RED_AFTER,
        )
    }

    pub fn with_thresholds(
        initial: ConnectivityState,
        now: Instant,
        required_successes: u32,
        red_after: Duration,
    ) -> Self {
        ConnectivityTracker {
            state: initial,
            consecutive_ok: 0,
            failure_start: (initial != ConnectivityState::Green).then_some(now),
            required_successes: required_successes.max(1),
            red_after,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_ok
    }

    pub fn failure_start(&self) -> Option<Instant> {
        self.failure_start
    }

    /// How long the current outage has lasted, `None` while green.
    pub fn outage_duration(&self, now: Instant) -> Option<Duration> {
        self.failure_start
            .map(|start| now.saturating_duration_since(start))
    }

    /// Records a failed network operation.
    ///
    /// Any failure resets the consecutive-success run. The first failure while
    /// green opens an outage; later failures may escalate it.
    pub fn record_failure(&mut self, now: Instant) -> Option<Transition> {
        self.consecutive_ok = 0;
        match self.state {
            ConnectivityState::Green => {
                self.failure_start = Some(now);
                self.set(ConnectivityState::Yellow)
            }
            ConnectivityState::Yellow => self.escalate(now),
            ConnectivityState::Red => None,
        }
    }

    /// Records a successful network operation.
    pub fn record_success(&mut self) -> Option<Transition> {
        if self.state == ConnectivityState::Green {
            return None;
        }
        self.consecutive_ok += 1;
        if self.consecutive_ok < self.required_successes {
            return None;
        }
        self.consecutive_ok = 0;
        self.failure_start = None;
        self.set(ConnectivityState::Green)
    }

    /// Moves yellow to red once the outage is at least `red_after` old.
    pub fn escalate(&mut self, now: Instant) -> Option<Transition> {
        if self.state != ConnectivityState::Yellow {
            return None;
        }
        match self.outage_duration(now) {
            Some(elapsed) if elapsed >= self.red_after => self.set(ConnectivityState::Red),
            _ => None,
        }
    }

    fn set(&mut self, to: ConnectivityState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(Transition { from, to })
    }
}
