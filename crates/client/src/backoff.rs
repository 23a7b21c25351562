//! Reconnect pacing: the exponential delay sequence and the single
//! outstanding reconnect timer.

use std::time::Duration;

use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1_000),
            multiplier: 1.5,
            max: Duration::from_millis(30_000),
        }
    }
}

/// Exponential backoff state. Each call to [`Backoff::next_delay`] hands out
/// the current delay and grows the next one, capped at `policy.max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        // Overflowing, negative or NaN products saturate at the cap.
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.policy.multiplier)
            .unwrap_or(self.policy.max);
        self.current = grown.min(self.policy.max);
        delay
    }

    /// Delay the next call to [`Backoff::next_delay`] will return.
    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial;
    }
}

/// Handle to the pending reconnect task. At most one is armed at a time.
///
/// Each arming gets a token; a task that wakes up after being cancelled or
/// replaced presents a stale token and [`ReconnectTimer::fire`] refuses it.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    armed: Option<(u64, AbortHandle)>,
    seq: u64,
}

impl ReconnectTimer {
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Arm the timer with the task `spawn` starts for the given token.
    /// Returns `false` without calling `spawn` if a timer is outstanding.
    pub fn arm_with(&mut self, spawn: impl FnOnce(u64) -> AbortHandle) -> bool {
        if self.armed.is_some() {
            return false;
        }
        self.seq += 1;
        let token = self.seq;
        self.armed = Some((token, spawn(token)));
        true
    }

    /// Abort the outstanding task, if any.
    pub fn cancel(&mut self) {
        if let Some((_, handle)) = self.armed.take() {
            handle.abort();
        }
    }

    /// Called by the task when it wakes. Disarms and returns `true` only if
    /// `token` is the one currently armed.
    pub fn fire(&mut self, token: u64) -> bool {
        match self.armed {
            Some((armed, _)) if armed == token => {
                self.armed = None;
                true
            },
            _ => false,
        }
    }
}
