//! Timer scheduling for triggers
//!
//! A [`Trigger`](crate::Trigger) never sleeps itself. It asks a [`Scheduler`]
//! to deliver a [`TimerToken`] later and is handed that token back through
//! [`Trigger::fire`](crate::Trigger::fire). Production code uses the tokio
//! scheduler in [`driver`](crate::driver); tests use [`VirtualClock`].

use std::collections::BTreeSet;
use std::time::Duration;

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerToken(pub u64);

/// Schedule/cancel capability used by the trigger state machine.
pub trait Scheduler {
    /// Deliver `token` back to the trigger after `delay`.
    fn schedule(&mut self, token: TimerToken, delay: Duration);

    /// Make sure `token` is not delivered. Unknown tokens are ignored.
    fn cancel(&mut self, token: TimerToken);
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Duration,
    timers: BTreeSet<(Duration, TimerToken)>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since the clock was created.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Move time forward and return every token that came due, in deadline order.
    pub fn advance(&mut self, by: Duration) -> Vec<TimerToken> {
        self.now += by;

        let due: Vec<(Duration, TimerToken)> = self
            .timers
            .iter()
            .take_while(|(deadline, _)| *deadline <= self.now)
            .copied()
            .collect();

        due.into_iter()
            .map(|key| {
                self.timers.remove(&key);
                key.1
            })
            .collect()
    }
}

impl Scheduler for VirtualClock {
    fn schedule(&mut self, token: TimerToken, delay: Duration) {
        self.timers.insert((self.now + delay, token));
    }

    fn cancel(&mut self, token: TimerToken) {
        self.timers.retain(|(_, armed)| *armed != token);
    }
}
