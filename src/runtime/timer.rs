//! Clock and one-shot timers
//!
//! Timers are how `sleep` suspends: the element arms a one-shot entry, yields,
//! and the scheduler resumes the owner when the entry comes due. Deadlines are
//! read off a [`Clock`] that is either the real monotonic clock or a simulated
//! one tests advance by hand, so timing behavior is testable without waiting.

use crate::runtime::coroutine::CoroutineId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A shared monotonic clock.
#[derive(Clone)]
pub struct Clock(Arc<ClockInner>);

enum ClockInner {
    Real { start: Instant },
    Simulated(Mutex<Duration>),
}

impl Clock {
    /// The real monotonic clock, zeroed at creation.
    pub fn real() -> Self {
        Clock(Arc::new(ClockInner::Real {
            start: Instant::now(),
        }))
    }

    /// A simulated clock that only moves when [`advance`] is called.
    ///
    /// [`advance`]: Clock::advance
    pub fn simulated() -> Self {
        Clock(Arc::new(ClockInner::Simulated(Mutex::new(Duration::ZERO))))
    }

    /// Time elapsed since the clock's zero point.
    pub fn now(&self) -> Duration {
        match &*self.0 {
            ClockInner::Real { start } => start.elapsed(),
            ClockInner::Simulated(t) => *t.lock(),
        }
    }

    /// Move a simulated clock forward.
    ///
    /// Panics on a real clock; tests that advance time must construct the
    /// instance with a simulated one.
    pub fn advance(&self, by: Duration) {
        match &*self.0 {
            ClockInner::Real { .. } => panic!("advance() on the real clock"),
            ClockInner::Simulated(t) => *t.lock() += by,
        }
    }
}

/// Handle to one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct TimerEntry {
    id: TimerId,
    owner: CoroutineId,
    deadline: Duration,
}

/// The set of armed one-shot timers for one instance.
#[derive(Default)]
pub struct TimerHub {
    next: u64,
    entries: Vec<TimerEntry>,
}

impl TimerHub {
    /// Arm a one-shot timer owned by `owner`, firing `after` from now.
    pub fn arm(&mut self, clock: &Clock, owner: CoroutineId, after: Duration) -> TimerId {
        let id = TimerId(self.next);
        self.next += 1;
        self.entries.push(TimerEntry {
            id,
            owner,
            deadline: clock.now() + after,
        });
        id
    }

    /// Remove and return every timer whose deadline has passed.
    pub fn due(&mut self, clock: &Clock) -> Vec<(TimerId, CoroutineId)> {
        let now = clock.now();
        let mut fired = Vec::new();
        self.entries.retain(|entry| {
            if entry.deadline <= now {
                fired.push((entry.id, entry.owner));
                false
            } else {
                true
            }
        });
        fired
    }

    /// Disarm one timer. Idempotent.
    pub fn cancel(&mut self, id: TimerId) {
        self.entries.retain(|entry| entry.id != id);
    }

    /// Disarm every timer owned by `owner`. Used when the owner exits or is
    /// killed, so no resume can arrive afterwards.
    pub fn cancel_owned_by(&mut self, owner: CoroutineId) {
        self.entries.retain(|entry| entry.owner != owner);
    }

    /// Re-arm a fired timer at the front of the queue with an immediate
    /// deadline. Used when a timer fires while its owner is paused.
    pub fn requeue(&mut self, id: TimerId, owner: CoroutineId) {
        self.entries.push(TimerEntry {
            id,
            owner,
            deadline: Duration::ZERO,
        });
    }

    /// Whether any timer is armed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
