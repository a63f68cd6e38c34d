use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("delay of {0:?} overflows the clock")]
    DeadlineOverflow(Duration),
}

/// Source of "now" for deadline bookkeeping.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cooperative single-thread task queue with delayed, cancelable tasks.
///
/// Tasks are plain values; the owner decides what running one means. Ties on
/// the deadline run in posting order.
pub struct TaskQueue<T, C = SystemClock> {
    clock: C,
    pending: BTreeMap<(Instant, u64), T>,
    next_seq: u64,
}

impl<T> TaskQueue<T, SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<T> Default for TaskQueue<T, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: Clock> TaskQueue<T, C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            pending: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Queues `task` to run as soon as the owner drains the queue.
    pub fn post(&mut self, task: T) -> Instant {
        let now = self.clock.now();
        self.insert(now, task);
        now
    }

    /// Queues `task` to run once `delay` has elapsed; returns the deadline.
    pub fn post_delayed(&mut self, task: T, delay: Duration) -> Result<Instant, SchedulerError> {
        let deadline = self
            .clock
            .now()
            .checked_add(delay)
            .ok_or(SchedulerError::DeadlineOverflow(delay))?;
        self.insert(deadline, task);
        Ok(deadline)
    }

    fn insert(&mut self, deadline: Instant, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert((deadline, seq), task);
    }

    /// Removes and returns every task due at the current instant.
    ///
    /// Tasks posted while the caller runs the returned batch wait for the
    /// next call, even when they are already due.
    pub fn take_due(&mut self) -> Vec<T> {
        let now = self.clock.now();
        let mut due = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl<T: PartialEq, C: Clock> TaskQueue<T, C> {
    /// Cancels every pending copy of `task`; returns how many were removed.
    pub fn remove(&mut self, task: &T) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending != task);
        before - self.pending.len()
    }

    pub fn count(&self, task: &T) -> usize {
        self.pending.values().filter(|pending| *pending == task).count()
    }
}
