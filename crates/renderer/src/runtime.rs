use std::time::Instant;

/// Where the particle field reads "now" from, in seconds.
pub trait TimeSource: Send {
    fn now_seconds(&mut self) -> f32;
}

/// Wall-clock seconds since construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn now_seconds(&mut self) -> f32 {
        self.origin.elapsed().as_secs_f32()
    }
}

/// Moves forward by a fixed step on every read, so headless runs and tests
/// replay identically.
#[derive(Debug, Clone, Copy)]
pub struct SteppedTimeSource {
    step: f32,
    reads: u64,
}

impl SteppedTimeSource {
    pub fn new(step_seconds: f32) -> Self {
        Self {
            step: step_seconds.max(0.0),
            reads: 0,
        }
    }
}

impl TimeSource for SteppedTimeSource {
    fn now_seconds(&mut self) -> f32 {
        let now = self.reads as f32 * self.step;
        self.reads = self.reads.saturating_add(1);
        now
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource>;
