use std::thread;
use std::time::{Duration, Instant};

/// A utility for tracking frames per second.
pub struct FpsCounter {
    frame_count: u32,
    last_time: Instant,
    interval: Duration,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            last_time: Instant::now(),
            interval: Duration::from_secs(1),
        }
    }

    /// Count one frame. Returns the rate once per reporting interval.
    pub fn update(&mut self) -> Option<f32> {
        self.frame_count += 1;
        let elapsed = self.last_time.elapsed();
        if elapsed < self.interval {
            return None;
        }
        let fps = self.frame_count as f32 / elapsed.as_secs_f32();
        self.frame_count = 0;
        self.last_time = Instant::now();
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline-based pacing to a fixed frame rate.
///
/// Deadlines advance by whole frame periods, so a slow frame does not shift
/// every later one. After falling more than one period behind the schedule
/// restarts from now instead of bursting to catch up.
pub struct FramePacer {
    period: Duration,
    next: Instant,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Time left until the current deadline, and advance to the next one.
    pub fn advance(&mut self, now: Instant) -> Duration {
        let wait = self.next.saturating_duration_since(now);
        if now > self.next + self.period {
            self.next = now + self.period;
        } else {
            self.next += self.period;
        }
        wait
    }

    /// Sleep until the current deadline.
    pub fn wait(&mut self) {
        let wait = self.advance(Instant::now());
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }
}
