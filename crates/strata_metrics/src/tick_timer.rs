//! Tick timing over a rolling window

use super::ring_buffer::RingBuffer;
use std::time::Duration;

pub struct TickTimer {
    tick_times: RingBuffer<Duration>,
}

impl TickTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            tick_times: RingBuffer::new(capacity),
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.tick_times.push(elapsed);
    }

    pub fn average(&self) -> Duration {
        self.tick_times.average()
    }

    /// Ticks per second implied by the rolling average.
    pub fn per_second(&self) -> f64 {
        let avg = self.tick_times.average();
        if avg.as_secs_f64() > 0.0 {
            1.0 / avg.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn range_ms(&self) -> (f64, f64) {
        let (min, max) = self.tick_times.min_max();
        (min.as_secs_f64() * 1000.0, max.as_secs_f64() * 1000.0)
    }
}
