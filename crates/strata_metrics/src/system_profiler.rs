//! System profiler accumulating wall time per named system

use std::collections::HashMap;
use std::time::Duration;

pub struct SystemProfiler {
    timings: HashMap<String, Duration>,
}

impl SystemProfiler {
    pub fn new() -> Self {
        Self {
            timings: HashMap::new(),
        }
    }

    /// Add an externally measured duration to the named system's total.
    /// The scheduler times each run around the system closure and
    /// reports it here.
    pub fn record(&mut self, name: &str, elapsed: Duration) {
        *self.timings.entry(name.to_string()).or_insert(Duration::ZERO) += elapsed;
    }

    pub fn get_timing(&self, name: &str) -> Duration {
        self.timings.get(name).copied().unwrap_or(Duration::ZERO)
    }

    pub fn reset(&mut self) {
        self.timings.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Duration)> {
        self.timings.iter()
    }
}

impl Default for SystemProfiler {
    fn default() -> Self {
        Self::new()
    }
}
