//! Wall-clock timing of service calls.

use std::time::{Duration, Instant};

use tracing::info;

/// Logs the elapsed time of a named section when dropped.
///
/// ```ignore
/// let _t = Timer::new("policy_model.generate");
/// policy.generate(request).await?;
/// ```
#[derive(Debug)]
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            section = self.label,
            elapsed_ms = self.start.elapsed().as_millis() as u64,
            "timer"
        );
    }
}
