//! Wait-time estimation for queue responses.
//!
//! The model is linear in queue depth: each pending item contributes a
//! configurable number of seconds. Items a worker has already claimed get a
//! fixed, distinct estimate instead.

use canvass_core::Config;

#[derive(Debug, Clone)]
pub struct WaitEstimator {
    seconds_per_item: i64,
    in_progress_wait: String,
}

impl WaitEstimator {
    pub fn new(config: &Config) -> Self {
        Self {
            seconds_per_item: config.queue.wait_seconds_per_item,
            in_progress_wait: config.queue.in_progress_wait.clone(),
        }
    }

    pub fn estimate_seconds(&self, pending_count: i64) -> i64 {
        pending_count.max(0).saturating_mul(self.seconds_per_item)
    }

    /// Human-readable estimate for a queue of the given depth.
    pub fn pending_estimate(&self, pending_count: i64) -> String {
        format_wait(self.estimate_seconds(pending_count))
    }

    /// Fixed estimate for items already being worked on.
    pub fn in_progress_estimate(&self) -> &str {
        &self.in_progress_wait
    }
}

pub fn format_wait(seconds: i64) -> String {
    if seconds < 60 {
        return "under a minute".to_owned();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("~{minutes} minute{}", plural(minutes));
    }
    let hours = minutes / 60;
    format!("~{hours} hour{}", plural(hours))
}

fn plural(n: i64) -> &'static str {
    if n == 1 { "" } else { "s" }
}
