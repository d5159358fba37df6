use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Sizing of the background loader pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[schemars(title = "Scheduler", inline)]
#[serde(default)]
pub struct SchedulerOptions {
    /// Upper bound on concurrently running load tasks. Zero is treated as 1.
    #[schemars(title = "Max Worker Threads", range(min = 1, max = 64))]
    pub max_worker_threads: usize,
    /// Prefix for worker thread names (`<prefix>-<n>`).
    #[schemars(skip)]
    pub thread_name_prefix: String,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_worker_threads: 1,
            thread_name_prefix: "cloud-loader".to_owned(),
        }
    }
}

impl SchedulerOptions {
    /// Worker limit with the zero case clamped away.
    #[must_use]
    pub fn worker_limit(&self) -> usize {
        self.max_worker_threads.max(1)
    }
}
