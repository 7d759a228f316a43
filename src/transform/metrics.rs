//! Execution metrics for transforms and pipelines.

use crate::types::{now, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformMetrics {
    pub execution_count: u64,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub last_executed: Option<Timestamp>,
    pub success_count: u64,
    pub error_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl TransformMetrics {
    pub(crate) fn record(&mut self, duration: Duration, success: bool) {
        self.execution_count += 1;
        self.total_duration += duration;
        let average = self.total_duration.as_nanos() / u128::from(self.execution_count);
        self.average_duration = Duration::from_nanos(u64::try_from(average).unwrap_or(u64::MAX));
        self.last_executed = Some(now());
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
    }

    pub(crate) fn record_cache(&mut self, hit: bool) {
        if hit {
            self.cache_hits += 1;
        } else {
            self.cache_misses += 1;
        }
    }

    /// Share of executions that succeeded; 0 before the first run
    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.execution_count as f64
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / lookups as f64
    }
}
