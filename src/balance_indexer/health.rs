use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::health::{HealthCheckable, HealthStatus};

/// Cycles count as stalled after this many intervals without a successful one.
const STALLED_AFTER_CYCLES: i64 = 5;

pub struct IndexerHealth {
    /// Unix timestamp of the last successful cycle, zero when there has been none.
    last_successful_cycle: AtomicI64,
    max_silence: Duration,
    started_on: DateTime<Utc>,
}

impl IndexerHealth {
    pub fn new(started_on: DateTime<Utc>, cycle_interval: StdDuration) -> Self {
        let cycle_interval_seconds = i64::try_from(cycle_interval.as_secs()).unwrap_or(i64::MAX);
        Self {
            last_successful_cycle: AtomicI64::new(0),
            max_silence: Duration::seconds(
                cycle_interval_seconds.saturating_mul(STALLED_AFTER_CYCLES),
            ),
            started_on,
        }
    }

    pub fn set_cycle_succeeded(&self, finished_on: DateTime<Utc>) {
        self.last_successful_cycle
            .store(finished_on.timestamp(), Ordering::Relaxed);
    }

    fn last_success(&self) -> DateTime<Utc> {
        match self.last_successful_cycle.load(Ordering::Relaxed) {
            0 => self.started_on,
            timestamp => Utc
                .timestamp_opt(timestamp, 0)
                .single()
                .unwrap_or(self.started_on),
        }
    }

    pub fn health_status_at(&self, now: DateTime<Utc>) -> HealthStatus {
        let time_since_success = now - self.last_success();

        if time_since_success < self.max_silence {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy(Some(format!(
                "no successful indexing cycle in {} seconds",
                time_since_success.num_seconds()
            )))
        }
    }
}

impl HealthCheckable for IndexerHealth {
    // Healthy when a cycle succeeded recently, or the indexer started recently.
    fn health_status(&self) -> HealthStatus {
        self.health_status_at(Utc::now())
    }
}
