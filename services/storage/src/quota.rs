//! Database size quota with amortized rechecks.
//!
//! Measuring the database size is comparatively expensive, so the verdict is
//! cached and refreshed only when enough time has passed or enough rows have been
//! committed since the last check.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Limits that drive the recheck policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Size ceiling in bytes; a database strictly larger is "too large"
    pub max_bytes: u64,
    /// Recheck after this much time
    pub check_period: Duration,
    /// Recheck after this many committed inserts
    pub insert_threshold: u64,
}

/// Cached quota state for one connection
#[derive(Debug)]
pub struct QuotaTracker {
    policy: QuotaPolicy,
    insert_counter: u64,
    last_check: Instant,
    too_large: bool,
    last_size: Option<u64>,
}

impl QuotaTracker {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self::starting_at(policy, Instant::now())
    }

    /// Tracker whose recheck clock starts at `now`
    pub fn starting_at(policy: QuotaPolicy, now: Instant) -> Self {
        Self {
            policy,
            insert_counter: 0,
            last_check: now,
            too_large: false,
            last_size: None,
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Whether a fresh size measurement is due. A `true` answer resets both the
    /// insert counter and the recheck clock.
    pub fn should_recheck(&mut self) -> bool {
        self.should_recheck_at(Instant::now())
    }

    pub fn should_recheck_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_check);
        if elapsed >= self.policy.check_period || self.insert_counter >= self.policy.insert_threshold {
            self.insert_counter = 0;
            self.last_check = now;
            true
        } else {
            false
        }
    }

    /// Await the size `query` and refresh the cached verdict.
    ///
    /// When the query fails the previous verdict is kept unchanged.
    pub async fn recheck<Fut, E>(&mut self, query: Fut) -> bool
    where
        Fut: Future<Output = Result<u64, E>>,
        E: Display,
    {
        metrics::counter!("storage.quota.rechecks").increment(1);

        match query.await {
            Ok(size) => {
                self.too_large = size > self.policy.max_bytes;
                self.last_size = Some(size);
                info!(
                    size_mb = size / (1024 * 1024),
                    max_mb = self.policy.max_bytes / (1024 * 1024),
                    too_large = self.too_large,
                    "Database size checked"
                );
            }
            Err(e) => {
                warn!(
                    error = %e,
                    too_large = self.too_large,
                    "Failed to check database size, keeping previous verdict"
                );
            }
        }

        self.too_large
    }

    /// Count one committed insert
    pub fn record_insert(&mut self) {
        self.insert_counter += 1;
    }

    /// The cached verdict
    pub fn is_too_large(&self) -> bool {
        self.too_large
    }

    pub fn insert_count(&self) -> u64 {
        self.insert_counter
    }

    /// Size seen by the last successful check
    pub fn last_size(&self) -> Option<u64> {
        self.last_size
    }
}
