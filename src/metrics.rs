//! Rolling-window event counters for observability.
//!
//! Each metric is an append-only list of event timestamps, pruned lazily of
//! entries older than the longest reporting window. Constructed once at
//! startup and shared by reference with every collaborator that records
//! externally observable events.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;

/// Remote API calls made (successes, business-level absences, and failures).
pub const API_CALLS: &str = "api_calls";
/// Cache mutations applied by the scanner.
pub const CACHE_WRITES: &str = "cache_writes";
/// Guild rows created for the first time.
pub const GUILDS_ADDED: &str = "guilds_added";
/// Store lookups serving inbound requests.
pub const STORE_READS: &str = "store_reads";

/// The longest reporting window is five minutes; entries past twice that
/// are garbage.
const PRUNE_HORIZON: Duration = Duration::from_secs(600);

#[derive(Default)]
pub struct RollingCounters {
    events: Mutex<HashMap<&'static str, Vec<i64>>>,
}

impl RollingCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event for `metric` at the current instant.
    pub fn record(&self, metric: &'static str) {
        let now = Utc::now().timestamp_millis();
        let mut events = lock(&self.events);
        let log = events.entry(metric).or_default();
        log.push(now);

        let horizon = now - PRUNE_HORIZON.as_millis() as i64;
        if log.first().is_some_and(|&t| t < horizon) {
            log.retain(|&t| t >= horizon);
        }
    }

    /// Count events for `metric` within the trailing `window`.
    pub fn count_within(&self, metric: &str, window: Duration) -> usize {
        let cutoff = Utc::now().timestamp_millis() - window.as_millis() as i64;
        let events = lock(&self.events);
        events
            .get(metric)
            .map_or(0, |log| log.iter().filter(|&&t| t > cutoff).count())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
