//! Access Tracking Module
//!
//! Per-entry access bookkeeping used by sliding expiration and by the
//! most-accessed ranking.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::Entry;

// == Access Tracker ==
/// Access counter and last-access timestamp of a single entry.
///
/// Only successful reads bump `access_count`. A keep-alive moves
/// `accessed_on` without counting as an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessTracker {
    /// Timestamp of the most recent read or keep-alive
    pub accessed_on: DateTime<Utc>,
    /// Number of successful reads since insertion
    pub access_count: u64,
}

impl AccessTracker {
    // == Constructor ==
    /// Creates a tracker with zero accesses, last touched at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            accessed_on: now,
            access_count: 0,
        }
    }

    // == Record Access ==
    /// Records a successful read at `now`.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.accessed_on = now;
        self.access_count += 1;
    }

    // == Keep Alive ==
    /// Moves the reference point forward without counting an access.
    pub fn keep_alive(&mut self, now: DateTime<Utc>) {
        self.accessed_on = now;
    }
}

// == Ranking ==
/// Orders entries by descending access count, ties by insertion order, and
/// keeps at most `limit` of them.
///
/// Counts are read once per entry before sorting; concurrent reads may keep
/// bumping them while the ranking is built.
pub fn rank_most_accessed<K, V>(mut entries: Vec<Arc<Entry<K, V>>>, limit: usize) -> Vec<Arc<Entry<K, V>>> {
    entries.sort_by_cached_key(|entry| (Reverse(entry.access_count()), entry.sequence()));
    entries.truncate(limit);
    entries
}
