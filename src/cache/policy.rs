//! Expiration Policy Module
//!
//! Decides whether an entry is still alive at a given instant.

use chrono::{DateTime, Utc};

use crate::cache::Entry;

// == Expiration Policy ==
/// Selected once per store at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationPolicy {
    /// Absolute deadline fixed at creation: `created_on + life_span`.
    /// Reads never extend it. Swept on a fixed interval.
    Sweep,
    /// Sliding deadline: `accessed_on + life_span`. Every read or
    /// keep-alive pushes it out. Swept by an adaptive wake timer.
    Sliding,
}

impl ExpirationPolicy {
    /// Instant after which the entry is expired, `None` if it never expires.
    pub fn deadline<K, V>(&self, entry: &Entry<K, V>) -> Option<DateTime<Utc>> {
        let life_span = entry.life_span_delta()?;
        let reference = match self {
            ExpirationPolicy::Sweep => entry.created_on(),
            ExpirationPolicy::Sliding => entry.accessed_on(),
        };
        reference.checked_add_signed(life_span)
    }

    // == Is Expired ==
    /// An entry is expired strictly after its deadline.
    pub fn is_expired<K, V>(&self, entry: &Entry<K, V>, now: DateTime<Utc>) -> bool {
        match self.deadline(entry) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }
}
