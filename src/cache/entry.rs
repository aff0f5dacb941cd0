//! Cache Entry Module
//!
//! Defines the structure for individual cache entries and their life spans.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::cache::AccessTracker;

/// Hook fired with the entry's key right before it is removed by expiration.
pub type ExpireCallback<K> = Arc<dyn Fn(&K) + Send + Sync>;

// == Life Span ==
/// How long an entry stays alive.
///
/// `For(Duration::ZERO)` is treated the same as `Never`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifeSpan {
    /// Use the store-wide default, resolved once at insertion time
    #[default]
    Default,
    /// Never expires automatically
    Never,
    /// Expires after the given duration
    For(Duration),
}

impl LifeSpan {
    /// Resolves to a concrete duration, `None` meaning "never expires".
    pub(crate) fn resolve(self, default: Option<Duration>) -> Option<Duration> {
        match self {
            LifeSpan::Default => default,
            LifeSpan::Never => None,
            LifeSpan::For(d) if d.is_zero() => None,
            LifeSpan::For(d) => Some(d),
        }
    }
}

impl From<Duration> for LifeSpan {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            LifeSpan::Never
        } else {
            LifeSpan::For(d)
        }
    }
}

impl From<TimeDelta> for LifeSpan {
    /// Signed durations: zero or negative never expire.
    fn from(d: TimeDelta) -> Self {
        match d.to_std() {
            Ok(d) => LifeSpan::from(d),
            Err(_) => LifeSpan::Never,
        }
    }
}

// == Cache Entry ==
/// A single cached value with its metadata.
///
/// Entries are shared as `Arc<Entry>`; the value and creation metadata are
/// immutable, access bookkeeping sits behind the entry's own lock.
pub struct Entry<K, V> {
    key: K,
    value: V,
    created_on: DateTime<Utc>,
    /// Resolved life span, None = no expiration
    life_span: Option<Duration>,
    /// Insertion sequence within the owning store
    sequence: u64,
    access: Mutex<AccessTracker>,
    about_to_expire: Mutex<Option<ExpireCallback<K>>>,
}

impl<K, V> Entry<K, V> {
    // == Constructor ==
    pub(crate) fn new(key: K, value: V, life_span: Option<Duration>, sequence: u64, now: DateTime<Utc>) -> Self {
        Self::restore(key, value, life_span, sequence, now, AccessTracker::new(now))
    }

    /// Rebuilds an entry with previously recorded metadata.
    pub(crate) fn restore(
        key: K,
        value: V,
        life_span: Option<Duration>,
        sequence: u64,
        created_on: DateTime<Utc>,
        access: AccessTracker,
    ) -> Self {
        Self {
            key,
            value,
            created_on,
            life_span,
            sequence,
            access: Mutex::new(access),
            about_to_expire: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    pub fn accessed_on(&self) -> DateTime<Utc> {
        self.access.lock().accessed_on
    }

    pub fn access_count(&self) -> u64 {
        self.access.lock().access_count
    }

    /// Resolved life span; `None` if the entry never expires.
    pub fn life_span(&self) -> Option<Duration> {
        self.life_span
    }

    /// Consistent copy of the access counter and timestamp.
    pub fn access(&self) -> AccessTracker {
        *self.access.lock()
    }

    // == Keep Alive ==
    /// Resets the last-access timestamp to now without counting a read.
    ///
    /// Under sliding expiration this pushes the deadline out by a full life span.
    pub fn keep_alive(&self) {
        self.access.lock().keep_alive(Utc::now());
    }

    /// Installs the about-to-expire hook, replacing any previous one.
    pub fn set_about_to_expire_callback<F>(&self, callback: F)
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        *self.about_to_expire.lock() = Some(Arc::new(callback));
    }

    pub fn remove_about_to_expire_callback(&self) {
        *self.about_to_expire.lock() = None;
    }

    pub(crate) fn record_access(&self, now: DateTime<Utc>) {
        self.access.lock().record_access(now);
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn life_span_delta(&self) -> Option<TimeDelta> {
        self.life_span.and_then(|d| TimeDelta::from_std(d).ok())
    }

    /// Takes the about-to-expire hook so it can fire at most once.
    pub(crate) fn take_about_to_expire(&self) -> Option<ExpireCallback<K>> {
        self.about_to_expire.lock().take()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = self.access();
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("created_on", &self.created_on)
            .field("life_span", &self.life_span)
            .field("accessed_on", &access.accessed_on)
            .field("access_count", &access.access_count)
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_life_span_resolution() {
        let default = Some(Duration::from_secs(10));
        assert_eq!(LifeSpan::Default.resolve(default), default);
        assert_eq!(LifeSpan::Default.resolve(None), None);
        assert_eq!(LifeSpan::Never.resolve(default), None);
        assert_eq!(LifeSpan::For(Duration::ZERO).resolve(default), None);
        assert_eq!(
            LifeSpan::For(Duration::from_millis(5)).resolve(default),
            Some(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_life_span_from_signed_duration() {
        assert_eq!(LifeSpan::from(TimeDelta::seconds(-1)), LifeSpan::Never);
        assert_eq!(LifeSpan::from(TimeDelta::zero()), LifeSpan::Never);
        assert_eq!(
            LifeSpan::from(TimeDelta::milliseconds(250)),
            LifeSpan::For(Duration::from_millis(250))
        );
        assert_eq!(LifeSpan::from(Duration::ZERO), LifeSpan::Never);
    }

    #[test]
    fn test_entry_creation() {
        let now = Utc::now();
        let entry = Entry::new("key", 42, Some(Duration::from_secs(1)), 0, now);

        assert_eq!(*entry.key(), "key");
        assert_eq!(*entry.value(), 42);
        assert_eq!(entry.created_on(), now);
        assert_eq!(entry.accessed_on(), now);
        assert_eq!(entry.access_count(), 0);
        assert_eq!(entry.life_span(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_keep_alive_does_not_count_access() {
        let entry = Entry::new("key", 1, None, 0, Utc::now() - TimeDelta::seconds(5));
        let before = entry.accessed_on();

        entry.keep_alive();

        assert!(entry.accessed_on() > before);
        assert_eq!(entry.access_count(), 0);
    }

    #[test]
    fn test_about_to_expire_is_replaced_and_taken_once() {
        let entry = Entry::new("key", 1, None, 0, Utc::now());
        let calls = Arc::new(AtomicUsize::new(0));

        entry.set_about_to_expire_callback(|_| panic!("replaced hook must not run"));
        let counter = calls.clone();
        entry.set_about_to_expire_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        if let Some(hook) = entry.take_about_to_expire() {
            hook(entry.key());
        }
        assert!(entry.take_about_to_expire().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
