//! Cache Store Module
//!
//! Main cache engine: a concurrent key map with per-entry expiration,
//! lifecycle callbacks and a miss-loader.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::cache::callbacks::{self, CallbackRegistry, MissLoader};
use crate::cache::{rank_most_accessed, AccessTracker, Entry, ExpirationPolicy, LifeSpan, Loaded};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_expiry_timer, spawn_janitor, ExpiryControl};

// == Table ==
/// Key map plus the insertion counter, guarded together.
struct Table<K, V> {
    items: HashMap<K, Arc<Entry<K, V>>>,
    next_sequence: u64,
}

impl<K: Eq + Hash, V> Table<K, V> {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            next_sequence: 0,
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

struct Shared<K, V> {
    name: String,
    policy: ExpirationPolicy,
    default_life_span: Option<Duration>,
    table: RwLock<Table<K, V>>,
    callbacks: RwLock<CallbackRegistry<K, V>>,
    control: ExpiryControl,
}

/// How an insertion treats a live entry already stored under the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertMode {
    IfAbsent,
    IfPresent,
}

/// New entry plus the expired entry it replaced, if any.
type Placed<K, V> = (Arc<Entry<K, V>>, Option<Arc<Entry<K, V>>>);

/// Outcome of one expiration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sweep {
    /// Number of entries removed
    pub removed: usize,
    /// Earliest deadline among the entries that remain
    pub next_deadline: Option<DateTime<Utc>>,
}

// == Cache Store ==
/// Handle to a concurrent expiring cache.
///
/// Cloning is cheap and yields another handle to the same cache. Background
/// expiration stops once the last handle is dropped.
pub struct Store<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for Store<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Non-owning handle held by background tasks.
pub(crate) struct WeakStore<K, V> {
    shared: Weak<Shared<K, V>>,
}

impl<K, V> WeakStore<K, V> {
    pub(crate) fn upgrade(&self) -> Option<Store<K, V>> {
        self.shared.upgrade().map(|shared| Store { shared })
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates a default-sweep store.
    ///
    /// # Arguments
    /// * `default_expiration` - Life span for `LifeSpan::Default`; zero never expires
    /// * `cleanup_interval` - Janitor interval; zero disables the janitor
    ///
    /// The janitor runs on the tokio runtime current at the call. Without a
    /// runtime, expired entries are only hidden from reads, not removed.
    pub fn new(default_expiration: Duration, cleanup_interval: Duration) -> Self {
        let store = Self::build(
            "default".to_string(),
            ExpirationPolicy::Sweep,
            non_zero(default_expiration),
        );
        if let Some(interval) = non_zero(cleanup_interval) {
            store.start_janitor(interval);
        }
        store
    }

    /// Creates a default-sweep store from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.default_expiration, config.cleanup_interval)
    }

    /// Creates a default-sweep store pre-populated with `items`.
    pub fn with_items<I>(config: &CacheConfig, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V, LifeSpan)>,
    {
        let store = Self::from_config(config);
        for (key, value, life_span) in items {
            store.set(key, value, life_span);
        }
        store
    }

    /// Creates a named sliding-expiration table.
    ///
    /// Each entry's life span is supplied at insertion; reads and keep-alives
    /// push its deadline out. A single wake timer removes entries as their
    /// deadlines pass.
    pub fn table(name: impl Into<String>) -> Self {
        let store = Self::build(name.into(), ExpirationPolicy::Sliding, None);
        store.start_expiry_timer();
        store
    }

    fn build(name: String, policy: ExpirationPolicy, default_life_span: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                policy,
                default_life_span,
                table: RwLock::new(Table::new()),
                callbacks: RwLock::new(CallbackRegistry::new()),
                control: ExpiryControl::new(),
            }),
        }
    }

    fn start_janitor(&self, interval: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(
                "No tokio runtime for cache '{}'; janitor disabled, expired entries are removed lazily",
                self.shared.name
            );
            return;
        };
        let task = spawn_janitor(
            &runtime,
            self.downgrade(),
            interval,
            self.shared.control.subscribe_stop(),
        );
        self.shared.control.attach(task);
    }

    fn start_expiry_timer(&self) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(
                "No tokio runtime for cache '{}'; expiry timer disabled, expired entries are removed lazily",
                self.shared.name
            );
            return;
        };
        let task = spawn_expiry_timer(
            &runtime,
            self.downgrade(),
            self.shared.control.wake_signal(),
            self.shared.control.subscribe_stop(),
        );
        self.shared.control.attach(task);
    }

    pub(crate) fn downgrade(&self) -> WeakStore<K, V> {
        WeakStore {
            shared: Arc::downgrade(&self.shared),
        }
    }

    // == Accessors ==
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn policy(&self) -> ExpirationPolicy {
        self.shared.policy
    }

    /// Store-wide life span for `LifeSpan::Default`; `None` never expires.
    pub fn default_life_span(&self) -> Option<Duration> {
        self.shared.default_life_span
    }

    /// Deadline of an entry under this store's policy.
    pub fn expires_at(&self, entry: &Entry<K, V>) -> Option<DateTime<Utc>> {
        self.shared.policy.deadline(entry)
    }

    /// Stops background expiration. Reads keep hiding expired entries.
    pub fn stop_janitor(&self) {
        self.shared.control.stop();
    }

    /// True while a background expiration task is alive.
    pub fn janitor_running(&self) -> bool {
        self.shared.control.is_running()
    }

    fn is_expired(&self, entry: &Entry<K, V>, now: DateTime<Utc>) -> bool {
        self.shared.policy.is_expired(entry, now)
    }

    // == Insertion ==
    /// Stores a value, replacing whatever was stored under the key.
    ///
    /// Access metadata starts fresh. Add callbacks fire after the entry is
    /// visible to other callers.
    pub fn set(&self, key: K, value: V, life_span: impl Into<LifeSpan>) -> Arc<Entry<K, V>> {
        let now = Utc::now();
        let placed = {
            let mut table = self.shared.table.write();
            let live = self.holds_live(&table, &key, now);
            self.place(&mut table, key, value, life_span.into(), live, now)
        };
        self.announce(placed)
    }

    /// Alias of [`Store::set`].
    pub fn add(&self, key: K, value: V, life_span: impl Into<LifeSpan>) -> Arc<Entry<K, V>> {
        self.set(key, value, life_span)
    }

    /// Stores a value only if the key holds no live entry.
    ///
    /// Fails with `AlreadyExists` otherwise; the check and the insert are atomic.
    pub fn insert_new(&self, key: K, value: V, life_span: impl Into<LifeSpan>) -> Result<Arc<Entry<K, V>>> {
        self.insert(key, value, life_span.into(), InsertMode::IfAbsent)
    }

    /// Boolean form of [`Store::insert_new`]: true if the value was stored.
    pub fn not_found_add(&self, key: K, value: V, life_span: impl Into<LifeSpan>) -> bool {
        self.insert_new(key, value, life_span).is_ok()
    }

    /// Stores a value only if the key holds a live entry, else `NotFound`.
    pub fn replace(&self, key: K, value: V, life_span: impl Into<LifeSpan>) -> Result<Arc<Entry<K, V>>> {
        self.insert(key, value, life_span.into(), InsertMode::IfPresent)
    }

    fn insert(&self, key: K, value: V, life_span: LifeSpan, mode: InsertMode) -> Result<Arc<Entry<K, V>>> {
        let now = Utc::now();
        let placed = {
            let mut table = self.shared.table.write();
            let live = self.holds_live(&table, &key, now);
            match mode {
                InsertMode::IfAbsent if live => return Err(CacheError::already_exists(&key)),
                InsertMode::IfPresent if !live => return Err(CacheError::not_found(&key)),
                InsertMode::IfAbsent | InsertMode::IfPresent => {}
            }
            self.place(&mut table, key, value, life_span, live, now)
        };
        Ok(self.announce(placed))
    }

    fn holds_live(&self, table: &Table<K, V>, key: &K, now: DateTime<Utc>) -> bool {
        table
            .items
            .get(key)
            .is_some_and(|existing| !self.is_expired(existing, now))
    }

    /// Stores a fresh entry under the held table lock.
    ///
    /// Returns the new entry and the replaced one if it had already expired.
    fn place(
        &self,
        table: &mut Table<K, V>,
        key: K,
        value: V,
        life_span: LifeSpan,
        live: bool,
        now: DateTime<Utc>,
    ) -> Placed<K, V> {
        let resolved = life_span.resolve(self.shared.default_life_span);
        let sequence = table.next_sequence();
        let entry = Arc::new(Entry::new(key.clone(), value, resolved, sequence, now));
        let replaced = table.items.insert(key, entry.clone());
        (entry, replaced.filter(|_| !live))
    }

    /// Runs the post-insert work once the table lock is released.
    fn announce(&self, (entry, stale): Placed<K, V>) -> Arc<Entry<K, V>> {
        // An overwritten entry that had already expired counts as expired.
        if let Some(stale) = stale {
            self.fire_expired(&stale);
        }
        self.reschedule_for(&entry);

        let hooks = self.shared.callbacks.read().add_hooks();
        callbacks::fire("add", &hooks, &entry);
        entry
    }

    /// Inserts a restored entry unless the key holds a live one.
    ///
    /// Used when loading snapshots; add callbacks are not fired.
    pub(crate) fn restore(
        &self,
        key: K,
        value: V,
        life_span: Option<Duration>,
        created_on: DateTime<Utc>,
        access: AccessTracker,
    ) -> bool {
        let now = Utc::now();
        let (entry, replaced) = {
            let mut table = self.shared.table.write();
            if table
                .items
                .get(&key)
                .is_some_and(|existing| !self.is_expired(existing, now))
            {
                return false;
            }
            let sequence = table.next_sequence();
            let entry = Arc::new(Entry::restore(
                key.clone(),
                value,
                life_span,
                sequence,
                created_on,
                access,
            ));
            if self.is_expired(&entry, now) {
                return false;
            }
            let replaced = table.items.insert(key, entry.clone());
            (entry, replaced)
        };

        if let Some(stale) = replaced {
            self.fire_expired(&stale);
        }
        self.reschedule_for(&entry);
        true
    }

    // == Lookup ==
    /// Returns the live entry and records the access.
    fn lookup(&self, key: &K, now: DateTime<Utc>) -> Option<Arc<Entry<K, V>>> {
        let table = self.shared.table.read();
        let entry = table.items.get(key)?;
        if self.is_expired(entry, now) {
            return None;
        }
        entry.record_access(now);
        Some(entry.clone())
    }

    /// Returns the live entry under `key`, consulting the miss-loader on a miss.
    pub fn value(&self, key: &K) -> Result<Arc<Entry<K, V>>> {
        self.value_with(key, &[])
    }

    /// Like [`Store::value`], forwarding `args` to the miss-loader.
    ///
    /// The loader runs synchronously on the calling thread with no lock held.
    /// A loader producing nothing is reported as `NotFound`.
    pub fn value_with(&self, key: &K, args: &[Value]) -> Result<Arc<Entry<K, V>>> {
        if let Some(entry) = self.lookup(key, Utc::now()) {
            return Ok(entry);
        }

        let Some(loader) = self.shared.callbacks.read().miss_loader() else {
            return Err(CacheError::not_found(key));
        };

        let mut loaded = None;
        callbacks::run_isolated("miss-loader", || loaded = loader(key, args));
        match loaded {
            Some(Loaded { value, life_span }) => {
                debug!("Miss-loader materialized {:?} in cache '{}'", key, self.shared.name);
                Ok(self.set(key.clone(), value, life_span))
            }
            None => Err(CacheError::not_found(key)),
        }
    }

    /// True if `key` holds a live entry. Does not count as an access.
    pub fn exists(&self, key: &K) -> bool {
        let now = Utc::now();
        self.shared
            .table
            .read()
            .items
            .get(key)
            .is_some_and(|entry| !self.is_expired(entry, now))
    }

    /// Resets the entry's last-access time without counting a read.
    pub fn keep_alive(&self, key: &K) -> Result<()> {
        let now = Utc::now();
        let table = self.shared.table.read();
        match table.items.get(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                entry.keep_alive();
                Ok(())
            }
            _ => Err(CacheError::not_found(key)),
        }
    }

    // == Delete ==
    /// Removes an entry and fires every evict callback once, in registration order.
    ///
    /// Deleting an absent or already expired key is `NotFound`.
    pub fn delete(&self, key: &K) -> Result<Arc<Entry<K, V>>> {
        let now = Utc::now();
        let removed = self.shared.table.write().items.remove(key);

        match removed {
            Some(entry) if self.is_expired(&entry, now) => {
                self.fire_expired(&entry);
                Err(CacheError::not_found(key))
            }
            Some(entry) => {
                let hooks = self.shared.callbacks.read().evict_hooks();
                callbacks::fire("evict", &hooks, &entry);
                Ok(entry)
            }
            None => Err(CacheError::not_found(key)),
        }
    }

    /// Removes every expired entry, firing expiration callbacks for each.
    ///
    /// Returns the number of entries removed.
    pub fn delete_expired(&self) -> usize {
        self.sweep().removed
    }

    /// One expiration pass, also reporting the next deadline.
    pub(crate) fn sweep(&self) -> Sweep {
        let now = Utc::now();
        let policy = self.shared.policy;

        let (expired, next_deadline) = {
            let mut table = self.shared.table.write();
            let expired_keys: Vec<K> = table
                .items
                .iter()
                .filter(|(_, entry)| policy.is_expired(entry, now))
                .map(|(key, _)| key.clone())
                .collect();
            let expired: Vec<_> = expired_keys
                .iter()
                .filter_map(|key| table.items.remove(key))
                .collect();
            let next_deadline = table
                .items
                .values()
                .filter_map(|entry| policy.deadline(entry))
                .min();
            // Published before inserts can run, so a later insert with an
            // earlier deadline always sees it and wakes the timer.
            if policy == ExpirationPolicy::Sliding {
                self.shared.control.set_next_wake(next_deadline);
            }
            (expired, next_deadline)
        };

        for entry in &expired {
            self.fire_expired(entry);
        }

        Sweep {
            removed: expired.len(),
            next_deadline,
        }
    }

    /// Automatic removal: about-to-expire hook first, then evict callbacks.
    fn fire_expired(&self, entry: &Entry<K, V>) {
        if let Some(hook) = entry.take_about_to_expire() {
            callbacks::run_isolated("about-to-expire", || hook(entry.key()));
        }
        let hooks = self.shared.callbacks.read().evict_hooks();
        callbacks::fire("evict", &hooks, entry);
    }

    fn reschedule_for(&self, entry: &Entry<K, V>) {
        if self.shared.policy != ExpirationPolicy::Sliding {
            return;
        }
        if let Some(deadline) = self.shared.policy.deadline(entry) {
            self.shared.control.wake_before(deadline);
        }
    }

    // == Bulk ==
    /// Number of live entries. Expired entries not yet swept are excluded.
    pub fn count(&self) -> usize {
        let now = Utc::now();
        self.shared
            .table
            .read()
            .items
            .values()
            .filter(|entry| !self.is_expired(entry, now))
            .count()
    }

    /// Empties the store without firing any per-entry callback.
    pub fn flush(&self) {
        let dropped = {
            let mut table = self.shared.table.write();
            self.shared.control.clear_schedule();
            std::mem::replace(&mut *table, Table::new())
        };
        debug!(
            "Flushed {} entries from cache '{}'",
            dropped.items.len(),
            self.shared.name
        );
    }

    /// Live entries in insertion order.
    pub fn items(&self) -> Vec<Arc<Entry<K, V>>> {
        let now = Utc::now();
        let mut live: Vec<_> = self
            .shared
            .table
            .read()
            .items
            .values()
            .filter(|entry| !self.is_expired(entry, now))
            .cloned()
            .collect();
        live.sort_by_key(|entry| entry.sequence());
        live
    }

    /// Visits every live entry in insertion order, outside the store lock.
    pub fn foreach<F>(&self, mut visit: F)
    where
        F: FnMut(&Entry<K, V>),
    {
        for entry in self.items() {
            visit(&entry);
        }
    }

    /// Up to `n` live entries by descending access count, ties by insertion order.
    pub fn most_accessed(&self, n: usize) -> Vec<Arc<Entry<K, V>>> {
        rank_most_accessed(self.items(), n)
    }

    // == Callback Registration ==
    /// Replaces the primary add callback.
    pub fn on_add<F>(&self, callback: F)
    where
        F: Fn(&Entry<K, V>) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().set_on_add(Arc::new(callback));
    }

    /// Appends an add callback.
    pub fn add_add_callback<F>(&self, callback: F)
    where
        F: Fn(&Entry<K, V>) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().push_add(Arc::new(callback));
    }

    pub fn remove_add_callbacks(&self) {
        self.shared.callbacks.write().clear_add();
    }

    /// Replaces the cache-wide evict callback, which fires before the appended ones.
    pub fn on_evict<F>(&self, callback: F)
    where
        F: Fn(&Entry<K, V>) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().set_on_evict(Arc::new(callback));
    }

    /// Appends an evict callback.
    pub fn add_evict_callback<F>(&self, callback: F)
    where
        F: Fn(&Entry<K, V>) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().push_evict(Arc::new(callback));
    }

    pub fn remove_evict_callbacks(&self) {
        self.shared.callbacks.write().clear_evict();
    }

    /// Installs the miss-loader, replacing any previous one.
    pub fn set_miss_loader<F>(&self, loader: F)
    where
        F: Fn(&K, &[Value]) -> Option<Loaded<V>> + Send + Sync + 'static,
    {
        let loader: MissLoader<K, V> = Arc::new(loader);
        self.shared.callbacks.write().set_miss_loader(Some(loader));
    }

    pub fn clear_miss_loader(&self) {
        self.shared.callbacks.write().set_miss_loader(None);
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Returns a copy of the live value under `key`, consulting the miss-loader on a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        self.value(key).ok().map(|entry| entry.value().clone())
    }

    /// Like [`Store::get`] without the loader, also returning the entry's deadline.
    pub fn get_with_expiration(&self, key: &K) -> Option<(V, Option<DateTime<Utc>>)> {
        let entry = self.lookup(key, Utc::now())?;
        Some((entry.value().clone(), self.expires_at(&entry)))
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}
