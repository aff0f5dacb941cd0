//! Callback Registry Module
//!
//! Add/evict hooks and the miss-loader of a store.
//!
//! Hooks are never invoked while a store lock is held, so a hook may call
//! back into the store. A panicking hook is caught and logged.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use crate::cache::{Entry, LifeSpan};

/// Hook receiving an entry that was just inserted or removed.
pub type EntryCallback<K, V> = Arc<dyn Fn(&Entry<K, V>) + Send + Sync>;

/// Materializes a value for a missing key. Extra arguments are passed through
/// from `Store::value_with`.
pub type MissLoader<K, V> = Arc<dyn Fn(&K, &[Value]) -> Option<Loaded<V>> + Send + Sync>;

// == Loaded ==
/// Value produced by a miss-loader, with the life span to store it under.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<V> {
    pub value: V,
    pub life_span: LifeSpan,
}

impl<V> Loaded<V> {
    pub fn new(value: V, life_span: impl Into<LifeSpan>) -> Self {
        Self {
            value,
            life_span: life_span.into(),
        }
    }
}

// == Callback Registry ==
pub(crate) struct CallbackRegistry<K, V> {
    on_add: Option<EntryCallback<K, V>>,
    add_callbacks: Vec<EntryCallback<K, V>>,
    on_evict: Option<EntryCallback<K, V>>,
    evict_callbacks: Vec<EntryCallback<K, V>>,
    miss_loader: Option<MissLoader<K, V>>,
}

impl<K, V> CallbackRegistry<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            on_add: None,
            add_callbacks: Vec::new(),
            on_evict: None,
            evict_callbacks: Vec::new(),
            miss_loader: None,
        }
    }

    pub(crate) fn set_on_add(&mut self, callback: EntryCallback<K, V>) {
        self.on_add = Some(callback);
    }

    pub(crate) fn push_add(&mut self, callback: EntryCallback<K, V>) {
        self.add_callbacks.push(callback);
    }

    pub(crate) fn clear_add(&mut self) {
        self.on_add = None;
        self.add_callbacks.clear();
    }

    pub(crate) fn set_on_evict(&mut self, callback: EntryCallback<K, V>) {
        self.on_evict = Some(callback);
    }

    pub(crate) fn push_evict(&mut self, callback: EntryCallback<K, V>) {
        self.evict_callbacks.push(callback);
    }

    pub(crate) fn clear_evict(&mut self) {
        self.on_evict = None;
        self.evict_callbacks.clear();
    }

    pub(crate) fn set_miss_loader(&mut self, loader: Option<MissLoader<K, V>>) {
        self.miss_loader = loader;
    }

    pub(crate) fn miss_loader(&self) -> Option<MissLoader<K, V>> {
        self.miss_loader.clone()
    }

    /// Add hooks in firing order: the replaceable slot, then the list.
    pub(crate) fn add_hooks(&self) -> Vec<EntryCallback<K, V>> {
        self.on_add
            .iter()
            .chain(self.add_callbacks.iter())
            .cloned()
            .collect()
    }

    /// Evict hooks in firing order: the cache-wide slot, then the list.
    pub(crate) fn evict_hooks(&self) -> Vec<EntryCallback<K, V>> {
        self.on_evict
            .iter()
            .chain(self.evict_callbacks.iter())
            .cloned()
            .collect()
    }
}

// == Invocation ==
/// Runs every hook against the entry, isolating panics.
pub(crate) fn fire<K, V>(kind: &str, hooks: &[EntryCallback<K, V>], entry: &Entry<K, V>) {
    for hook in hooks {
        run_isolated(kind, || hook(entry));
    }
}

/// Runs user code, logging instead of propagating a panic.
pub(crate) fn run_isolated<F: FnOnce()>(kind: &str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("{} callback panicked; continuing", kind);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> EntryCallback<&'static str, i32> {
        let log = log.clone();
        Arc::new(move |_: &Entry<&'static str, i32>| log.lock().push(tag))
    }

    #[test]
    fn test_hooks_fire_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        registry.push_evict(recorder(&log, "first"));
        registry.push_evict(recorder(&log, "second"));
        registry.set_on_evict(recorder(&log, "wide"));

        let entry = Entry::new("k", 1, None, 0, Utc::now());
        fire("evict", &registry.evict_hooks(), &entry);

        assert_eq!(*log.lock(), vec!["wide", "first", "second"]);
    }

    #[test]
    fn test_set_on_add_replaces_slot_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        registry.set_on_add(recorder(&log, "old"));
        registry.push_add(recorder(&log, "listed"));
        registry.set_on_add(recorder(&log, "new"));

        let entry = Entry::new("k", 1, None, 0, Utc::now());
        fire("add", &registry.add_hooks(), &entry);
        assert_eq!(*log.lock(), vec!["new", "listed"]);

        registry.clear_add();
        assert!(registry.add_hooks().is_empty());
    }

    #[test]
    fn test_panicking_hook_does_not_stop_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry: CallbackRegistry<&'static str, i32> = CallbackRegistry::new();
        registry.push_add(Arc::new(|_: &Entry<&'static str, i32>| panic!("boom")));
        registry.push_add(recorder(&log, "after"));

        let entry = Entry::new("k", 1, None, 0, Utc::now());
        fire("add", &registry.add_hooks(), &entry);

        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn test_loader_roundtrip() {
        let mut registry: CallbackRegistry<String, String> = CallbackRegistry::new();
        assert!(registry.miss_loader().is_none());

        registry.set_miss_loader(Some(Arc::new(|key: &String, _args: &[Value]| {
            Some(Loaded::new(format!("loaded {key}"), LifeSpan::Never))
        })));

        let loader = registry.miss_loader().expect("loader registered");
        let loaded = loader(&"a".to_string(), &[]).expect("value produced");
        assert_eq!(loaded.value, "loaded a");
    }
}
