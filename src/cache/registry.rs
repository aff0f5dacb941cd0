//! Named cache registry
//!
//! Hands out sliding-expiration tables by name, creating them on first use.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use parking_lot::RwLock;
use tracing::debug;

use crate::cache::Store;

// == Registry ==
/// Create-or-get registry of named sliding tables.
///
/// Repeated lookups of the same name return handles to the same table.
pub struct Registry<K, V> {
    tables: RwLock<HashMap<String, Store<K, V>>>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table called `name`, creating it if needed.
    pub fn cache(&self, name: &str) -> Store<K, V> {
        if let Some(table) = self.tables.read().get(name) {
            return table.clone();
        }

        let mut tables = self.tables.write();
        // Another caller may have created it between the two locks
        tables
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating cache table '{}'", name);
                Store::table(name)
            })
            .clone()
    }

    /// Returns the table called `name` if it exists.
    pub fn get(&self, name: &str) -> Option<Store<K, V>> {
        self.tables.read().get(name).cloned()
    }

    /// Removes the table and stops its expiry timer.
    ///
    /// Handles obtained earlier keep working but no longer expire entries in
    /// the background.
    pub fn remove(&self, name: &str) -> Option<Store<K, V>> {
        let removed = self.tables.write().remove(name)?;
        removed.stop_janitor();
        Some(removed)
    }

    /// Names of all registered tables, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}
