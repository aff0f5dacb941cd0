//! Janitor Task
//!
//! Background task that periodically removes expired entries from a
//! default-sweep store.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::WeakStore;

/// Spawns a task that sweeps the store every `interval`.
///
/// Each tick removes every expired entry and fires its expiration callbacks.
/// The task exits when the stop signal changes or closes, or when the store
/// has been dropped.
///
/// # Arguments
/// * `runtime` - Runtime the task is spawned on
/// * `store` - Non-owning handle to the swept store
/// * `interval` - Time between sweeps
/// * `stop` - Stop signal owned by the store
pub(crate) fn spawn_janitor<K, V>(
    runtime: &Handle,
    store: WeakStore<K, V>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    runtime.spawn(async move {
        info!("Starting janitor with interval of {:?}", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => break,
            }

            let Some(live) = store.upgrade() else {
                break;
            };
            let removed = live.delete_expired();

            if removed > 0 {
                info!("Janitor for '{}': removed {} expired entries", live.name(), removed);
            } else {
                debug!("Janitor for '{}': no expired entries found", live.name());
            }
        }

        info!("Janitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cache::{Entry, LifeSpan, Store};

    #[tokio::test]
    async fn test_janitor_removes_expired_entries() {
        let store: Store<String, String> =
            Store::new(Duration::ZERO, Duration::from_millis(20));
        let evicted = Arc::new(AtomicUsize::new(0));
        let counter = evicted.clone();
        store.on_evict(move |_: &Entry<String, String>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set("expire_soon".to_string(), "value".to_string(), Duration::from_millis(30));
        assert!(store.janitor_running());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.count(), 0);
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_janitor_preserves_valid_entries() {
        let store: Store<String, String> =
            Store::new(Duration::from_secs(3600), Duration::from_millis(20));

        store.set("long_lived".to_string(), "value".to_string(), LifeSpan::Default);

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.get(&"long_lived".to_string()), Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_janitor_can_be_stopped() {
        let store: Store<String, String> =
            Store::new(Duration::ZERO, Duration::from_millis(20));
        assert!(store.janitor_running());

        store.stop_janitor();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.janitor_running(), "Janitor should be finished after stop");
    }

    #[tokio::test]
    async fn test_zero_interval_disables_janitor() {
        let store: Store<String, String> = Store::new(Duration::ZERO, Duration::ZERO);
        store.set("k".to_string(), "v".to_string(), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!store.janitor_running());
        assert!(!store.exists(&"k".to_string()));
        // Still stored until something sweeps it
        assert_eq!(store.delete_expired(), 1);
    }
}
