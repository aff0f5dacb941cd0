//! Expiry Timer Task
//!
//! Single wake-up timer for a sliding-expiration table. It sleeps until the
//! earliest upcoming deadline, removes whatever is due, and re-arms for the
//! next deadline or idles when nothing can expire. Insertions with an earlier
//! deadline wake it early.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::WeakStore;

/// Spawns the expiry timer of a sliding table.
///
/// # Arguments
/// * `runtime` - Runtime the task is spawned on
/// * `store` - Non-owning handle to the table
/// * `wake` - Notified when an earlier deadline is scheduled
/// * `stop` - Stop signal owned by the table
pub(crate) fn spawn_expiry_timer<K, V>(
    runtime: &Handle,
    store: WeakStore<K, V>,
    wake: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    runtime.spawn(async move {
        loop {
            let next = {
                let Some(live) = store.upgrade() else {
                    break;
                };
                let sweep = live.sweep();
                if sweep.removed > 0 {
                    info!(
                        "Expiry timer for '{}': removed {} expired entries",
                        live.name(),
                        sweep.removed
                    );
                }
                if let Some(deadline) = sweep.next_deadline {
                    debug!("Expiry timer for '{}': next check at {}", live.name(), deadline);
                }
                sweep.next_deadline
            };

            tokio::select! {
                _ = sleep_until(next) => {}
                _ = wake.notified() => {}
                _ = stop.changed() => break,
            }
        }

        info!("Expiry timer stopped");
    })
}

/// Sleeps just past `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(deadline) => {
            let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            // Entries expire strictly after their deadline
            tokio::time::sleep(remaining + Duration::from_millis(1)).await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::cache::{Entry, Store};

    #[tokio::test]
    async fn test_timer_removes_entries_at_their_deadline() {
        let table: Store<String, i32> = Store::table("timer_basic");
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = evicted.clone();
        table.on_evict(move |entry: &Entry<String, i32>| log.lock().push(entry.key().clone()));

        table.add("slow".to_string(), 1, Duration::from_millis(400));
        table.add("fast".to_string(), 2, Duration::from_millis(40));
        assert!(table.janitor_running());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*evicted.lock(), vec!["fast".to_string()]);
        assert_eq!(table.count(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*evicted.lock(), vec!["fast".to_string(), "slow".to_string()]);
    }

    #[tokio::test]
    async fn test_timer_fires_about_to_expire_once() {
        let table: Store<String, i32> = Store::table("timer_about_to_expire");
        let fired = Arc::new(AtomicUsize::new(0));

        let entry = table.add("k".to_string(), 1, Duration::from_millis(30));
        let counter = fired.clone();
        entry.set_about_to_expire_callback(move |key| {
            assert_eq!(key, "k");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!table.exists(&"k".to_string()));
    }

    #[tokio::test]
    async fn test_timer_honours_keep_alive() {
        let table: Store<String, i32> = Store::table("timer_keep_alive");
        table.add("k".to_string(), 1, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(60)).await;
        table.keep_alive(&"k".to_string()).unwrap();

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(table.exists(&"k".to_string()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!table.exists(&"k".to_string()));
        assert_eq!(table.count(), 0);
    }

    #[tokio::test]
    async fn test_timer_stops() {
        let table: Store<String, i32> = Store::table("timer_stop");
        table.stop_janitor();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!table.janitor_running());
    }
}
