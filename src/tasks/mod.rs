//! Background Tasks Module
//!
//! Background expiration for cache stores.
//!
//! # Tasks
//! - Janitor: removes expired entries of a default-sweep store at a fixed interval
//! - Expiry timer: wakes a sliding table at its earliest upcoming deadline

mod expiry_timer;
mod janitor;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

pub(crate) use expiry_timer::spawn_expiry_timer;
pub(crate) use janitor::spawn_janitor;

// == Expiry Control ==
/// Shared state between a store and its background task.
///
/// Dropping the control (with its store) closes the stop channel, which ends
/// the task.
pub(crate) struct ExpiryControl {
    stop: watch::Sender<bool>,
    wake: Arc<Notify>,
    /// Deadline the expiry timer is currently sleeping towards
    next_wake: Mutex<Option<DateTime<Utc>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiryControl {
    pub(crate) fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            stop,
            wake: Arc::new(Notify::new()),
            next_wake: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub(crate) fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub(crate) fn wake_signal(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub(crate) fn attach(&self, task: JoinHandle<()>) {
        *self.task.lock() = Some(task);
    }

    /// Signals the task to exit at its next wake-up.
    pub(crate) fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Re-arms the timer if `deadline` comes before the scheduled wake-up.
    pub(crate) fn wake_before(&self, deadline: DateTime<Utc>) {
        let mut next_wake = self.next_wake.lock();
        if next_wake.map_or(true, |scheduled| deadline < scheduled) {
            *next_wake = Some(deadline);
            self.wake.notify_one();
        }
    }

    /// Records the deadline the timer sleeps towards, `None` when idle.
    pub(crate) fn set_next_wake(&self, deadline: Option<DateTime<Utc>>) {
        *self.next_wake.lock() = deadline;
    }

    pub(crate) fn clear_schedule(&self) {
        self.set_next_wake(None);
    }

    #[cfg(test)]
    pub(crate) fn next_wake(&self) -> Option<DateTime<Utc>> {
        *self.next_wake.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_wake_before_only_moves_earlier() {
        let control = ExpiryControl::new();
        let now = Utc::now();

        control.wake_before(now + TimeDelta::seconds(10));
        assert_eq!(*control.next_wake.lock(), Some(now + TimeDelta::seconds(10)));

        control.wake_before(now + TimeDelta::seconds(20));
        assert_eq!(*control.next_wake.lock(), Some(now + TimeDelta::seconds(10)));

        control.wake_before(now + TimeDelta::seconds(5));
        assert_eq!(*control.next_wake.lock(), Some(now + TimeDelta::seconds(5)));

        control.clear_schedule();
        assert_eq!(*control.next_wake.lock(), None);
    }

    #[test]
    fn test_stop_is_observed_by_subscribers() {
        let control = ExpiryControl::new();
        let rx = control.subscribe_stop();
        assert!(!*rx.borrow());

        control.stop();
        assert!(*rx.borrow());
        assert!(!control.is_running());
    }
}
