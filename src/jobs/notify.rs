use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// In-process wakeups from the job driver to push-mode delivery loops.
///
/// Purely an optimisation: delivery loops also re-read on a fixed tick, so
/// a missed notification only delays a frame. An entry lives while at
/// least one `Subscription` for the job is alive.
#[derive(Default)]
pub struct JobNotifier {
    channels: Mutex<HashMap<String, Arc<Notify>>>,
}

/// A follower's handle on one job's wakeups. Dropping the last one for a
/// job removes the job's entry.
pub struct Subscription<'a> {
    notifier: &'a JobNotifier,
    job_id: String,
    notify: Arc<Notify>,
}

impl Deref for Subscription<'_> {
    type Target = Notify;

    fn deref(&self) -> &Notify {
        &self.notify
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.notifier.release(&self.job_id, &self.notify);
    }
}

impl JobNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that is woken whenever `job_id` changes.
    pub fn subscribe(&self, job_id: &str) -> Subscription<'_> {
        let notify = match self.channels.lock() {
            Ok(mut map) => Arc::clone(
                map.entry(job_id.to_string())
                    .or_insert_with(|| Arc::new(Notify::new())),
            ),
            // Poisoned: hand out a detached handle, the tick still drives delivery
            Err(_) => Arc::new(Notify::new()),
        };
        Subscription {
            notifier: self,
            job_id: job_id.to_string(),
            notify,
        }
    }

    /// Wake every loop currently following `job_id`.
    pub fn notify(&self, job_id: &str) {
        if let Ok(map) = self.channels.lock() {
            if let Some(n) = map.get(job_id) {
                n.notify_waiters();
            }
        }
    }

    /// Drop the channel once the job is terminal.
    pub fn forget(&self, job_id: &str) {
        if let Ok(mut map) = self.channels.lock() {
            map.remove(job_id);
        }
    }

    pub fn tracked(&self) -> usize {
        self.channels.lock().map(|m| m.len()).unwrap_or(0)
    }

    // The map holds one reference and the departing subscription another;
    // any more means other followers remain.
    fn release(&self, job_id: &str, notify: &Arc<Notify>) {
        if let Ok(mut map) = self.channels.lock() {
            let last = map
                .get(job_id)
                .is_some_and(|held| Arc::ptr_eq(held, notify) && Arc::strong_count(held) <= 2);
            if last {
                map.remove(job_id);
            }
        }
    }
}
