//! Keyed work queue feeding reconcilers.
//!
//! Keys are coalesced (a key waiting in the queue is never queued twice), handed out
//! in FIFO order, and never handed to two workers at once: a key re-added while it is
//! being reconciled is parked as dirty and re-queued when the worker calls `done`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conflux_core::meta::TypedRef;
use metrics::counter;
use rustc_hash::FxHashSet;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Default)]
struct QueueState {
    order: VecDeque<TypedRef>,
    queued: FxHashSet<TypedRef>,
    in_flight: FxHashSet<TypedRef>,
    dirty: FxHashSet<TypedRef>,
    dropped: u64,
    shutdown: bool,
}

impl QueueState {
    fn push(&mut self, key: TypedRef, cap: usize) -> bool {
        if self.queued.contains(&key) {
            return false;
        }
        if self.order.len() >= cap {
            if let Some(old) = self.order.pop_front() {
                self.queued.remove(&old);
                self.dropped += 1;
                counter!("queue_dropped_total", 1u64);
                warn!(key = %old, "work queue full; dropped oldest key");
            }
        }
        self.queued.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    cap: usize,
}

impl WorkQueue {
    pub fn with_capacity(cap: usize) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(QueueState::default()), notify: Notify::new(), cap: cap.max(1) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn add(&self, key: TypedRef) {
        let pushed = {
            let mut st = self.lock();
            if st.shutdown {
                return;
            }
            if st.in_flight.contains(&key) {
                st.dirty.insert(key);
                false
            } else {
                st.push(key, self.cap)
            }
        };
        if pushed {
            self.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: TypedRef, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let me = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            me.add(key);
        });
    }

    /// Wait for the next key. `None` once the queue has been shut down.
    pub async fn next(&self) -> Option<TypedRef> {
        loop {
            let notified = self.notify.notified();
            {
                let mut st = self.lock();
                if st.shutdown {
                    return None;
                }
                if let Some(key) = st.order.pop_front() {
                    st.queued.remove(&key);
                    st.in_flight.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark `key` as finished; a dirty key goes straight back into the queue.
    pub fn done(&self, key: &TypedRef) {
        let pushed = {
            let mut st = self.lock();
            st.in_flight.remove(key);
            if st.dirty.remove(key) && !st.shutdown {
                debug!(key = %key, "re-queueing key changed while in flight");
                st.push(key.clone(), self.cap)
            } else {
                false
            }
        };
        if pushed {
            self.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }
}
