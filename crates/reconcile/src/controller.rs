//! Worker pool draining a work queue into a reconciler.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use conflux_core::meta::TypedRef;
use conflux_store::WorkQueue;
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconcilerConfig;
use crate::Reconciler;

const BASE_BACKOFF: Duration = Duration::from_secs(1);

pub struct Controller<R> {
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
    config: ReconcilerConfig,
    failures: Mutex<FxHashMap<TypedRef, u32>>,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: Arc<R>, queue: Arc<WorkQueue>, config: ReconcilerConfig) -> Arc<Self> {
        Arc::new(Self { reconciler, queue, config, failures: Mutex::new(FxHashMap::default()) })
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run `config.workers` workers until `cancel` fires, then shut the queue down and
    /// wait for in-flight passes to finish.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let name = self.reconciler.name();
        info!(controller = name, workers = self.config.workers, "controller starting");
        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers.max(1) {
            let me = Arc::clone(&self);
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move { me.worker(id, cancel).await }));
        }
        cancel.cancelled().await;
        self.queue.shutdown();
        for w in workers {
            if let Err(e) = w.await {
                warn!(controller = name, error = %e, "worker task failed");
            }
        }
        info!(controller = name, "controller stopped");
    }

    async fn worker(&self, id: usize, cancel: CancellationToken) {
        loop {
            let key = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.queue.next() => match next {
                    Some(key) => key,
                    None => break,
                },
            };
            debug!(worker = id, key = %key, "reconciling");
            self.process(key).await;
        }
    }

    /// One reconcile pass for `key`, bounded by the configured timeout. Failures,
    /// timeouts and panics requeue with per-key exponential backoff.
    pub async fn process(&self, key: TypedRef) {
        let name = self.reconciler.name();
        let t0 = Instant::now();
        counter!("reconcile_total", 1u64, "controller" => name);
        // Run the pass as its own task so a panic cannot take the worker down with it.
        let reconciler = Arc::clone(&self.reconciler);
        let k = key.clone();
        let mut pass = tokio::spawn(async move { reconciler.reconcile(&k).await });
        let res = tokio::time::timeout(self.config.reconcile_timeout, &mut pass).await;
        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "controller" => name);

        let next = match res {
            Ok(Ok(Ok(action))) => {
                self.reset_backoff(&key);
                action.requeue_after()
            }
            Ok(Ok(Err(e))) => {
                counter!("reconcile_errors_total", 1u64, "controller" => name);
                let delay = self.next_backoff(&key);
                warn!(controller = name, key = %key, error = %format!("{:#}", e), retry_in_ms = delay.as_millis() as u64, "reconcile failed");
                Some(delay)
            }
            Ok(Err(join)) => {
                counter!("reconcile_errors_total", 1u64, "controller" => name);
                let delay = self.next_backoff(&key);
                error!(controller = name, key = %key, error = %join, retry_in_ms = delay.as_millis() as u64, "reconcile panicked");
                Some(delay)
            }
            Err(_) => {
                pass.abort();
                counter!("reconcile_errors_total", 1u64, "controller" => name);
                let delay = self.next_backoff(&key);
                warn!(controller = name, key = %key, timeout_secs = self.config.reconcile_timeout.as_secs(), "reconcile timed out");
                Some(delay)
            }
        };
        self.queue.done(&key);
        if let Some(delay) = next {
            self.queue.add_after(key, delay);
        }
    }

    /// 1s, 2s, 4s, ... capped at `max_backoff`.
    pub fn next_backoff(&self, key: &TypedRef) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let n = failures.entry(key.clone()).or_insert(0);
        let delay = BASE_BACKOFF.checked_mul(1u32 << (*n).min(20)).unwrap_or(self.config.max_backoff);
        *n = n.saturating_add(1);
        delay.min(self.config.max_backoff)
    }

    fn reset_backoff(&self, key: &TypedRef) {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }
}
