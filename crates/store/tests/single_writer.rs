#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use conflux_core::meta::TypedRef;
use conflux_store::WorkQueue;
use rustc_hash::FxHashSet;

fn key(n: usize) -> TypedRef {
    TypedRef::new("example.org/v1", "XBucket", format!("xb-{}", n))
}

// Many workers, many re-adds of a small key set: no key is ever reconciled by two workers at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_never_overlap_on_a_key() {
    let q = WorkQueue::with_capacity(64);
    let active: Arc<Mutex<FxHashSet<TypedRef>>> = Arc::new(Mutex::new(FxHashSet::default()));
    let overlaps = Arc::new(Mutex::new(0usize));
    let processed = Arc::new(Mutex::new(0usize));

    let mut workers = Vec::new();
    for _ in 0..4 {
        let q = Arc::clone(&q);
        let active = Arc::clone(&active);
        let overlaps = Arc::clone(&overlaps);
        let processed = Arc::clone(&processed);
        workers.push(tokio::spawn(async move {
            while let Some(k) = q.next().await {
                if !active.lock().unwrap().insert(k.clone()) {
                    *overlaps.lock().unwrap() += 1;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.lock().unwrap().remove(&k);
                *processed.lock().unwrap() += 1;
                q.done(&k);
            }
        }));
    }

    for round in 0..20 {
        for n in 0..5 {
            q.add(key(n));
        }
        if round % 5 == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    q.shutdown();
    for w in workers {
        w.await.unwrap();
    }
    assert_eq!(*overlaps.lock().unwrap(), 0);
    assert!(*processed.lock().unwrap() >= 5);
}
