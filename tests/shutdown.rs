//! Lifecycle: nothing submitted is ever left without an outcome.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use oxilog::device::MemoryStore;
use oxilog::pipeline::{LogQueueOptions, QueueElement, TransactionLogQueue};
use oxilog::transaction::StorageTransaction;
use oxilog::AppendError;

use common::{test_queue_config, FaultInjectionStore};

const WAIT: Duration = Duration::from_secs(5);

fn tx(id: u64) -> StorageTransaction {
    StorageTransaction::single(id, vec![id.to_le_bytes().to_vec()])
}

fn assert_resolved(handle: &QueueElement) {
    let outcome = handle
        .committed_append_index_timeout(WAIT)
        .expect("element was never notified");
    if let Err(err) = outcome {
        assert!(err.is_shutdown(), "unexpected error: {err}");
    }
}

#[test]
fn test_shutdown_right_after_three_submissions() {
    let store = FaultInjectionStore::new();
    let options = LogQueueOptions::default().with_queue(test_queue_config());
    let queue = Arc::new(TransactionLogQueue::open(Arc::new(store.clone()), &options).unwrap());
    queue.start().unwrap();
    // Slow writes keep later submissions queued while shutdown begins.
    store.faults().set_write_delay(Duration::from_millis(20));

    let submitted = Arc::new(Barrier::new(4));
    let producers: Vec<_> = (0..3u64)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let submitted = Arc::clone(&submitted);
            thread::spawn(move || {
                let handle = queue.submit(tx(p)).unwrap();
                submitted.wait();
                handle
                    .committed_append_index_timeout(WAIT)
                    .expect("element was never notified")
            })
        })
        .collect();

    submitted.wait();
    queue.shutdown();

    let mut committed = 0;
    for producer in producers {
        match producer.join().unwrap() {
            Ok(_) => committed += 1,
            Err(err) => assert!(err.is_shutdown(), "unexpected error: {err}"),
        }
    }
    let stats = queue.stats();
    assert_eq!(stats.elements, committed);
    assert_eq!(stats.elements + stats.failed_elements, 3);
}

#[test]
fn test_submitters_racing_shutdown_are_all_resolved() {
    let store = MemoryStore::new();
    let options = LogQueueOptions::default().with_queue(test_queue_config());
    let queue = Arc::new(TransactionLogQueue::open(Arc::new(store), &options).unwrap());
    queue.start().unwrap();
    let started = Arc::new(AtomicBool::new(false));

    let producers: Vec<_> = (0..8u64)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                let mut handles = Vec::new();
                for seq in 0.. {
                    match queue.submit(tx(p * 1_000_000 + seq)) {
                        Ok(handle) => {
                            handles.push(handle);
                            started.store(true, Ordering::Release);
                        }
                        Err(AppendError::Shutdown) => break,
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
                // Every producer waits on its own handles so that each batch
                // has its first waiter.
                for handle in &handles {
                    assert_resolved(handle);
                }
                handles.len() as u64
            })
        })
        .collect();

    while !started.load(Ordering::Acquire) {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(20));
    queue.shutdown();
    assert!(!queue.is_running());

    let total: u64 = producers.into_iter().map(|p| p.join().unwrap()).sum();
    let stats = queue.stats();
    assert_eq!(stats.elements + stats.failed_elements, total);
    assert_eq!(queue.queued(), 0);
}

#[test]
fn test_drop_shuts_down() {
    let store = FaultInjectionStore::new();
    let options = LogQueueOptions::default().with_queue(test_queue_config());
    let queue = TransactionLogQueue::open(Arc::new(store.clone()), &options).unwrap();
    queue.start().unwrap();
    store.faults().set_write_delay(Duration::from_millis(5));

    let handles: Vec<_> = (0..50).map(|i| queue.submit(tx(i)).unwrap()).collect();
    drop(queue);
    for handle in &handles {
        assert_resolved(handle);
    }
    assert!(handles.iter().all(|h| h.is_done()));
}

#[test]
fn test_shutdown_before_start() {
    let store = MemoryStore::new();
    let queue = TransactionLogQueue::open(Arc::new(store.clone()), &LogQueueOptions::default()).unwrap();
    queue.shutdown();
    assert!(queue.submit(tx(1)).unwrap_err().is_shutdown());
    assert!(matches!(queue.start(), Err(AppendError::InvalidState(_))));
}
