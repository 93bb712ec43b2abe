//! Ordering and delivery properties of the append pipeline under concurrency.

mod common;

use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use oxilog::device::{DirectoryStore, MemoryStore};
use oxilog::log::{LogReader, SegmentHeader};
use oxilog::pipeline::{LogQueueOptions, NotifyMode, TransactionLogQueue};
use oxilog::transaction::{CommandChunk, StorageTransaction};
use oxilog::AppendIndex;

use common::test_queue_config;

const ENTRY_HEADER_SIZE: usize = 64;

fn open_memory(store: &MemoryStore, mode: NotifyMode) -> TransactionLogQueue<MemoryStore> {
    let options = LogQueueOptions::default().with_queue(test_queue_config().with_notify_mode(mode));
    let queue = TransactionLogQueue::open(Arc::new(store.clone()), &options).unwrap();
    queue.start().unwrap();
    queue
}

fn command(producer: u64, seq: u64) -> Vec<u8> {
    let mut bytes = producer.to_le_bytes().to_vec();
    bytes.extend_from_slice(&seq.to_le_bytes());
    bytes
}

#[test]
fn test_indexes_are_gap_free_unique_and_fifo_per_producer() {
    const PRODUCERS: u64 = 8;
    const PER_PRODUCER: u64 = 200;

    for mode in [NotifyMode::FirstWaiter, NotifyMode::Direct] {
        let store = MemoryStore::new();
        let queue = Arc::new(open_memory(&store, mode));
        let barrier = Arc::new(Barrier::new(PRODUCERS as usize));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut indexes = Vec::with_capacity(PER_PRODUCER as usize);
                    for seq in 0..PER_PRODUCER {
                        let tx = StorageTransaction::single(p, vec![command(p, seq)]);
                        indexes.push(queue.append(tx).unwrap());
                    }
                    indexes
                })
            })
            .collect();

        let mut all = Vec::new();
        for producer in producers {
            let indexes = producer.join().unwrap();
            assert!(
                indexes.windows(2).all(|w| w[0] < w[1]),
                "a producer observed out-of-order indexes"
            );
            all.extend(indexes);
        }

        let total = PRODUCERS * PER_PRODUCER;
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len() as u64, total);
        all.sort_unstable();
        let expected: Vec<_> = (1..=total).map(AppendIndex::new).collect();
        assert_eq!(all, expected);
        assert!(!unique.contains(&AppendIndex::BASE));
        assert_eq!(queue.last_append_index(), AppendIndex::new(total));

        let stats = queue.stats();
        assert_eq!(stats.elements, total);
        assert_eq!(stats.failed_elements, 0);
        assert!(stats.batches <= total);
    }
}

#[test]
fn test_submit_many_then_wait() {
    let store = MemoryStore::new();
    let queue = open_memory(&store, NotifyMode::FirstWaiter);

    let handles: Vec<_> = (0..500u64)
        .map(|i| {
            queue
                .submit(StorageTransaction::single(i, vec![command(0, i)]))
                .unwrap()
        })
        .collect();

    // Siblings are woken by the waiter of their batch's first element,
    // which was submitted earlier.
    let indexes: Vec<_> = handles
        .iter()
        .map(|h| h.committed_append_index().unwrap().get())
        .collect();
    assert_eq!(indexes, (1..=500).collect::<Vec<_>>());
    assert!(handles.iter().all(|h| h.is_done()));
}

#[test]
fn test_dropped_handles_do_not_strand_siblings() {
    let store = MemoryStore::new();
    let queue = Arc::new(open_memory(&store, NotifyMode::FirstWaiter));

    let producers: Vec<_> = (0..6u64)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut committed = 0;
                for seq in 0..100 {
                    let handle = queue
                        .submit(StorageTransaction::single(p, vec![command(p, seq)]))
                        .unwrap();
                    if p % 2 == 0 {
                        drop(handle);
                    } else {
                        handle.committed_append_index().unwrap();
                        committed += 1;
                    }
                }
                committed
            })
        })
        .collect();

    let committed: u32 = producers.into_iter().map(|p| p.join().unwrap()).sum();
    assert_eq!(committed, 300);
}

#[test]
fn test_metadata_cache_points_at_written_entries() {
    let store = MemoryStore::new();
    let queue = Arc::new(open_memory(&store, NotifyMode::FirstWaiter));

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                (0..50u64)
                    .map(|seq| {
                        let commands = vec![command(p, seq), vec![p as u8; seq as usize]];
                        let index = queue
                            .append(StorageTransaction::single(p, commands.clone()))
                            .unwrap();
                        (index, commands)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let reader = LogReader::new(Arc::new(store.clone()));
    for producer in producers {
        for (index, commands) in producer.join().unwrap() {
            let position = queue.metadata_cache().get(index).unwrap();
            let entry = reader.read_entry(position).unwrap();
            assert_eq!(entry.append_index, index);
            assert_eq!(entry.commands, commands);
        }
    }
}

#[test]
fn test_multi_chunk_transactions_are_linked() {
    let store = MemoryStore::new();
    let queue = open_memory(&store, NotifyMode::Direct);

    let earlier = queue
        .append(StorageTransaction::single(1, vec![b"head".to_vec()]))
        .unwrap();
    let tx = StorageTransaction::new()
        .with_chunk(
            CommandChunk::new(2, vec![b"part-0".to_vec()])
                .with_chunk_id(0)
                .with_previous_append_index(earlier),
        )
        .with_chunk(CommandChunk::new(2, vec![b"part-1".to_vec()]).with_chunk_id(1))
        .with_chunk(CommandChunk::new(2, vec![b"part-2".to_vec()]).with_chunk_id(2));
    let handle = queue.submit(tx).unwrap();
    let last = handle.committed_append_index().unwrap();

    let appended: Vec<_> = handle.with_transaction(|tx| {
        assert_eq!(tx.last_append_index(), Some(last));
        tx.chunks()
            .iter()
            .map(|c| (c.previous_append_index(), c.appended().unwrap()))
            .collect()
    });
    assert_eq!(appended[0].0, earlier);
    assert_eq!(appended[1].0, appended[0].1.append_index);
    assert_eq!(appended[2].0, appended[1].1.append_index);
    assert_eq!(appended[0].1.position_after, appended[1].1.position_before);

    let reader = LogReader::new(Arc::new(store.clone()));
    let entries: Vec<_> = reader.scan_all().unwrap().collect();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[3].chunk_id, Some(2));
    assert_eq!(entries[3].previous_append_index, entries[2].append_index);
}

#[test]
fn test_three_payloads_land_on_disk_in_index_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DirectoryStore::new(dir.path()).unwrap());
    let options = LogQueueOptions::default().with_queue(test_queue_config());
    let queue = Arc::new(TransactionLogQueue::open(Arc::clone(&store), &options).unwrap());
    queue.start().unwrap();

    let barrier = Arc::new(Barrier::new(3));
    let producers: Vec<_> = [10usize, 20, 30]
        .into_iter()
        .enumerate()
        .map(|(i, size)| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let payload = vec![b'a' + i as u8; size];
                barrier.wait();
                let index = queue
                    .append(StorageTransaction::single(i as u64, vec![payload.clone()]))
                    .unwrap();
                (index, payload)
            })
        })
        .collect();

    let mut results: Vec<_> = producers.into_iter().map(|p| p.join().unwrap()).collect();
    results.sort_by_key(|(index, _)| *index);
    let indexes: Vec<_> = results.iter().map(|(index, _)| index.get()).collect();
    assert_eq!(indexes, vec![1, 2, 3]);
    queue.shutdown();

    let bytes = fs::read(store.segment_path(0)).unwrap();
    let mut offset = SegmentHeader::SIZE;
    let mut payloads = Vec::new();
    for (_, payload) in &results {
        let start = offset + ENTRY_HEADER_SIZE + 4;
        payloads.extend_from_slice(&bytes[start..start + payload.len()]);
        offset = start + payload.len();
    }
    assert_eq!(offset, bytes.len());

    let expected: Vec<u8> = results.iter().flat_map(|(_, p)| p.iter().copied()).collect();
    assert_eq!(payloads, expected);
}
