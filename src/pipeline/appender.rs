//! The appender: the single thread that writes the log.
//!
//! It owns the writer, the rotation policy and the running checksum, drains
//! the queue in bounded batches and makes every drained batch durable with
//! one rotation or force before completing its elements.

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::append_index::{AppendIndex, AppendIndexAllocator};
use crate::device::SegmentStore;
use crate::error::{AppendError, Result};
use crate::health::PanicSignal;
use crate::log::{LogAppendEvent, LogRotation, LogTail, TransactionLogWriter};
use crate::metadata::MetadataCache;
use crate::pipeline::element::{ElementInner, NotifyMode, Sibling};
use crate::pipeline::idle::SpinParkIdleStrategy;
use crate::pipeline::queue::MpscAppendQueue;
use crate::pipeline::stats::AppendStats;
use crate::transaction::AppendedChunk;

pub(crate) type ElementQueue = MpscAppendQueue<Arc<ElementInner>>;

/// Collaborators shared between the appender and the queue facade.
pub(crate) struct AppenderShared {
    pub(crate) queue: Arc<ElementQueue>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) allocator: Arc<AppendIndexAllocator>,
    pub(crate) metadata: Arc<MetadataCache>,
    pub(crate) panic: Arc<PanicSignal>,
    pub(crate) stats: Arc<AppendStats>,
}

pub(crate) struct TransactionAppender<S: SegmentStore> {
    shared: AppenderShared,
    writer: TransactionLogWriter<S>,
    rotation: LogRotation,
    idle: SpinParkIdleStrategy,
    notify_mode: NotifyMode,
    max_batch: usize,
    checksum: u64,
    batch: Vec<Arc<ElementInner>>,
}

impl<S: SegmentStore> TransactionAppender<S> {
    pub(crate) fn new(
        shared: AppenderShared,
        writer: TransactionLogWriter<S>,
        rotation: LogRotation,
        idle: SpinParkIdleStrategy,
        notify_mode: NotifyMode,
        max_batch: usize,
    ) -> Self {
        let checksum = writer.log_file().tail().checksum;
        let max_batch = max_batch.max(1);
        Self {
            shared,
            writer,
            rotation,
            idle,
            notify_mode,
            max_batch,
            checksum,
            batch: Vec::with_capacity(max_batch),
        }
    }

    /// Run until the stop flag is set, then fail whatever is still queued.
    pub(crate) fn run(mut self) {
        tracing::debug!(max_batch = self.max_batch, "transaction appender started");
        let mut idle_counter = 0u64;
        while !self.shared.stop.load(Ordering::Acquire) {
            if self.shared.queue.drain(&mut self.batch, self.max_batch) == 0 {
                idle_counter = self.idle.idle(idle_counter);
                continue;
            }
            idle_counter = 0;
            self.process_batch();
        }

        let mut remaining = 0usize;
        while let Some(element) = self.shared.queue.poll() {
            element.fail(AppendError::Shutdown);
            remaining += 1;
        }
        if remaining > 0 {
            self.shared.stats.record_failed_elements(remaining);
            tracing::debug!(remaining, "failed queued transactions on shutdown");
        }
        self.close();
        tracing::debug!("transaction appender stopped");
    }

    /// Force the log unless a panic makes further writes unsafe.
    pub(crate) fn close(&mut self) {
        if self.shared.panic.has_panicked() {
            return;
        }
        if let Err(err) = self.writer.log_file_mut().close() {
            tracing::error!(error = %err, "failed to close transaction log");
        }
    }

    fn process_batch(&mut self) {
        let mut batch = mem::take(&mut self.batch);
        let mut event = LogAppendEvent::new(batch.len());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.write_batch(&batch, &mut event)));
        match outcome {
            Ok(Ok(indexes)) => {
                self.shared.stats.record_batch(&event);
                self.complete(&mut batch, indexes);
            }
            Ok(Err(err)) => self.fail_batch(&mut batch, err),
            Err(payload) => {
                let err = AppendError::WriterPanicked(panic_message(payload.as_ref()));
                self.shared.panic.panic(err.clone());
                self.fail_batch(&mut batch, err);
            }
        }

        batch.clear();
        self.batch = batch;
    }

    /// Write every chunk of the batch, then rotate or force once.
    ///
    /// Returns the last append index of each element, in batch order.
    fn write_batch(
        &mut self,
        batch: &[Arc<ElementInner>],
        event: &mut LogAppendEvent,
    ) -> Result<Vec<AppendIndex>> {
        self.shared.panic.assert_no_panic()?;

        let start_tail = self.writer.log_file().tail();
        let start_index = self.shared.allocator.last_append_index();
        self.writer.reset_appended_bytes_counter();

        let mut last_indexes = Vec::with_capacity(batch.len());
        if let Err(err) = self.write_elements(batch, event, &mut last_indexes) {
            // A failed rollback trips the panic signal; the batch still
            // reports the write error.
            let _ = self.rollback(batch, start_tail, start_index);
            return Err(err);
        }

        let durable = match self.rotation.rotate_if_needed(&mut self.writer, event) {
            Ok(true) => Ok(()),
            Ok(false) => self.writer.force(event),
            Err(err) => Err(err),
        };
        if let Err(err) = durable {
            self.forget_batch(batch);
            self.shared.panic.panic(err.clone());
            return Err(err);
        }
        Ok(last_indexes)
    }

    fn write_elements(
        &mut self,
        batch: &[Arc<ElementInner>],
        event: &mut LogAppendEvent,
        last_indexes: &mut Vec<AppendIndex>,
    ) -> Result<()> {
        for element in batch {
            let mut transaction = element.transaction();
            let mut previous: Option<AppendIndex> = None;
            for chunk in transaction.chunks_mut() {
                let append_index = self.shared.allocator.next_append_index();
                if let Some(previous) = previous {
                    chunk.set_previous_append_index(previous);
                }
                let previous_append_index = chunk.previous_append_index();
                let checksum = self.writer.append(
                    chunk,
                    append_index,
                    self.checksum,
                    previous_append_index,
                    event,
                )?;

                let position_before = self.writer.before_append_position();
                self.shared
                    .metadata
                    .cache_transaction_metadata(append_index, position_before);
                chunk.batch_appended(AppendedChunk {
                    append_index,
                    position_before,
                    position_after: self.writer.current_position(),
                    checksum,
                });
                self.checksum = checksum;
                previous = Some(append_index);
            }
            let last = previous
                .ok_or_else(|| AppendError::InvalidArgument("transaction has no chunks".into()))?;
            last_indexes.push(last);
        }
        Ok(())
    }

    /// Undo a partially written batch so the log, checksum and allocator
    /// continue from where the batch started.
    fn rollback(
        &mut self,
        batch: &[Arc<ElementInner>],
        tail: LogTail,
        last_index: AppendIndex,
    ) -> Result<()> {
        self.forget_batch(batch);
        if let Err(err) = self.writer.log_file_mut().rollback_to(tail) {
            tracing::error!(error = %err, position = %tail.position, "failed to roll back batch");
            self.shared.panic.panic(err.clone());
            return Err(err);
        }
        self.checksum = tail.checksum;
        self.shared.allocator.reset_to(last_index);
        Ok(())
    }

    fn forget_batch(&self, batch: &[Arc<ElementInner>]) {
        for element in batch {
            let mut transaction = element.transaction();
            for (i, chunk) in transaction.chunks_mut().iter_mut().enumerate() {
                let Some(appended) = chunk.appended() else {
                    continue;
                };
                self.shared.metadata.remove(appended.append_index);
                chunk.clear_appended();
                if i > 0 {
                    chunk.set_previous_append_index(AppendIndex::BASE);
                }
            }
        }
    }

    fn complete(&self, batch: &mut Vec<Arc<ElementInner>>, indexes: Vec<AppendIndex>) {
        match self.notify_mode {
            NotifyMode::Direct => {
                for (element, append_index) in batch.drain(..).zip(indexes) {
                    element.commit(append_index);
                }
            }
            NotifyMode::FirstWaiter => {
                let mut completed = batch.drain(..).zip(indexes);
                let Some((first, own)) = completed.next() else {
                    return;
                };
                let siblings: Vec<Sibling> = completed.collect();
                first.hand_off(own, siblings);
            }
        }
    }

    fn fail_batch(&self, batch: &mut Vec<Arc<ElementInner>>, err: AppendError) {
        match err {
            AppendError::Panicked(_) => {
                tracing::warn!(batch = batch.len(), error = %err, "refusing batch after database panic")
            }
            _ => tracing::error!(batch = batch.len(), error = %err, "failed to append batch"),
        }
        self.shared.stats.record_failure(batch.len());
        for element in batch.drain(..) {
            element.fail(err.clone());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryStore;
    use crate::log::{LogFile, LogFilesConfig, LogReader, NeverRotate};
    use crate::pipeline::element::QueueElement;
    use crate::transaction::{CommandChunk, StorageTransaction};

    fn appender(store: &MemoryStore, notify_mode: NotifyMode) -> TransactionAppender<MemoryStore> {
        let file = LogFile::open(Arc::new(store.clone()), LogFilesConfig::default()).unwrap();
        let shared = AppenderShared {
            queue: Arc::new(MpscAppendQueue::unbounded()),
            stop: Arc::new(AtomicBool::new(false)),
            allocator: Arc::new(AppendIndexAllocator::new(file.tail().last_append_index)),
            metadata: Arc::new(MetadataCache::new(16)),
            panic: Arc::new(PanicSignal::new()),
            stats: Arc::new(AppendStats::default()),
        };
        TransactionAppender::new(
            shared,
            TransactionLogWriter::new(file),
            LogRotation::new(NeverRotate),
            SpinParkIdleStrategy::default(),
            notify_mode,
            8,
        )
    }

    fn enqueue(appender: &TransactionAppender<MemoryStore>, tx: StorageTransaction) -> QueueElement {
        let inner = ElementInner::new(tx);
        appender.shared.queue.offer(Arc::clone(&inner)).ok().unwrap();
        QueueElement::new(inner)
    }

    fn drain_and_process(appender: &mut TransactionAppender<MemoryStore>) {
        let max = appender.max_batch;
        appender.shared.queue.drain(&mut appender.batch, max);
        appender.process_batch();
    }

    #[test]
    fn test_batch_links_chunks_and_caches_positions() {
        let store = MemoryStore::new();
        for mode in [NotifyMode::FirstWaiter, NotifyMode::Direct] {
            let mut appender = appender(&store, mode);
            let base = appender.shared.allocator.last_append_index().get();
            let a = enqueue(&appender, StorageTransaction::single(1, vec![b"a".to_vec()]));
            let b = enqueue(
                &appender,
                StorageTransaction::new()
                    .with_chunk(CommandChunk::new(2, vec![b"b1".to_vec()]).with_chunk_id(0))
                    .with_chunk(CommandChunk::new(2, vec![b"b2".to_vec()]).with_chunk_id(1)),
            );
            drain_and_process(&mut appender);

            assert_eq!(a.committed_append_index().unwrap().get(), base + 1);
            assert_eq!(b.committed_append_index().unwrap().get(), base + 3);
            b.with_transaction(|tx| {
                assert_eq!(tx.chunks()[1].previous_append_index().get(), base + 2);
                let first = tx.chunks()[0].appended().unwrap();
                assert_eq!(
                    appender.shared.metadata.get(first.append_index),
                    Some(first.position_before)
                );
            });

            let snapshot = appender.shared.stats.snapshot();
            assert_eq!(snapshot.batches, 1);
            assert_eq!(snapshot.chunks, 3);
            assert_eq!(snapshot.forces, 1);
            drop(appender);
        }

        let entries: Vec<_> = LogReader::new(Arc::new(store)).scan_all().unwrap().collect();
        assert_eq!(entries.len(), 6);
    }

    #[test]
    fn test_panicked_signal_refuses_batch() {
        let store = MemoryStore::new();
        let mut appender = appender(&store, NotifyMode::FirstWaiter);
        appender
            .shared
            .panic
            .panic(AppendError::InvalidState("test panic"));
        let before = store.segment_contents(0).unwrap();

        let element = enqueue(&appender, StorageTransaction::single(1, vec![b"x".to_vec()]));
        drain_and_process(&mut appender);

        let err = element.committed_append_index().unwrap_err();
        assert!(matches!(err, AppendError::Panicked(_)));
        assert_eq!(store.segment_contents(0).unwrap(), before);
        assert_eq!(appender.shared.allocator.last_append_index(), AppendIndex::BASE);
    }

    #[test]
    fn test_run_fails_queued_on_stop() {
        let store = MemoryStore::new();
        let appender = appender(&store, NotifyMode::FirstWaiter);
        appender.shared.stop.store(true, Ordering::Release);
        let element = enqueue(&appender, StorageTransaction::single(1, vec![b"x".to_vec()]));
        let stats = Arc::clone(&appender.shared.stats);
        appender.run();
        assert!(element.committed_append_index().unwrap_err().is_shutdown());
        assert_eq!(stats.snapshot().failed_elements, 1);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42u32), "unknown panic");
    }
}
