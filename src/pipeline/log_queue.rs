//! Lifecycle-managed facade over the append pipeline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};

use crossbeam::utils::Backoff;
use parking_lot::Mutex;

use crate::append_index::{AppendIndex, AppendIndexAllocator};
use crate::device::SegmentStore;
use crate::error::{AppendError, Result};
use crate::health::PanicSignal;
use crate::log::format::payload_size;
use crate::log::{LogFile, LogFilesConfig, LogRotation, RotationThreshold, TransactionLogWriter};
use crate::metadata::{MetadataCache, DEFAULT_METADATA_CACHE_CAPACITY};
use crate::pipeline::appender::{AppenderShared, ElementQueue, TransactionAppender};
use crate::pipeline::element::{ElementInner, NotifyMode, QueueElement};
use crate::pipeline::idle::{IdleConfig, SpinParkIdleStrategy};
use crate::pipeline::queue::MpscAppendQueue;
use crate::pipeline::stats::{AppendStats, AppendStatsSnapshot};
use crate::transaction::StorageTransaction;

/// Maximum number of elements the appender drains per batch.
pub const DEFAULT_CONSUMER_MAX_BATCH: usize = 1024;

const APPENDER_THREAD_NAME: &str = "oxilog-appender";

/// Configuration of the queue and its appender thread
#[derive(Debug, Clone)]
pub struct LogQueueConfig {
    /// Elements drained per batch
    pub consumer_max_batch: usize,
    /// Queue capacity; `None` for an unbounded queue
    pub queue_capacity: Option<usize>,
    /// How waiters of a completed batch are woken
    pub notify_mode: NotifyMode,
    /// Idle strategy of the appender
    pub idle: IdleConfig,
}

impl Default for LogQueueConfig {
    fn default() -> Self {
        Self {
            consumer_max_batch: DEFAULT_CONSUMER_MAX_BATCH,
            queue_capacity: None,
            notify_mode: NotifyMode::default(),
            idle: IdleConfig::default(),
        }
    }
}

impl LogQueueConfig {
    /// Set the maximum batch size
    pub fn with_consumer_max_batch(mut self, max_batch: usize) -> Self {
        self.consumer_max_batch = max_batch;
        self
    }

    /// Bound the queue to `capacity` elements
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the notification mode
    pub fn with_notify_mode(mut self, mode: NotifyMode) -> Self {
        self.notify_mode = mode;
        self
    }

    /// Set the idle strategy configuration
    pub fn with_idle(mut self, idle: IdleConfig) -> Self {
        self.idle = idle;
        self
    }
}

/// Everything needed to open a queue over a segment store.
#[derive(Debug, Clone)]
pub struct LogQueueOptions {
    /// Queue and appender settings
    pub queue: LogQueueConfig,
    /// Log file settings
    pub log: LogFilesConfig,
    /// Segment rotation thresholds
    pub rotation: RotationThreshold,
    /// Entries kept by the metadata cache
    pub metadata_cache_capacity: usize,
}

impl Default for LogQueueOptions {
    fn default() -> Self {
        Self {
            queue: LogQueueConfig::default(),
            log: LogFilesConfig::default(),
            rotation: RotationThreshold::default(),
            metadata_cache_capacity: DEFAULT_METADATA_CACHE_CAPACITY,
        }
    }
}

impl LogQueueOptions {
    /// Set the queue configuration
    pub fn with_queue(mut self, queue: LogQueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set the log file configuration
    pub fn with_log(mut self, log: LogFilesConfig) -> Self {
        self.log = log;
        self
    }

    /// Set the rotation thresholds
    pub fn with_rotation(mut self, rotation: RotationThreshold) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set the metadata cache capacity
    pub fn with_metadata_cache_capacity(mut self, capacity: usize) -> Self {
        self.metadata_cache_capacity = capacity;
        self
    }
}

/// Queue-backed transaction log appender.
///
/// Producers [`submit`](Self::submit) transactions from any thread; a single
/// appender thread writes them in drained batches. The queue rejects
/// submissions until [`start`](Self::start) and again once
/// [`shutdown`](Self::shutdown) begins. Dropping the queue shuts it down.
pub struct TransactionLogQueue<S: SegmentStore> {
    queue: Arc<ElementQueue>,
    stopped: AtomicBool,
    active_submitters: AtomicUsize,
    consumer_stop: Arc<AtomicBool>,
    appender: Mutex<Option<TransactionAppender<S>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    consumer_thread: OnceLock<Thread>,
    allocator: Arc<AppendIndexAllocator>,
    metadata: Arc<MetadataCache>,
    panic: Arc<PanicSignal>,
    stats: Arc<AppendStats>,
}

impl<S: SegmentStore> TransactionLogQueue<S> {
    /// Wire a queue around an opened writer.
    ///
    /// `allocator` must be seeded with the last append index of the writer's
    /// log tail.
    pub fn new(
        writer: TransactionLogWriter<S>,
        rotation: LogRotation,
        allocator: Arc<AppendIndexAllocator>,
        metadata: Arc<MetadataCache>,
        panic: Arc<PanicSignal>,
        config: LogQueueConfig,
    ) -> Self {
        let queue = Arc::new(match config.queue_capacity {
            Some(capacity) => MpscAppendQueue::bounded(capacity),
            None => MpscAppendQueue::unbounded(),
        });
        let consumer_stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(AppendStats::default());

        let shared = AppenderShared {
            queue: Arc::clone(&queue),
            stop: Arc::clone(&consumer_stop),
            allocator: Arc::clone(&allocator),
            metadata: Arc::clone(&metadata),
            panic: Arc::clone(&panic),
            stats: Arc::clone(&stats),
        };
        let appender = TransactionAppender::new(
            shared,
            writer,
            rotation,
            SpinParkIdleStrategy::new(config.idle),
            config.notify_mode,
            config.consumer_max_batch,
        );

        Self {
            queue,
            stopped: AtomicBool::new(true),
            active_submitters: AtomicUsize::new(0),
            consumer_stop,
            appender: Mutex::new(Some(appender)),
            worker: Mutex::new(None),
            consumer_thread: OnceLock::new(),
            allocator,
            metadata,
            panic,
            stats,
        }
    }

    /// Open (or create) the log in `store` and build a queue over it.
    ///
    /// The allocator and the running checksum continue from the recovered
    /// log tail. The queue still has to be started.
    pub fn open(store: Arc<S>, options: &LogQueueOptions) -> Result<Self> {
        let log_file = LogFile::open(store, options.log.clone())?;
        let tail = log_file.tail();
        let allocator = Arc::new(AppendIndexAllocator::new(tail.last_append_index));
        let metadata = Arc::new(MetadataCache::new(options.metadata_cache_capacity));

        Ok(Self::new(
            TransactionLogWriter::new(log_file),
            LogRotation::new(options.rotation),
            allocator,
            metadata,
            Arc::new(PanicSignal::new()),
            options.queue.clone(),
        ))
    }

    /// Start the appender thread.
    ///
    /// A queue can be started once; later calls fail with
    /// [`AppendError::InvalidState`].
    pub fn start(&self) -> Result<()> {
        let appender = self
            .appender
            .lock()
            .take()
            .ok_or(AppendError::InvalidState("transaction log queue already started"))?;

        let handle = thread::Builder::new()
            .name(APPENDER_THREAD_NAME.to_string())
            .spawn(move || appender.run())?;
        let _ = self.consumer_thread.set(handle.thread().clone());
        *self.worker.lock() = Some(handle);
        self.stopped.store(false, Ordering::SeqCst);
        tracing::debug!("transaction log queue started");
        Ok(())
    }

    /// Enqueue `transaction` and return the handle to wait on.
    ///
    /// Fails with [`AppendError::Shutdown`] when the queue is not running.
    /// With a bounded queue this spins while the queue is full.
    pub fn submit(&self, transaction: StorageTransaction) -> Result<QueueElement> {
        validate_transaction(&transaction, MAX_ENTRY_PAYLOAD)?;
        self.active_submitters.fetch_add(1, Ordering::SeqCst);
        let result = self.offer(transaction);
        self.active_submitters.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn offer(&self, transaction: StorageTransaction) -> Result<QueueElement> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AppendError::Shutdown);
        }

        let inner = ElementInner::new(transaction);
        let mut item = Arc::clone(&inner);
        let backoff = Backoff::new();
        while let Err(rejected) = self.queue.offer(item) {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(AppendError::Shutdown);
            }
            item = rejected;
            self.wake_consumer();
            backoff.snooze();
        }
        self.wake_consumer();
        Ok(QueueElement::new(inner))
    }

    /// Submit `transaction` and wait until it is durable.
    pub fn append(&self, transaction: StorageTransaction) -> Result<AppendIndex> {
        self.submit(transaction)?.committed_append_index()
    }

    /// Stop accepting submissions, stop the appender and fail anything left
    /// in the queue with [`AppendError::Shutdown`].
    ///
    /// Batches already drained are completed first. Calling this more than
    /// once is harmless.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let backoff = Backoff::new();
        while self.active_submitters.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }

        self.consumer_stop.store(true, Ordering::Release);
        // Held across the join so a concurrent caller returns only once the
        // appender has stopped.
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            self.wake_consumer();
            if handle.join().is_err() {
                tracing::error!("transaction appender thread panicked");
            }
            tracing::debug!("transaction log queue stopped");
        }

        // Never started: nobody drained the queue.
        if let Some(mut appender) = self.appender.lock().take() {
            appender.close();
        }
        let mut remaining = 0usize;
        while let Some(element) = self.queue.poll() {
            element.fail(AppendError::Shutdown);
            remaining += 1;
        }
        if remaining > 0 {
            self.stats.record_failed_elements(remaining);
        }
        drop(worker);
    }

    fn wake_consumer(&self) {
        if let Some(thread) = self.consumer_thread.get() {
            thread.unpark();
        }
    }

    /// Check if the queue accepts submissions
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Number of queued, not yet drained elements
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Metadata cache filled by the appender
    pub fn metadata_cache(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    /// Panic signal consulted before every batch
    pub fn panic_signal(&self) -> &Arc<PanicSignal> {
        &self.panic
    }

    /// Last append index issued by the allocator
    pub fn last_append_index(&self) -> AppendIndex {
        self.allocator.last_append_index()
    }

    /// Pipeline counters
    pub fn stats(&self) -> AppendStatsSnapshot {
        self.stats.snapshot()
    }
}

impl<S: SegmentStore> Drop for TransactionLogQueue<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Largest payload a single log entry can carry.
const MAX_ENTRY_PAYLOAD: usize = u32::MAX as usize;

fn validate_transaction(transaction: &StorageTransaction, max_payload: usize) -> Result<()> {
    if transaction.is_empty() {
        return Err(AppendError::InvalidArgument(
            "transaction has no chunks".to_string(),
        ));
    }
    for chunk in transaction.chunks() {
        let size = payload_size(chunk.commands());
        if size > max_payload {
            return Err(AppendError::InvalidArgument(format!(
                "chunk payload of {size} bytes exceeds the entry size limit"
            )));
        }
    }
    Ok(())
}
