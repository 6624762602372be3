//! Tunables for writers, readers, and the shared client.
//!
//! Grouped the way `ClientBuilder` groups HTTP client settings: plain
//! structs with a `Default` impl and `with_*` builder methods, consumed
//! by value when a writer/streamer/client is constructed.

use std::time::Duration;

/// Batching and backpressure policy for a `TopicWriter`.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    /// Flush the pending batch once its size reaches this many bytes.
    pub max_batch_size_bytes: usize,
    /// Flush the pending batch once it holds this many messages.
    pub max_batch_size_records: usize,
    /// Capacity of the bounded work-queue between `push` and the
    /// background flusher.
    pub work_queue_capacity: usize,
    /// When the work-queue is full: block the caller (`true`, default)
    /// or fail fast with `TransportError::BufferOverflow` (`false`).
    pub block_on_overflow: bool,
    /// Per-batch transport timeout before the writer enters sticky-error
    /// state.
    pub batch_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch_size_bytes: 4 * 1024 * 1024,
            max_batch_size_records: 2048,
            work_queue_capacity: 16,
            block_on_overflow: true,
            batch_timeout: Duration::from_secs(30),
        }
    }
}

impl WriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_batch_size_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_size_bytes = bytes;
        self
    }

    pub fn max_batch_size_records(mut self, records: usize) -> Self {
        self.max_batch_size_records = records;
        self
    }

    pub fn work_queue_capacity(mut self, capacity: usize) -> Self {
        self.work_queue_capacity = capacity;
        self
    }

    pub fn block_on_overflow(mut self, block: bool) -> Self {
        self.block_on_overflow = block;
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }
}

/// Memory-bounded buffering policy for a `TopicDataStreamer`.
#[derive(Clone, Debug)]
pub struct ReaderConfig {
    /// Upper bound on resident decoded-message memory per topic, in
    /// bytes. Default: one record batch worth, capped at 8 MiB.
    pub buffer_budget_bytes: usize,
    /// Timeout for a single record-batch fetch.
    pub fetch_timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_budget_bytes: 8 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl ReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_budget_bytes(mut self, bytes: usize) -> Self {
        self.buffer_budget_bytes = bytes;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Policy chosen when a `SequenceWriter::close` observes a topic finalize
/// failure (spec §4.2, §7).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnErrorPolicy {
    /// Abort the sequence server-side; all data is purged.
    #[default]
    Delete,
    /// Keep whatever was durably flushed; sequence is left `Unlocked`.
    Report,
}
