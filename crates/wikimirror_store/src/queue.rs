//! Deferred execution queue.
//!
//! The queue accumulates operations per [`StatementKey`] and runs each
//! shape as one batched call. Statement keys are flushed in the order they
//! were first submitted, and a full flush is triggered as soon as *any*
//! key reaches the chunk size: statements submitted later may depend on
//! rows inserted by earlier ones (a property row needs its page row), so
//! flushing only the saturated key could run a dependent batch first.
//!
//! # Example
//!
//! ```rust
//! use wikimirror_store::{ExecutionQueue, Operation, RecordingExecutor};
//!
//! let mut executor = RecordingExecutor::new();
//! let mut queue = ExecutionQueue::new(&mut executor, 100).unwrap();
//! queue.submit(Operation::DeletePage { page_id: 1 }).unwrap();
//! let stats = queue.finish().unwrap();
//! assert_eq!(stats.executed, 1);
//! assert_eq!(executor.operation_count(), 1);
//! ```

use crate::error::{StoreError, StoreResult};
use crate::executor::BatchExecutor;
use crate::operation::{Operation, StatementKey};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Counters of one queue scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Operations passed to [`ExecutionQueue::submit`].
    pub submitted: u64,
    /// Operations handed to the executor.
    pub executed: u64,
    /// Batched calls made to the executor.
    pub batches: u64,
    /// Flush rounds over all pending keys.
    pub flushes: u64,
}

/// Batches operations per statement shape and flushes them in first-seen
/// key order.
///
/// The queue is bound to one executor (one open transaction) for its whole
/// lifetime and is not meant to be shared between threads.
///
/// Pending operations are flushed exactly once at scope exit: either by
/// [`ExecutionQueue::finish`], which reports errors, or by `Drop` when the
/// scope is left early, in which case errors are only logged because the
/// owning transaction is about to be rolled back.
pub struct ExecutionQueue<'e, E: BatchExecutor + ?Sized> {
    executor: &'e mut E,
    chunk_size: usize,
    /// Keys in first-seen order; never cleared, so later flush rounds keep
    /// the order established by the first one.
    ordered_keys: Vec<StatementKey>,
    pending: HashMap<StatementKey, Vec<Operation>>,
    stats: QueueStats,
    finished: bool,
    poisoned: bool,
}

impl<'e, E: BatchExecutor + ?Sized> ExecutionQueue<'e, E> {
    /// Creates a queue that flushes once any key holds `chunk_size`
    /// operations. A chunk size of 1 executes every operation immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidChunkSize`] if `chunk_size` is zero.
    pub fn new(executor: &'e mut E, chunk_size: usize) -> StoreResult<Self> {
        if chunk_size == 0 {
            return Err(StoreError::InvalidChunkSize);
        }
        Ok(Self {
            executor,
            chunk_size,
            ordered_keys: Vec::new(),
            pending: HashMap::new(),
            stats: QueueStats::default(),
            finished: false,
            poisoned: false,
        })
    }

    /// Configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Counters so far.
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Number of operations waiting to be flushed.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Queues one operation, flushing every pending key if its batch is now
    /// full.
    ///
    /// # Errors
    ///
    /// Returns the executor's error if a triggered flush fails.
    pub fn submit(&mut self, operation: Operation) -> StoreResult<()> {
        self.stats.submitted += 1;
        let key = operation.statement_key();

        if self.chunk_size == 1 {
            return self.execute(key, std::slice::from_ref(&operation));
        }

        if !self.ordered_keys.contains(&key) {
            self.ordered_keys.push(key);
        }
        let queue = self.pending.entry(key).or_default();
        queue.push(operation);

        if queue.len() >= self.chunk_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Queues every operation of `operations` in order.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failing flush.
    pub fn submit_all(&mut self, operations: impl IntoIterator<Item = Operation>) -> StoreResult<()> {
        operations.into_iter().try_for_each(|op| self.submit(op))
    }

    /// Executes every pending batch in first-seen key order.
    ///
    /// The key order is kept; only the pending operations are cleared.
    ///
    /// # Errors
    ///
    /// Returns the first executor error. Batches after the failing one stay
    /// pending.
    pub fn flush(&mut self) -> StoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.stats.flushes += 1;
        debug!(
            pending = self.pending_len(),
            keys = self.pending.len(),
            "flushing deferred statements"
        );

        for index in 0..self.ordered_keys.len() {
            let key = self.ordered_keys[index];
            if let Some(batch) = self.pending.remove(&key) {
                self.execute(key, &batch)?;
            }
        }
        Ok(())
    }

    /// Flushes the remainder and closes the scope.
    ///
    /// # Errors
    ///
    /// Returns the executor's error if the final flush fails.
    pub fn finish(mut self) -> StoreResult<QueueStats> {
        self.finished = true;
        self.flush()?;
        Ok(self.stats)
    }

    fn execute(&mut self, key: StatementKey, batch: &[Operation]) -> StoreResult<()> {
        debug_assert!(batch.iter().all(|op| op.statement_key() == key));
        match self.executor.execute_batch(key, batch) {
            Ok(()) => {
                self.stats.batches += 1;
                self.stats.executed += batch.len() as u64;
                Ok(())
            }
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }
}

impl<E: BatchExecutor + ?Sized> Drop for ExecutionQueue<'_, E> {
    fn drop(&mut self) {
        if self.finished || self.pending.is_empty() {
            return;
        }
        if self.poisoned {
            debug!(
                pending = self.pending_len(),
                "discarding deferred statements after a failed batch"
            );
            return;
        }
        if let Err(err) = self.flush() {
            warn!(error = %err, "failed to flush deferred statements on scope exit");
        }
    }
}
