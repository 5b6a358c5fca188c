//! Batch executor trait definition.

use crate::error::{StoreError, StoreResult};
use crate::operation::{Operation, StatementKey};

/// Something that can run a batch of same-shaped operations.
///
/// The execution queue is written against this trait so that it does not
/// know about SQL. [`crate::MirrorTransaction`] is the production
/// implementation; [`RecordingExecutor`] captures batches for tests.
///
/// # Invariants
///
/// - Every operation in `batch` has `statement_key() == key`
/// - Operations are applied in slice order
/// - A failed batch leaves the enclosing transaction to be rolled back by
///   its owner; executors do not retry
pub trait BatchExecutor {
    /// Executes every operation of `batch` as one batched call.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects any operation of the batch.
    fn execute_batch(&mut self, key: StatementKey, batch: &[Operation]) -> StoreResult<()>;
}

/// An executor that records batches instead of running them.
///
/// Useful for:
/// - Asserting flush order in unit tests
/// - Counting the writes a sync pass would perform
/// - Injecting a failure on a given statement shape
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    batches: Vec<(StatementKey, Vec<Operation>)>,
    fail_on: Option<StatementKey>,
}

impl RecordingExecutor {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every batch of `key` fail with a constraint violation.
    #[must_use]
    pub fn failing_on(key: StatementKey) -> Self {
        Self {
            batches: Vec::new(),
            fail_on: Some(key),
        }
    }

    /// Batches executed so far, in execution order.
    pub fn batches(&self) -> &[(StatementKey, Vec<Operation>)] {
        &self.batches
    }

    /// Statement keys of the executed batches, in execution order.
    pub fn keys(&self) -> Vec<StatementKey> {
        self.batches.iter().map(|(key, _)| *key).collect()
    }

    /// Every executed operation, flattened in execution order.
    pub fn operations(&self) -> Vec<Operation> {
        self.batches
            .iter()
            .flat_map(|(_, ops)| ops.iter().cloned())
            .collect()
    }

    /// Total number of executed operations.
    pub fn operation_count(&self) -> usize {
        self.batches.iter().map(|(_, ops)| ops.len()).sum()
    }
}

impl BatchExecutor for RecordingExecutor {
    fn execute_batch(&mut self, key: StatementKey, batch: &[Operation]) -> StoreResult<()> {
        if self.fail_on == Some(key) {
            return Err(StoreError::ConstraintViolation {
                statement: key,
                message: "injected failure".into(),
            });
        }
        self.batches.push((key, batch.to_vec()));
        Ok(())
    }
}
