//! Dead-letter queue.
//!
//! Holds tasks that exhausted their retries, hit an open breaker, or failed
//! with a non-retryable class. Entries stay until an operator drains the
//! queue; nothing here resubmits work on its own.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use indexer_types::{ErrorRecord, IndexingTask};

use crate::error::ResilienceError;

/// Why a task was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Retry budget for the class is spent
    RetriesExhausted,
    /// The class's circuit breaker is open
    CircuitOpen,
    /// The class is never retried
    NonRetryable,
}

/// A dead-lettered task with the failure that put it there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: IndexingTask,
    pub record: ErrorRecord,
    pub reason: DeadLetterReason,
}

/// Durable home for dead-letter entries.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persist or overwrite the entry for a task.
    async fn persist(&self, entry: &DeadLetterEntry) -> Result<(), ResilienceError>;

    /// Remove the entry for a task after it was resubmitted.
    async fn remove(&self, task_id: &str) -> Result<(), ResilienceError>;
}

/// Bounded in-memory dead-letter queue, oldest evicted first.
pub struct DeadLetterQueue {
    capacity: usize,
    entries: Mutex<VecDeque<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    /// Create a queue holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an entry, replacing any earlier entry for the same task.
    /// Returns the entry evicted to stay within capacity.
    pub fn push(&self, entry: DeadLetterEntry) -> Option<DeadLetterEntry> {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.task.id != entry.task.id);
        entries.push_back(entry);
        if entries.len() > self.capacity {
            entries.pop_front()
        } else {
            None
        }
    }

    /// Remove and return every entry in insertion order.
    pub fn drain(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().drain(..).collect()
    }

    /// Copy of the current entries.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Whether a task is queued.
    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.lock().iter().any(|e| e.task.id == task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
