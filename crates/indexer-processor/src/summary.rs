//! Aggregation of task results across cycles.

use serde::Serialize;

use indexer_types::{TaskResult, TaskStatus};

/// Totals over one or more processing cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub cycles: usize,
    pub claimed: usize,
    pub completed: usize,
    pub unchanged: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub rejected: usize,
    pub chunks_indexed: usize,
}

impl BatchSummary {
    /// Fold one cycle's results in.
    pub fn add_cycle(&mut self, results: &[TaskResult]) {
        self.cycles += 1;
        self.claimed += results.len();
        for result in results {
            self.chunks_indexed += result.chunks_indexed;
            match result.status {
                TaskStatus::Completed => self.completed += 1,
                TaskStatus::Unchanged => self.unchanged += 1,
                TaskStatus::RetryScheduled => self.retried += 1,
                TaskStatus::DeadLettered => self.dead_lettered += 1,
                TaskStatus::Rejected => self.rejected += 1,
            }
        }
    }

    /// Tasks that reached a terminal state.
    pub fn terminal(&self) -> usize {
        self.completed + self.unchanged + self.dead_lettered + self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_types::{IndexingTask, TaskOperation};

    #[test]
    fn test_add_cycle_counts_statuses() {
        let task = IndexingTask::new("page", "p1", "w1", TaskOperation::Insert);
        let results = vec![
            TaskResult::new(&task, TaskStatus::Completed).with_chunks(3),
            TaskResult::new(&task, TaskStatus::RetryScheduled),
            TaskResult::new(&task, TaskStatus::Rejected),
        ];
        let mut summary = BatchSummary::default();
        summary.add_cycle(&results);
        summary.add_cycle(&[]);

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.claimed, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.retried, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.chunks_indexed, 3);
        assert_eq!(summary.terminal(), 2);
    }
}
