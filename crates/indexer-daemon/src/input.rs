//! Task file format for `indexer-daemon run`.
//!
//! ```json
//! {
//!   "content": [{ "entity_type": "page", "entity_id": "p1", "content": "..." }],
//!   "tasks": [{ "entity_type": "page", "entity_id": "p1", "operation": "insert" }]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use indexer_processor::{InMemoryContentStore, InMemoryTaskStore};
use indexer_types::{IndexingTask, TaskOperation};

/// One task to enqueue.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub entity_type: String,
    pub entity_id: String,
    pub operation: TaskOperation,
    #[serde(default = "default_workspace_id")]
    pub workspace_id: String,
    #[serde(default)]
    pub priority: i32,
}

/// Current content of one entity.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentSpec {
    pub entity_type: String,
    pub entity_id: String,
    pub content: String,
}

fn default_workspace_id() -> String {
    "default".to_string()
}

/// Parsed task file.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskFile {
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub content: Vec<ContentSpec>,
}

impl TaskFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse task file {}", path.display()))
    }

    /// Seed in-memory collaborators from the file.
    pub fn into_stores(self) -> (Arc<InMemoryTaskStore>, Arc<InMemoryContentStore>) {
        let content = Arc::new(InMemoryContentStore::new());
        for entry in self.content {
            content.put(&entry.entity_type, &entry.entity_id, entry.content);
        }
        let tasks: Vec<IndexingTask> = self
            .tasks
            .into_iter()
            .map(|spec| {
                IndexingTask::new(
                    spec.entity_type,
                    spec.entity_id,
                    spec.workspace_id,
                    spec.operation,
                )
                .with_priority(spec.priority)
            })
            .collect();
        (Arc::new(InMemoryTaskStore::with_tasks(tasks)), content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_processor::{ContentStore, TaskStore};

    #[tokio::test]
    async fn test_load_and_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"{
                "content": [{"entity_type": "page", "entity_id": "p1", "content": "hello"}],
                "tasks": [
                    {"entity_type": "page", "entity_id": "p1", "operation": "insert"},
                    {"entity_type": "page", "entity_id": "p2", "operation": "delete", "priority": 5}
                ]
            }"#,
        )
        .unwrap();

        let file = TaskFile::load(&path).unwrap();
        assert_eq!(file.tasks.len(), 2);
        assert_eq!(file.tasks[0].workspace_id, "default");

        let (tasks, content) = file.into_stores();
        assert_eq!(tasks.pending_count().await.unwrap(), 2);
        assert_eq!(
            content.fetch_content("page", "p1").await.unwrap().as_deref(),
            Some("hello")
        );

        let claimed = tasks.claim_batch(1, "w").await.unwrap();
        assert_eq!(claimed[0].entity_id, "p2");
    }

    #[test]
    fn test_bad_operation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"{"tasks": [{"entity_type": "page", "entity_id": "p1", "operation": "upsert"}]}"#,
        )
        .unwrap();
        assert!(TaskFile::load(&path).is_err());
    }
}
