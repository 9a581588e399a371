//! opsagent-storage: persistence for scheduled tasks and their executions.
//!
//! The scheduler only sees the [`TaskStore`] and [`ExecutionStore`] traits.
//! Three backends implement both:
//! - [`SqliteStore`]: a single SQLite database (default)
//! - [`LocalStore`]: one JSON document per task / execution under a directory
//! - [`MemoryStore`]: process memory, used for tests and as a fallback

pub mod local;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use opsagent_types::{Execution, Page, Task};

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid record id: {0:?}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Scheduler-owned fields of a task, written as a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleState {
    pub last_executed_at: Option<DateTime<Utc>>,
    pub next_execution_at: Option<DateTime<Utc>>,
}

/// Durable task definitions keyed by task id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<Task>>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// Insert or update a task definition.
    ///
    /// When the task already exists its `created_at`, `last_executed_at` and
    /// `next_execution_at` are kept: those belong to the original insert and
    /// to the scheduler respectively.
    async fn put_task(&self, task: &Task) -> Result<()>;

    /// Delete a task definition. Executions are left in place.
    async fn delete_task(&self, id: &str) -> Result<bool>;

    /// Overwrite the scheduler-owned fields of an existing task.
    ///
    /// Returns false, writing nothing, when the task does not exist.
    async fn update_schedule_state(&self, id: &str, state: &ScheduleState) -> Result<bool>;
}

/// Append-mostly execution history keyed by (task id, execution id).
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace an execution record.
    async fn put_execution(&self, execution: &Execution) -> Result<()>;

    async fn get_execution(&self, task_id: &str, execution_id: &str) -> Result<Option<Execution>>;

    /// Executions of one task, newest `start_time` first.
    async fn list_executions(
        &self,
        task_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Execution>>;

    /// Every execution still `pending` or `running`, across all tasks.
    async fn list_unfinished(&self) -> Result<Vec<Execution>>;
}

/// Both stores, as handed to the scheduler and the API layer.
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskStore>,
    pub executions: Arc<dyn ExecutionStore>,
}

impl Stores {
    /// Use one backend for both tasks and executions.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: TaskStore + ExecutionStore + 'static,
    {
        Self {
            tasks: store.clone(),
            executions: store,
        }
    }

    /// A fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::shared(Arc::new(MemoryStore::new()))
    }
}

/// Newest first, ties broken by id so listings are stable.
pub(crate) fn sort_newest_first(executions: &mut [Execution]) {
    executions.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Merge an incoming definition with the stored copy per [`TaskStore::put_task`].
pub(crate) fn merge_definition(existing: Option<&Task>, incoming: &Task) -> Task {
    let mut task = incoming.clone();
    if let Some(existing) = existing {
        task.created_at = existing.created_at;
        task.last_executed_at = existing.last_executed_at;
        task.next_execution_at = existing.next_execution_at;
    }
    task
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};
    use opsagent_types::{Execution, Task};

    pub fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, h, m, 0).unwrap()
    }

    pub fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            name: format!("{id} name"),
            description: "nightly check".into(),
            agent_id: "sre".into(),
            project_id: Some("infra".into()),
            cron_expression: "0 * * * *".into(),
            prompt: "Report disk usage".into(),
            enabled: true,
            created_at: at(0, 0),
            updated_at: at(0, 0),
            last_executed_at: None,
            next_execution_at: None,
        }
    }

    pub fn execution(task_id: &str, id: &str, minute: u32) -> Execution {
        Execution::pending(id, task_id, at(1, minute), false)
    }
}
