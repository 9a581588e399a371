//! SQLite-backed task and execution storage.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use opsagent_types::{Execution, ExecutionResult, ExecutionStatus, FailureKind, Page, Task};

use crate::{ExecutionStore, Result, ScheduleState, TaskStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        agent_id TEXT NOT NULL,
        project_id TEXT,
        cron_expression TEXT NOT NULL,
        prompt TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_executed_at INTEGER,
        next_execution_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS executions (
        id TEXT NOT NULL,
        task_id TEXT NOT NULL,
        start_time INTEGER NOT NULL,
        end_time INTEGER,
        status TEXT NOT NULL,
        result TEXT,
        error TEXT,
        error_kind TEXT,
        manual INTEGER NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (task_id, id)
    );

    CREATE INDEX IF NOT EXISTS idx_executions_task_start
        ON executions (task_id, start_time DESC);
    CREATE INDEX IF NOT EXISTS idx_executions_status
        ON executions (status);";

const TASK_COLUMNS: &str = "id, name, description, agent_id, project_id, cron_expression, prompt, \
     enabled, created_at, updated_at, last_executed_at, next_execution_at";

const EXECUTION_COLUMNS: &str =
    "id, task_id, start_time, end_time, status, result, error, error_kind, manual, attempts";

/// SQLite storage for tasks and executions.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

// ─── Row mapping ───────────────────────────────────

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn opt_from_millis(idx: usize, ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(|ms| from_millis(idx, ms)).transpose()
}

fn conversion_error(idx: usize, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        agent_id: row.get(3)?,
        project_id: row.get(4)?,
        cron_expression: row.get(5)?,
        prompt: row.get(6)?,
        enabled: row.get::<_, i64>(7)? != 0,
        created_at: from_millis(8, row.get(8)?)?,
        updated_at: from_millis(9, row.get(9)?)?,
        last_executed_at: opt_from_millis(10, row.get(10)?)?,
        next_execution_at: opt_from_millis(11, row.get(11)?)?,
    })
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<Execution> {
    let status = row
        .get::<_, String>(4)?
        .parse::<ExecutionStatus>()
        .map_err(|e| conversion_error(4, e))?;
    let result = row
        .get::<_, Option<String>>(5)?
        .map(|json| serde_json::from_str::<ExecutionResult>(&json))
        .transpose()
        .map_err(|e| conversion_error(5, e))?;
    let error_kind = row
        .get::<_, Option<String>>(7)?
        .map(|kind| kind.parse::<FailureKind>())
        .transpose()
        .map_err(|e| conversion_error(7, e))?;

    Ok(Execution {
        id: row.get(0)?,
        task_id: row.get(1)?,
        start_time: from_millis(2, row.get(2)?)?,
        end_time: opt_from_millis(3, row.get(3)?)?,
        status,
        result,
        error: row.get(6)?,
        error_kind,
        manual: row.get::<_, i64>(8)? != 0,
        attempts: row.get::<_, u32>(9)?,
    })
}

// ─── Tasks ───────────────────────────────────

#[async_trait]
impl TaskStore for SqliteStore {
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map([], row_to_task)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let task = conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    rusqlite::params![id],
                    row_to_task,
                )
                .optional()?;
            Ok(task)
        })
        .await?
    }

    async fn put_task(&self, task: &Task) -> Result<()> {
        let conn = self.conn.clone();
        let task = task.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        description = excluded.description,
                        agent_id = excluded.agent_id,
                        project_id = excluded.project_id,
                        cron_expression = excluded.cron_expression,
                        prompt = excluded.prompt,
                        enabled = excluded.enabled,
                        updated_at = excluded.updated_at"
                ),
                rusqlite::params![
                    task.id,
                    task.name,
                    task.description,
                    task.agent_id,
                    task.project_id,
                    task.cron_expression,
                    task.prompt,
                    task.enabled as i64,
                    to_millis(task.created_at),
                    to_millis(task.updated_at),
                    task.last_executed_at.map(to_millis),
                    task.next_execution_at.map(to_millis),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count = conn.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id])?;
            Ok(count > 0)
        })
        .await?
    }

    async fn update_schedule_state(&self, id: &str, state: &ScheduleState) -> Result<bool> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let state = *state;
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count = conn.execute(
                "UPDATE tasks SET last_executed_at = ?1, next_execution_at = ?2 WHERE id = ?3",
                rusqlite::params![
                    state.last_executed_at.map(to_millis),
                    state.next_execution_at.map(to_millis),
                    id,
                ],
            )?;
            Ok(count > 0)
        })
        .await?
    }
}

// ─── Executions ───────────────────────────────────

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn put_execution(&self, execution: &Execution) -> Result<()> {
        let conn = self.conn.clone();
        let execution = execution.clone();
        let result = execution
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO executions ({EXECUTION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                rusqlite::params![
                    execution.id,
                    execution.task_id,
                    to_millis(execution.start_time),
                    execution.end_time.map(to_millis),
                    execution.status.as_str(),
                    result,
                    execution.error,
                    execution.error_kind.map(|k| k.as_str()),
                    execution.manual as i64,
                    execution.attempts,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    async fn get_execution(&self, task_id: &str, execution_id: &str) -> Result<Option<Execution>> {
        let conn = self.conn.clone();
        let task_id = task_id.to_string();
        let execution_id = execution_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let execution = conn
                .query_row(
                    &format!(
                        "SELECT {EXECUTION_COLUMNS} FROM executions WHERE task_id = ?1 AND id = ?2"
                    ),
                    rusqlite::params![task_id, execution_id],
                    row_to_execution,
                )
                .optional()?;
            Ok(execution)
        })
        .await?
    }

    async fn list_executions(
        &self,
        task_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Execution>> {
        let conn = self.conn.clone();
        let task_id = task_id.to_string();
        let sql_limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql_offset = i64::try_from(offset).unwrap_or(i64::MAX);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM executions WHERE task_id = ?1",
                rusqlite::params![task_id],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions WHERE task_id = ?1
                 ORDER BY start_time DESC, id DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let items = stmt
                .query_map(
                    rusqlite::params![task_id, sql_limit, sql_offset],
                    row_to_execution,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Page {
                items,
                total: total as usize,
                limit,
                offset,
            })
        })
        .await?
    }

    async fn list_unfinished(&self) -> Result<Vec<Execution>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions
                 WHERE status IN ('pending', 'running') ORDER BY start_time ASC"
            ))?;
            let rows = stmt
                .query_map([], row_to_execution)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{at, execution, task};
    use opsagent_types::AgentMessage;

    #[tokio::test]
    async fn test_put_and_get_task() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_task(&task("task-1")).await.unwrap();

        let loaded = store.get_task("task-1").await.unwrap().unwrap();
        assert_eq!(loaded, task("task-1"));
        assert!(store.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_task_keeps_schedule_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_task(&task("task-1")).await.unwrap();
        let state = ScheduleState {
            last_executed_at: Some(at(1, 0)),
            next_execution_at: Some(at(2, 0)),
        };
        assert!(store.update_schedule_state("task-1", &state).await.unwrap());

        // An API-side edit carrying stale scheduler fields.
        let mut edited = task("task-1");
        edited.name = "renamed".into();
        edited.created_at = at(5, 0);
        edited.updated_at = at(3, 0);
        store.put_task(&edited).await.unwrap();

        let loaded = store.get_task("task-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "renamed");
        assert_eq!(loaded.created_at, at(0, 0));
        assert_eq!(loaded.updated_at, at(3, 0));
        assert_eq!(loaded.last_executed_at, Some(at(1, 0)));
        assert_eq!(loaded.next_execution_at, Some(at(2, 0)));
    }

    #[tokio::test]
    async fn test_update_schedule_state_missing_task() {
        let store = SqliteStore::open_in_memory().unwrap();
        let written = store
            .update_schedule_state("ghost", &ScheduleState::default())
            .await
            .unwrap();
        assert!(!written);
        assert!(store.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_task_keeps_executions() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_task(&task("task-1")).await.unwrap();
        store.put_execution(&execution("task-1", "exec-1", 0)).await.unwrap();

        assert!(store.delete_task("task-1").await.unwrap());
        assert!(!store.delete_task("task-1").await.unwrap());
        assert!(store.get_execution("task-1", "exec-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_execution_roundtrip_with_result() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut exec = execution("task-1", "exec-1", 0);
        exec.mark_running();
        exec.attempts = 1;
        exec.succeed(
            ExecutionResult::from_messages(vec![AgentMessage::assistant("disk at 41%")]),
            at(1, 2),
        );
        store.put_execution(&exec).await.unwrap();

        let loaded = store.get_execution("task-1", "exec-1").await.unwrap().unwrap();
        assert_eq!(loaded, exec);
        assert!(store.get_execution("task-2", "exec-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_executions_paginated_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        for minute in 0..5 {
            let exec = execution("task-1", &format!("exec-{minute}"), minute);
            store.put_execution(&exec).await.unwrap();
        }
        store.put_execution(&execution("task-2", "other", 9)).await.unwrap();

        let page = store.list_executions("task-1", 2, 1).await.unwrap();
        assert_eq!(page.total, 5);
        let ids: Vec<_> = page.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["exec-3", "exec-2"]);
    }

    #[tokio::test]
    async fn test_list_executions_offset_past_i64_range() {
        let store = SqliteStore::open_in_memory().unwrap();
        for minute in 0..3 {
            let exec = execution("task-1", &format!("exec-{minute}"), minute);
            store.put_execution(&exec).await.unwrap();
        }

        let page = store.list_executions("task-1", 10, usize::MAX).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
        assert_eq!(page.offset, usize::MAX);

        let all = store.list_executions("task-1", usize::MAX, 0).await.unwrap();
        assert_eq!(all.items.len(), 3);
    }

    #[tokio::test]
    async fn test_list_unfinished() {
        let store = SqliteStore::open_in_memory().unwrap();
        let pending = execution("task-1", "exec-1", 0);
        let mut running = execution("task-2", "exec-2", 1);
        running.mark_running();
        let mut done = execution("task-1", "exec-3", 2);
        done.fail(FailureKind::AgentError, "boom", at(1, 3));
        for exec in [&pending, &running, &done] {
            store.put_execution(exec).await.unwrap();
        }

        let unfinished = store.list_unfinished().await.unwrap();
        let ids: Vec<_> = unfinished.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["exec-1", "exec-2"]);
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opsagent.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_task(&task("task-1")).await.unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list_tasks().await.unwrap().len(), 1);
    }
}
