//! Directory-backed storage: one JSON document per record.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<task-id>.json
//! <root>/<task-id>/executions/<execution-id>.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use opsagent_types::{Execution, Page, Task};

use crate::{
    ExecutionStore, Result, ScheduleState, StorageError, TaskStore, merge_definition,
    sort_newest_first,
};

/// JSON-file storage rooted at a directory.
pub struct LocalStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles on task documents.
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        tracing::info!("Local storage opened: {}", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn task_path(&self, id: &str) -> Result<PathBuf> {
        check_id(id)?;
        Ok(self.root.join(format!("{id}.json")))
    }

    fn executions_dir(&self, task_id: &str) -> Result<PathBuf> {
        check_id(task_id)?;
        Ok(self.root.join(task_id).join("executions"))
    }

    fn execution_path(&self, task_id: &str, execution_id: &str) -> Result<PathBuf> {
        check_id(execution_id)?;
        Ok(self.executions_dir(task_id)?.join(format!("{execution_id}.json")))
    }
}

/// Ids become file names, so anything that could escape the root is refused.
fn check_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\'])
        || id.contains('\0');
    if bad {
        return Err(StorageError::InvalidId(id.to_string()));
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write through a temporary file so readers never see a partial document.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Every `*.json` document directly inside `dir`.
async fn read_all_json<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_json::<T>(&path).await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), "Skipping unreadable record: {e}");
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl TaskStore for LocalStore {
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = read_all_json(&self.root).await?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        read_json(&self.task_path(id)?).await
    }

    async fn put_task(&self, task: &Task) -> Result<()> {
        let path = self.task_path(&task.id)?;
        let _guard = self.write_lock.lock().await;
        let existing: Option<Task> = read_json(&path).await?;
        let merged = merge_definition(existing.as_ref(), task);
        write_json(&path, &merged).await
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        let path = self.task_path(id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_schedule_state(&self, id: &str, state: &ScheduleState) -> Result<bool> {
        let path = self.task_path(id)?;
        let _guard = self.write_lock.lock().await;
        let Some(mut task) = read_json::<Task>(&path).await? else {
            return Ok(false);
        };
        task.last_executed_at = state.last_executed_at;
        task.next_execution_at = state.next_execution_at;
        write_json(&path, &task).await?;
        Ok(true)
    }
}

#[async_trait]
impl ExecutionStore for LocalStore {
    async fn put_execution(&self, execution: &Execution) -> Result<()> {
        let path = self.execution_path(&execution.task_id, &execution.id)?;
        write_json(&path, execution).await
    }

    async fn get_execution(&self, task_id: &str, execution_id: &str) -> Result<Option<Execution>> {
        read_json(&self.execution_path(task_id, execution_id)?).await
    }

    async fn list_executions(
        &self,
        task_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Execution>> {
        let mut all: Vec<Execution> = read_all_json(&self.executions_dir(task_id)?).await?;
        sort_newest_first(&mut all);
        Ok(Page::from_sorted(all, limit, offset))
    }

    async fn list_unfinished(&self) -> Result<Vec<Execution>> {
        let mut unfinished = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir = entry.path().join("executions");
            let executions: Vec<Execution> = read_all_json(&dir).await?;
            unfinished.extend(executions.into_iter().filter(|e| !e.is_terminal()));
        }
        unfinished.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(unfinished)
    }
}
