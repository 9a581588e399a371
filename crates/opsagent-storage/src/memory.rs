//! In-memory storage. Nothing survives the process.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use opsagent_types::{Execution, Page, Task};

use crate::{ExecutionStore, Result, ScheduleState, TaskStore, merge_definition, sort_newest_first};

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    /// task id → execution id → record
    executions: HashMap<String, HashMap<String, Execution>>,
}

/// Task and execution storage held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.inner.lock().await.tasks.get(id).cloned())
    }

    async fn put_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let merged = merge_definition(inner.tasks.get(&task.id), task);
        inner.tasks.insert(merged.id.clone(), merged);
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        Ok(self.inner.lock().await.tasks.remove(id).is_some())
    }

    async fn update_schedule_state(&self, id: &str, state: &ScheduleState) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.tasks.get_mut(id) {
            Some(task) => {
                task.last_executed_at = state.last_executed_at;
                task.next_execution_at = state.next_execution_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn put_execution(&self, execution: &Execution) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .executions
            .entry(execution.task_id.clone())
            .or_default()
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, task_id: &str, execution_id: &str) -> Result<Option<Execution>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .executions
            .get(task_id)
            .and_then(|by_id| by_id.get(execution_id))
            .cloned())
    }

    async fn list_executions(
        &self,
        task_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Execution>> {
        let inner = self.inner.lock().await;
        let mut all: Vec<Execution> = inner
            .executions
            .get(task_id)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default();
        sort_newest_first(&mut all);
        Ok(Page::from_sorted(all, limit, offset))
    }

    async fn list_unfinished(&self) -> Result<Vec<Execution>> {
        let inner = self.inner.lock().await;
        let mut unfinished: Vec<Execution> = inner
            .executions
            .values()
            .flat_map(|by_id| by_id.values())
            .filter(|e| !e.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(unfinished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{at, execution, task};

    #[tokio::test]
    async fn test_put_task_merges_scheduler_fields() {
        let store = MemoryStore::new();
        store.put_task(&task("task-1")).await.unwrap();
        store
            .update_schedule_state(
                "task-1",
                &ScheduleState {
                    last_executed_at: None,
                    next_execution_at: Some(at(2, 0)),
                },
            )
            .await
            .unwrap();

        let mut edited = task("task-1");
        edited.enabled = false;
        store.put_task(&edited).await.unwrap();

        let loaded = store.get_task("task-1").await.unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.next_execution_at, Some(at(2, 0)));
    }

    #[tokio::test]
    async fn test_schedule_write_does_not_resurrect() {
        let store = MemoryStore::new();
        store.put_task(&task("task-1")).await.unwrap();
        store.delete_task("task-1").await.unwrap();

        let written = store
            .update_schedule_state("task-1", &ScheduleState::default())
            .await
            .unwrap();
        assert!(!written);
        assert!(store.get_task("task-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_executions_and_unfinished() {
        let store = MemoryStore::new();
        for minute in 0..3 {
            let mut exec = execution("task-1", &format!("exec-{minute}"), minute);
            if minute < 2 {
                exec.fail(opsagent_types::FailureKind::AgentError, "boom", at(1, minute + 1));
            }
            store.put_execution(&exec).await.unwrap();
        }

        let page = store.list_executions("task-1", 10, 0).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items[0].id, "exec-2");
        assert!(store.list_executions("nope", 10, 0).await.unwrap().items.is_empty());

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, "exec-2");
    }
}
