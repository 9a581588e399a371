//! Task management operations shared by the REST surface and the CLI.
//!
//! The service owns the definition fields of a task (`name`, `prompt`,
//! `enabled`, timestamps). The scheduler owns `lastExecutedAt` and
//! `nextExecutionAt`.

use serde::Deserialize;
use tracing::info;

use opsagent_cron::{AgentError, ArmedTask, CronError, Scheduler, SchedulerError};
use opsagent_storage::{StorageError, Stores};
use opsagent_types::{Execution, Page, Task};

/// Largest page of executions a caller may ask for.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Page size when the caller gives none.
pub const DEFAULT_PAGE_LIMIT: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid cron expression {expression:?}: {source}")]
    InvalidCronExpression {
        expression: String,
        #[source]
        source: CronError,
    },

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task {0} is already running")]
    AlreadyRunning(String),

    #[error("scheduler is stopped")]
    Stopped,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("agent backend error: {0}")]
    AgentBackend(#[from] AgentError),
}

impl From<SchedulerError> for ServiceError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::InvalidCronExpression { expression, source } => {
                ServiceError::InvalidCronExpression { expression, source }
            }
            SchedulerError::NotFound(id) => ServiceError::NotFound(format!("task {id}")),
            SchedulerError::AlreadyRunning(id) => ServiceError::AlreadyRunning(id),
            SchedulerError::Stopped => ServiceError::Stopped,
            SchedulerError::Storage(e) => ServiceError::Storage(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

fn default_enabled() -> bool {
    true
}

/// Body of a create request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agent_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub cron_expression: String,
    pub prompt: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Body of an update request. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub agent_id: Option<String>,
    pub project_id: Option<String>,
    pub cron_expression: Option<String>,
    pub prompt: Option<String>,
    pub enabled: Option<bool>,
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

pub struct TaskService {
    stores: Stores,
    scheduler: Scheduler,
}

impl TaskService {
    pub fn new(stores: Stores, scheduler: Scheduler) -> Self {
        Self { stores, scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    async fn check_agent(&self, agent_id: &str) -> Result<()> {
        if !self.scheduler.runner().agents().resolve_agent(agent_id).await? {
            return Err(ServiceError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }

    async fn stored_task(&self, id: &str) -> Result<Task> {
        self.stores
            .tasks
            .get_task(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("task {id}")))
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.stores.tasks.list_tasks().await?)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.stored_task(id).await
    }

    pub async fn create_task(&self, draft: TaskDraft) -> Result<Task> {
        require_text("name", &draft.name)?;
        require_text("agentId", &draft.agent_id)?;
        require_text("prompt", &draft.prompt)?;
        Scheduler::validate_cron(&draft.cron_expression)?;
        self.check_agent(&draft.agent_id).await?;

        let now = self.scheduler.now();
        let task = Task {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            name: draft.name,
            description: draft.description,
            agent_id: draft.agent_id,
            project_id: draft.project_id,
            cron_expression: draft.cron_expression,
            prompt: draft.prompt,
            enabled: draft.enabled,
            created_at: now,
            updated_at: now,
            last_executed_at: None,
            next_execution_at: None,
        };

        self.stores.tasks.put_task(&task).await?;
        match self.scheduler.add_task(task.clone()).await {
            Ok(registered) => {
                info!(task_id = %registered.id, name = %registered.name, "Task created");
                Ok(registered)
            }
            Err(e) => {
                self.stores.tasks.delete_task(&task.id).await?;
                Err(e.into())
            }
        }
    }

    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let mut task = self.stored_task(id).await?;

        if let Some(expression) = patch.cron_expression {
            Scheduler::validate_cron(&expression)?;
            task.cron_expression = expression;
        }
        if let Some(agent_id) = patch.agent_id {
            require_text("agentId", &agent_id)?;
            if agent_id != task.agent_id {
                self.check_agent(&agent_id).await?;
            }
            task.agent_id = agent_id;
        }
        if let Some(name) = patch.name {
            require_text("name", &name)?;
            task.name = name;
        }
        if let Some(prompt) = patch.prompt {
            require_text("prompt", &prompt)?;
            task.prompt = prompt;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if patch.project_id.is_some() {
            task.project_id = patch.project_id;
        }
        if let Some(enabled) = patch.enabled {
            task.enabled = enabled;
        }
        task.updated_at = self.scheduler.now();

        self.stores.tasks.put_task(&task).await?;
        let updated = match self.scheduler.update_task(task.clone()).await {
            Err(SchedulerError::NotFound(_)) => self.scheduler.add_task(task).await?,
            other => other?,
        };
        info!(task_id = %id, "Task updated");
        Ok(updated)
    }

    /// Delete a task definition. Its execution history is kept.
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        self.stored_task(id).await?;
        self.scheduler.remove_task(id).await?;
        self.stores.tasks.delete_task(id).await?;
        info!(task_id = %id, "Task deleted");
        Ok(())
    }

    pub async fn enable_task(&self, id: &str) -> Result<Task> {
        self.set_enabled(id, true).await
    }

    pub async fn disable_task(&self, id: &str) -> Result<Task> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Task> {
        let mut task = self.stored_task(id).await?;
        if enabled {
            Scheduler::validate_cron(&task.cron_expression)?;
        }
        task.enabled = enabled;
        task.updated_at = self.scheduler.now();
        self.stores.tasks.put_task(&task).await?;

        let toggled = if enabled {
            self.scheduler.enable(id).await
        } else {
            self.scheduler.disable(id).await
        };
        match toggled {
            Err(SchedulerError::NotFound(_)) => Ok(self.scheduler.add_task(task).await?),
            other => Ok(other?),
        }
    }

    /// Run a task now. Returns the `pending` execution record.
    pub async fn trigger_task(&self, id: &str) -> Result<Execution> {
        Ok(self.scheduler.trigger(id).await?)
    }

    pub async fn list_executions(
        &self,
        task_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Execution>> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        Ok(self
            .stores
            .executions
            .list_executions(task_id, limit, offset)
            .await?)
    }

    pub async fn get_execution(&self, task_id: &str, execution_id: &str) -> Result<Execution> {
        self.stores
            .executions
            .get_execution(task_id, execution_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("execution {execution_id}")))
    }

    pub async fn jobs(&self) -> Vec<ArmedTask> {
        self.scheduler.armed_tasks().await
    }
}
