//! One run of a task: resolve the agent, call it under a timeout, record the
//! outcome.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use opsagent_storage::{ExecutionStore, StorageError};
use opsagent_types::{Execution, FailureKind, Task};

use crate::agent::AgentRuntime;
use crate::clock::{Clock, SystemClock};
use crate::retry::{NoRetry, RetryPolicy};

/// Ten minutes.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(600);

/// Performs task runs and writes their execution records.
///
/// The runner knows nothing about single-flight; the scheduler admits a run
/// before handing it here.
pub struct TaskRunner {
    pub(crate) executions: Arc<dyn ExecutionStore>,
    agents: Arc<dyn AgentRuntime>,
    pub(crate) clock: Arc<dyn Clock>,
    retry: Arc<dyn RetryPolicy>,
    timeout: Duration,
}

impl TaskRunner {
    pub fn new(executions: Arc<dyn ExecutionStore>, agents: Arc<dyn AgentRuntime>) -> Self {
        Self {
            executions,
            agents,
            clock: Arc::new(SystemClock),
            retry: Arc::new(NoRetry),
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn agents(&self) -> &Arc<dyn AgentRuntime> {
        &self.agents
    }

    /// Create and persist the `pending` record for an admitted run.
    pub async fn prepare(&self, task: &Task, manual: bool) -> Result<Execution, StorageError> {
        let execution = Execution::pending(
            new_execution_id(),
            &task.id,
            self.clock.now(),
            manual,
        );
        self.executions.put_execution(&execution).await?;
        Ok(execution)
    }

    /// Drive a prepared record to a terminal state.
    ///
    /// Never fails: agent problems become a `failed` record and storage
    /// problems are logged.
    pub async fn execute(&self, task: &Task, mut execution: Execution) -> Execution {
        match self.agents.resolve_agent(&task.agent_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(task_id = %task.id, agent_id = %task.agent_id, "Agent not found");
                execution.fail(
                    FailureKind::AgentNotFound,
                    format!("agent {} not found", task.agent_id),
                    self.clock.now(),
                );
                self.persist(&execution).await;
                return execution;
            }
            Err(e) => {
                warn!(task_id = %task.id, agent_id = %task.agent_id, "Agent lookup failed: {e}");
                execution.fail(FailureKind::AgentError, e.to_string(), self.clock.now());
                self.persist(&execution).await;
                return execution;
            }
        }

        execution.mark_running();
        self.persist(&execution).await;
        info!(
            task_id = %task.id,
            execution_id = %execution.id,
            agent_id = %task.agent_id,
            manual = execution.manual,
            "Execution started"
        );

        loop {
            execution.attempts += 1;
            let call = self.agents.execute(&task.agent_id, &task.prompt);
            let (kind, message) = match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(result)) => {
                    execution.succeed(result, self.clock.now());
                    break;
                }
                Ok(Err(e)) => (FailureKind::AgentError, e.to_string()),
                Err(_) => (
                    FailureKind::ExecutionTimeout,
                    format!("execution timed out after {}s", self.timeout.as_secs()),
                ),
            };

            match self.retry.next_delay(execution.attempts, kind) {
                Some(delay) => {
                    warn!(
                        task_id = %task.id,
                        execution_id = %execution.id,
                        attempt = execution.attempts,
                        "{message}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    execution.fail(kind, message, self.clock.now());
                    break;
                }
            }
        }

        self.persist(&execution).await;
        match &execution.error {
            None => info!(
                task_id = %task.id,
                execution_id = %execution.id,
                attempts = execution.attempts,
                "Execution succeeded"
            ),
            Some(message) => error!(
                task_id = %task.id,
                execution_id = %execution.id,
                attempts = execution.attempts,
                "Execution failed: {message}"
            ),
        }
        execution
    }

    /// Prepare and execute in one go.
    pub async fn run(&self, task: &Task, manual: bool) -> Result<Execution, StorageError> {
        let execution = self.prepare(task, manual).await?;
        Ok(self.execute(task, execution).await)
    }

    pub(crate) async fn persist(&self, execution: &Execution) {
        if let Err(e) = self.executions.put_execution(execution).await {
            error!(
                task_id = %execution.task_id,
                execution_id = %execution.id,
                status = %execution.status,
                "Failed to write execution record: {e}"
            );
        }
    }
}

fn new_execution_id() -> String {
    format!("exec-{}", uuid::Uuid::new_v4())
}
