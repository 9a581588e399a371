//! The agent collaborator invoked by task runs.

use async_trait::async_trait;

use opsagent_types::ExecutionResult;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent ran and reported a failure.
    #[error("agent failed: {0}")]
    Failed(String),

    /// The agent backend could not be reached or answered garbage.
    #[error("agent backend unavailable: {0}")]
    Unavailable(String),
}

/// Executes agents on behalf of scheduled tasks.
///
/// The agent's reasoning is opaque here: a run is a prompt in and messages
/// out, or an error.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Whether `agent_id` names an agent that can be run.
    async fn resolve_agent(&self, agent_id: &str) -> Result<bool, AgentError>;

    /// Run the agent on `prompt` and collect its messages.
    async fn execute(&self, agent_id: &str, prompt: &str) -> Result<ExecutionResult, AgentError>;
}
