use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────── Agent Types ────────────────────

/// Configuration for an agent known to this instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name for this agent.
    pub name: String,
    /// Optional system prompt sent along with every task prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Free-form description shown in listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single message produced by an agent during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: String,
    pub content: String,
}

impl AgentMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

// ──────────────────── Task Types ────────────────────

/// A recurring job definition.
///
/// `last_executed_at` and `next_execution_at` are written only by the
/// scheduler; every other field belongs to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Standard 5-field cron expression.
    pub cron_expression: String,
    pub prompt: String,
    #[serde(default)]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_execution_at: Option<DateTime<Utc>>,
}

// ──────────────────── Execution Types ────────────────────

/// Status of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Admitted, agent call not started yet.
    Pending,
    /// Agent call in flight.
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    /// Whether the status is final. Terminal records are never mutated.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Machine-readable reason attached to a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// The task's agent could not be resolved; no agent call was made.
    AgentNotFound,
    /// The agent call returned an error.
    AgentError,
    /// The agent call exceeded the execution timeout.
    ExecutionTimeout,
    /// The process stopped while the execution was in flight.
    Interrupted,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentNotFound => "AgentNotFound",
            Self::AgentError => "AgentError",
            Self::ExecutionTimeout => "ExecutionTimeout",
            Self::Interrupted => "Interrupted",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AgentNotFound" => Ok(Self::AgentNotFound),
            "AgentError" => Ok(Self::AgentError),
            "ExecutionTimeout" => Ok(Self::ExecutionTimeout),
            "Interrupted" => Ok(Self::Interrupted),
            other => Err(format!("unknown failure kind: {other}")),
        }
    }
}

/// Maximum number of characters kept in an execution summary.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Summary used when the agent produced no text.
pub const DEFAULT_SUMMARY: &str = "Execution completed";

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub messages: Vec<AgentMessage>,
    pub summary: String,
}

impl ExecutionResult {
    /// Build a result whose summary is the last non-empty assistant message,
    /// cut to [`SUMMARY_MAX_CHARS`] characters.
    pub fn from_messages(messages: Vec<AgentMessage>) -> Self {
        let summary = messages
            .iter()
            .rev()
            .find(|m| m.role == "assistant" && !m.content.trim().is_empty())
            .map(|m| m.content.chars().take(SUMMARY_MAX_CHARS).collect())
            .unwrap_or_else(|| DEFAULT_SUMMARY.to_string());
        Self { messages, summary }
    }
}

/// One run record of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    /// True when the run was requested by an operator rather than the cron timer.
    #[serde(default)]
    pub manual: bool,
    /// Number of agent calls made for this run.
    #[serde(default)]
    pub attempts: u32,
}

impl Execution {
    /// A freshly admitted run.
    pub fn pending(
        id: impl Into<String>,
        task_id: impl Into<String>,
        start_time: DateTime<Utc>,
        manual: bool,
    ) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            start_time,
            end_time: None,
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            error_kind: None,
            manual,
            attempts: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move a pending record to `running`. Returns false if the record was
    /// not pending.
    pub fn mark_running(&mut self) -> bool {
        if self.status != ExecutionStatus::Pending {
            return false;
        }
        self.status = ExecutionStatus::Running;
        true
    }

    /// Finish successfully. Returns false if the record was already terminal.
    pub fn succeed(&mut self, result: ExecutionResult, at: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = ExecutionStatus::Success;
        self.end_time = Some(at);
        self.result = Some(result);
        self.error = None;
        self.error_kind = None;
        true
    }

    /// Finish with a failure. Returns false if the record was already terminal.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>, at: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = ExecutionStatus::Failed;
        self.end_time = Some(at);
        self.result = None;
        self.error = Some(message.into());
        self.error_kind = Some(kind);
        true
    }
}

// ──────────────────── Pagination ────────────────────

/// One page of a listing together with the unpaginated total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    /// Slice an already sorted, complete listing.
    pub fn from_sorted(all: Vec<T>, limit: usize, offset: usize) -> Self {
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            total,
            limit,
            offset,
        }
    }
}

/// Named agent definitions, keyed by agent id.
pub type AgentMap = HashMap<String, AgentConfig>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, h, m, 0).unwrap()
    }

    #[test]
    fn test_task_serde_camel_case() {
        let task = Task {
            id: "task-1".into(),
            name: "Disk report".into(),
            description: String::new(),
            agent_id: "sre".into(),
            project_id: None,
            cron_expression: "0 * * * *".into(),
            prompt: "Check disk usage".into(),
            enabled: true,
            created_at: at(0, 0),
            updated_at: at(0, 0),
            last_executed_at: None,
            next_execution_at: Some(at(1, 0)),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["agentId"], "sre");
        assert_eq!(json["cronExpression"], "0 * * * *");
        assert!(json.get("projectId").is_none());
        assert!(json["lastExecutedAt"].is_null());

        let parsed: Task = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_execution_status_serde() {
        let json = serde_json::to_string(&ExecutionStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!("failed".parse::<ExecutionStatus>(), Ok(ExecutionStatus::Failed));
        assert!("skipped".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_execution_lifecycle() {
        let mut exec = Execution::pending("exec-1", "task-1", at(0, 0), false);
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert!(exec.end_time.is_none());

        assert!(exec.mark_running());
        assert!(!exec.mark_running());

        let result = ExecutionResult::from_messages(vec![AgentMessage::assistant("all good")]);
        assert!(exec.succeed(result, at(0, 5)));
        assert_eq!(exec.status, ExecutionStatus::Success);
        assert_eq!(exec.end_time, Some(at(0, 5)));

        // Terminal records stay as they are.
        assert!(!exec.fail(FailureKind::Interrupted, "late", at(0, 6)));
        assert_eq!(exec.status, ExecutionStatus::Success);
        assert!(exec.error.is_none());
    }

    #[test]
    fn test_failed_execution_serde() {
        let mut exec = Execution::pending("exec-1", "task-1", at(0, 0), true);
        exec.fail(FailureKind::ExecutionTimeout, "ExecutionTimeout: exceeded 600s", at(0, 10));
        let json = serde_json::to_value(&exec).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["errorKind"], "executionTimeout");
        assert_eq!(json["manual"], true);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_summary_truncation() {
        let long = "x".repeat(500);
        let result = ExecutionResult::from_messages(vec![
            AgentMessage::assistant("first"),
            AgentMessage::assistant(long),
        ]);
        assert_eq!(result.summary.chars().count(), SUMMARY_MAX_CHARS);
        assert_eq!(result.messages.len(), 2);
    }

    #[test]
    fn test_summary_multibyte_boundary() {
        let text = "磁盘".repeat(150);
        let result = ExecutionResult::from_messages(vec![AgentMessage::assistant(text)]);
        assert_eq!(result.summary.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_summary_default_when_empty() {
        let result = ExecutionResult::from_messages(vec![AgentMessage {
            role: "user".into(),
            content: "hello".into(),
        }]);
        assert_eq!(result.summary, DEFAULT_SUMMARY);
    }

    #[test]
    fn test_page_slicing() {
        let page = Page::from_sorted((0..10).collect::<Vec<_>>(), 3, 8);
        assert_eq!(page.items, vec![8, 9]);
        assert_eq!(page.total, 10);
    }
}
