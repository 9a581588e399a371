//! Shared fixtures for the engine's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use opsagent_types::{AgentMessage, ExecutionResult, Task};

use crate::agent::{AgentError, AgentRuntime};

/// 2026-02-14 (a Saturday) at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 14, h, m, 0).unwrap()
}

pub fn task(id: &str, cron: &str) -> Task {
    Task {
        id: id.into(),
        name: format!("{id} name"),
        description: String::new(),
        agent_id: "sre".into(),
        project_id: None,
        cron_expression: cron.into(),
        prompt: "Report disk usage".into(),
        enabled: true,
        created_at: at(0, 0),
        updated_at: at(0, 0),
        last_executed_at: None,
        next_execution_at: None,
    }
}

/// Scripted agent: answers after `delay`, optionally failing the first calls.
pub struct MockAgent {
    known: Vec<String>,
    delay: Duration,
    delays: HashMap<String, Duration>,
    failures: AtomicU32,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl MockAgent {
    pub fn new(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(|s| s.to_string()).collect(),
            delay: Duration::ZERO,
            delays: HashMap::new(),
            failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer calls for `agent_id` after `delay` instead of the default.
    pub fn with_delay_for(mut self, agent_id: &str, delay: Duration) -> Self {
        self.delays.insert(agent_id.to_string(), delay);
        self
    }

    /// Fail the first `n` calls.
    pub fn failing(self, n: u32) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were ever in flight together.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentRuntime for MockAgent {
    async fn resolve_agent(&self, agent_id: &str) -> Result<bool, AgentError> {
        Ok(self.known.iter().any(|k| k == agent_id))
    }

    async fn execute(&self, agent_id: &str, prompt: &str) -> Result<ExecutionResult, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self.delays.get(agent_id).copied().unwrap_or(self.delay);
        tokio::time::sleep(delay).await;

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AgentError::Failed("boom".into()));
        }
        Ok(ExecutionResult::from_messages(vec![AgentMessage::assistant(
            format!("done: {prompt}"),
        )]))
    }
}

/// Agent whose first call panics; later calls succeed.
#[derive(Default)]
pub struct PanicAgent {
    panicked: AtomicBool,
}

#[async_trait]
impl AgentRuntime for PanicAgent {
    async fn resolve_agent(&self, _agent_id: &str) -> Result<bool, AgentError> {
        Ok(true)
    }

    async fn execute(&self, _agent_id: &str, _prompt: &str) -> Result<ExecutionResult, AgentError> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("agent crashed");
        }
        Ok(ExecutionResult::from_messages(vec![AgentMessage::assistant(
            "recovered",
        )]))
    }
}
