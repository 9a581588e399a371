use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde_json::Value;

#[derive(Subcommand)]
pub enum TasksCommand {
    /// List scheduled tasks
    List,
    /// Show a task's execution history
    Executions {
        /// Task ID
        task_id: String,

        /// Page size (max 100)
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Number of records to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Run a task now
    Trigger {
        /// Task ID
        task_id: String,
    },
    /// Enable a task
    Enable {
        /// Task ID
        task_id: String,
    },
    /// Disable a task
    Disable {
        /// Task ID
        task_id: String,
    },
    /// Show armed timers and runtime state
    Jobs,
}

/// Minimal client for the server's REST API.
struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    fn new(url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn call(&self, method: reqwest::Method, path: &str) -> Result<Value> {
        let mut request = self.client.request(method, format!("{}{path}", self.base_url));
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("Failed to reach server at {}", self.base_url))?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown error");
            bail!("{status}: {message}");
        }
        Ok(body)
    }
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("-")
}

fn print_task(task: &Value) {
    let state = if task["enabled"].as_bool().unwrap_or(false) {
        "enabled"
    } else {
        "disabled"
    };
    println!(
        "{}  {}  [{}]  {}",
        text(task, "id"),
        text(task, "cronExpression"),
        state,
        text(task, "name")
    );
    println!(
        "    agent: {}  last: {}  next: {}",
        text(task, "agentId"),
        text(task, "lastExecutedAt"),
        text(task, "nextExecutionAt")
    );
}

/// Run a `tasks` subcommand against a running server.
pub async fn run_tasks(command: TasksCommand, url: String, token: Option<String>) -> Result<()> {
    let api = ApiClient::new(&url, token);

    match command {
        TasksCommand::List => {
            let body = api.call(reqwest::Method::GET, "/api/scheduled-tasks").await?;
            let tasks = body["tasks"].as_array().cloned().unwrap_or_default();
            if tasks.is_empty() {
                println!("No scheduled tasks.");
            }
            for task in &tasks {
                print_task(task);
            }
        }
        TasksCommand::Executions {
            task_id,
            limit,
            offset,
        } => {
            let path = format!(
                "/api/scheduled-tasks/{task_id}/executions?limit={limit}&offset={offset}"
            );
            let body = api.call(reqwest::Method::GET, &path).await?;
            let executions = body["executions"].as_array().cloned().unwrap_or_default();
            println!(
                "{} of {} executions",
                executions.len(),
                body["total"].as_u64().unwrap_or(0)
            );
            for exec in &executions {
                let detail = exec
                    .get("error")
                    .and_then(|e| e.as_str())
                    .or_else(|| exec["result"]["summary"].as_str())
                    .unwrap_or("");
                println!(
                    "{}  {:<8} {}  {}{}",
                    text(exec, "id"),
                    text(exec, "status"),
                    text(exec, "startTime"),
                    if exec["manual"].as_bool().unwrap_or(false) {
                        "(manual) "
                    } else {
                        ""
                    },
                    detail
                );
            }
        }
        TasksCommand::Trigger { task_id } => {
            let path = format!("/api/scheduled-tasks/{task_id}/trigger");
            let body = api.call(reqwest::Method::POST, &path).await?;
            println!(
                "Triggered {task_id}: execution {} ({})",
                text(&body["execution"], "id"),
                text(&body["execution"], "status")
            );
        }
        TasksCommand::Enable { task_id } => {
            let path = format!("/api/scheduled-tasks/{task_id}/enable");
            let body = api.call(reqwest::Method::POST, &path).await?;
            print_task(&body["task"]);
        }
        TasksCommand::Disable { task_id } => {
            let path = format!("/api/scheduled-tasks/{task_id}/disable");
            let body = api.call(reqwest::Method::POST, &path).await?;
            print_task(&body["task"]);
        }
        TasksCommand::Jobs => {
            let body = api.call(reqwest::Method::GET, "/api/scheduler/jobs").await?;
            for job in body["jobs"].as_array().cloned().unwrap_or_default() {
                println!(
                    "{}  {:<8} armed={}  next: {}",
                    text(&job, "taskId"),
                    text(&job, "state"),
                    job["armed"].as_bool().unwrap_or(false),
                    text(&job, "nextExecutionAt")
                );
            }
        }
    }

    Ok(())
}
