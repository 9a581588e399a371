//! HTTP client for the agent backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use opsagent_config::AgentBackendConfig;
use opsagent_cron::{AgentError, AgentRuntime};
use opsagent_types::{AgentMap, AgentMessage, ExecutionResult};

/// Runs agents through the backend's chat endpoint.
///
/// Agents listed in the local config resolve without a round trip; any
/// other id is looked up with `GET /api/agents/{id}`.
pub struct HttpAgentRuntime {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    agents: AgentMap,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    agent_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    response: String,
    #[serde(default)]
    tools_used: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteAgent {
    #[serde(default)]
    system_prompt: Option<String>,
}

impl HttpAgentRuntime {
    pub fn new(backend: &AgentBackendConfig, agents: AgentMap) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: backend.base_url.trim_end_matches('/').to_string(),
            auth_token: backend.auth_token.clone(),
            agents,
        }
    }

    /// Backend URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, AgentError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            AgentError::Unavailable(format!("invalid agent backend URL {}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                AgentError::Unavailable(format!(
                    "agent backend URL {} cannot take a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(
        &self,
        method: reqwest::Method,
        segments: &[&str],
    ) -> Result<reqwest::RequestBuilder, AgentError> {
        let builder = self.client.request(method, self.endpoint(segments)?);
        Ok(match &self.auth_token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        })
    }

    async fn fetch_agent(&self, agent_id: &str) -> Result<Option<RemoteAgent>, AgentError> {
        let resp = self
            .request(reqwest::Method::GET, &["api", "agents", agent_id])?
            .send()
            .await
            .map_err(|e| AgentError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AgentError::Unavailable(format!(
                "agent lookup returned {status}"
            )));
        }
        let agent = resp
            .json()
            .await
            .map_err(|e| AgentError::Unavailable(format!("invalid agent response: {e}")))?;
        Ok(Some(agent))
    }

    async fn system_prompt(&self, agent_id: &str) -> Result<Option<String>, AgentError> {
        if let Some(local) = self.agents.get(agent_id) {
            return Ok(local.system_prompt.clone());
        }
        Ok(self
            .fetch_agent(agent_id)
            .await?
            .and_then(|agent| agent.system_prompt)
            .filter(|p| !p.is_empty()))
    }
}

/// Pull a readable message out of an error body (`{"detail"}` or `{"error"}`).
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("detail")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn resolve_agent(&self, agent_id: &str) -> Result<bool, AgentError> {
        if self.agents.contains_key(agent_id) {
            return Ok(true);
        }
        Ok(self.fetch_agent(agent_id).await?.is_some())
    }

    async fn execute(&self, agent_id: &str, prompt: &str) -> Result<ExecutionResult, AgentError> {
        let system_prompt = self.system_prompt(agent_id).await?;
        let body = ChatRequest {
            agent_id,
            message: prompt,
            system_prompt: system_prompt.as_deref(),
        };

        let resp = self
            .request(reqwest::Method::POST, &["api", "chat"])?
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Failed(format!(
                "{status}: {}",
                error_message(&text)
            )));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::Failed(format!("invalid chat response: {e}")))?;
        debug!(agent_id, tools = chat.tools_used.len(), "Agent call finished");

        let mut messages: Vec<AgentMessage> = chat
            .tools_used
            .into_iter()
            .map(|tool| AgentMessage {
                role: "tool".to_string(),
                content: tool,
            })
            .collect();
        messages.push(AgentMessage::assistant(chat.response));
        Ok(ExecutionResult::from_messages(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use opsagent_types::AgentConfig;
    use serde_json::{Value, json};

    async fn agent_route(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
        match id.as_str() {
            "sre" => Ok(Json(json!({"id": "sre", "systemPrompt": "You are an SRE."}))),
            "team/sre" => Ok(Json(json!({"id": "team/sre"}))),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn chat_route(Json(body): Json<Value>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
        if body["message"] == "explode" {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": "model overloaded"})),
            ));
        }
        let reply = format!(
            "[{}] {}",
            body["systemPrompt"].as_str().unwrap_or("-"),
            body["message"].as_str().unwrap_or_default()
        );
        Ok(Json(json!({"response": reply, "toolsUsed": ["Bash"]})))
    }

    /// Serve a fake agent backend on an ephemeral port.
    async fn backend() -> String {
        let app = Router::new()
            .route("/api/agents/{id}", get(agent_route))
            .route("/api/chat", post(chat_route));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn runtime(base_url: String, agents: AgentMap) -> HttpAgentRuntime {
        HttpAgentRuntime::new(
            &AgentBackendConfig {
                base_url,
                auth_token: None,
            },
            agents,
        )
    }

    #[tokio::test]
    async fn test_resolve_agent() {
        let url = backend().await;
        let mut agents = AgentMap::new();
        agents.insert(
            "local".into(),
            AgentConfig {
                name: "Local".into(),
                system_prompt: None,
                description: None,
            },
        );
        let runtime = runtime(url, agents);

        assert!(runtime.resolve_agent("local").await.unwrap());
        assert!(runtime.resolve_agent("sre").await.unwrap());
        assert!(!runtime.resolve_agent("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_execute_uses_remote_system_prompt() {
        let runtime = runtime(backend().await, AgentMap::new());
        let result = runtime.execute("sre", "check disks").await.unwrap();

        assert_eq!(result.summary, "[You are an SRE.] check disks");
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, "tool");
        assert_eq!(result.messages[0].content, "Bash");
    }

    #[tokio::test]
    async fn test_execute_surfaces_backend_error() {
        let runtime = runtime(backend().await, AgentMap::new());
        let err = runtime.execute("sre", "explode").await.unwrap_err();
        assert!(matches!(err, AgentError::Failed(ref m) if m.contains("model overloaded")));
    }

    #[tokio::test]
    async fn test_agent_id_is_one_path_segment() {
        let runtime = runtime(backend().await, AgentMap::new());
        assert!(runtime.resolve_agent("team/sre").await.unwrap());
        assert!(!runtime.resolve_agent("sre?debug=1").await.unwrap());
        assert!(!runtime.resolve_agent("../agents/sre").await.unwrap());
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let rt = runtime("http://agents.internal:8001/prefix/".into(), AgentMap::new());
        let url = rt.endpoint(&["api", "agents", "a b/c?d"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://agents.internal:8001/prefix/api/agents/a%20b%2Fc%3Fd"
        );

        let bad = runtime("not a url".into(), AgentMap::new());
        assert!(matches!(
            bad.endpoint(&["api", "chat"]),
            Err(AgentError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let runtime = runtime("http://127.0.0.1:1".into(), AgentMap::new());
        assert!(matches!(
            runtime.resolve_agent("sre").await,
            Err(AgentError::Unavailable(_))
        ));
    }
}
