//! opsagent-gateway: REST server for scheduled agent tasks.
//!
//! Provides:
//! - [`TaskService`]: create/update/delete/enable/disable/trigger and history
//! - [`HttpAgentRuntime`]: agent calls against the agent backend
//! - An axum router under `/api` with optional bearer token authentication
//! - HTTP health check endpoint
//! - Graceful shutdown that lets in-flight runs finish

pub mod agent_client;
pub mod http;
pub mod service;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use opsagent_config::{OpsAgentConfig, RetryConfig, StorageBackend, StorageConfig};
use opsagent_cron::{ExponentialBackoff, NoRetry, RetryPolicy, Scheduler, TaskRunner, Zone};
use opsagent_storage::{LocalStore, SqliteStore, Stores};

pub use agent_client::HttpAgentRuntime;
pub use http::{AppState, router};
pub use service::{ServiceError, TaskDraft, TaskPatch, TaskService};

/// Open the configured storage backend.
///
/// A persistent backend that cannot be opened is an error; in-memory
/// storage is only used when configured explicitly.
pub fn open_stores(config: &StorageConfig) -> anyhow::Result<Stores> {
    if config.backend == StorageBackend::Memory {
        warn!("Storage: in-memory (nothing survives a restart)");
        return Ok(Stores::in_memory());
    }

    let path = config
        .resolve_path()
        .context("Failed to resolve storage path")?;

    let stores = match config.backend {
        StorageBackend::Local => Stores::shared(Arc::new(
            LocalStore::open(&path)
                .with_context(|| format!("Failed to open task directory {}", path.display()))?,
        )),
        _ => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            Stores::shared(Arc::new(
                SqliteStore::open(&path)
                    .with_context(|| format!("Failed to open database {}", path.display()))?,
            ))
        }
    };
    info!("Storage initialized: {}", path.display());
    Ok(stores)
}

pub fn retry_policy(config: &RetryConfig) -> Arc<dyn RetryPolicy> {
    if config.max_retries == 0 {
        return Arc::new(NoRetry);
    }
    Arc::new(ExponentialBackoff {
        max_retries: config.max_retries,
        initial_delay: std::time::Duration::from_millis(config.initial_backoff_ms),
        max_delay: std::time::Duration::from_millis(config.max_backoff_ms),
    })
}

/// Wire stores, the agent client and the scheduler together from config.
pub fn build_scheduler(config: &OpsAgentConfig, stores: &Stores) -> anyhow::Result<Scheduler> {
    let zone = config.scheduler.timezone.parse::<Zone>()?;
    let agents = Arc::new(HttpAgentRuntime::new(
        &config.agent_backend,
        config.agents.clone(),
    ));
    let runner = TaskRunner::new(stores.executions.clone(), agents)
        .with_timeout(config.scheduler.execution_timeout())
        .with_retry_policy(retry_policy(&config.scheduler.retry));
    Ok(Scheduler::in_zone(stores.tasks.clone(), runner, zone))
}

fn is_loopback_or_unspecified(host: &str) -> bool {
    matches!(
        host,
        "localhost" | "127.0.0.1" | "::1" | "[::1]" | "0.0.0.0" | "::" | "[::]"
    )
}

/// Whether the agent backend URL addresses this server's own listener.
pub fn agent_backend_points_at_server(config: &OpsAgentConfig, port: u16) -> bool {
    let Ok(url) = reqwest::Url::parse(&config.agent_backend.base_url) else {
        return false;
    };
    let (Some(host), Some(backend_port)) = (url.host_str(), url.port_or_known_default()) else {
        return false;
    };
    if backend_port != port {
        return false;
    }
    let server_host = config.server.host.as_str();
    host == server_host
        || (is_loopback_or_unspecified(host) && is_loopback_or_unspecified(server_host))
}

/// Start the server.
///
/// Reconciles and arms stored tasks, serves the REST API until Ctrl-C, then
/// stops the timers and waits for in-flight runs.
pub async fn start_server(config: OpsAgentConfig, port_override: Option<u16>) -> anyhow::Result<()> {
    let port = port_override.unwrap_or(config.server.port);
    let host = config.server.host.clone();
    let auth_token = config.server.auth_token.clone();

    if agent_backend_points_at_server(&config, port) {
        anyhow::bail!(
            "agent_backend.base_url {} points at this server (port {port}); \
             set it to the agent service's address",
            config.agent_backend.base_url
        );
    }

    let stores = open_stores(&config.storage)?;
    let scheduler = build_scheduler(&config, &stores)?;
    let report = scheduler.start().await?;
    if report.reconciled > 0 {
        warn!("Marked {} interrupted executions as failed", report.reconciled);
    }

    let service = Arc::new(TaskService::new(stores, scheduler.clone()));
    let state = Arc::new(AppState {
        service,
        auth_token,
    });
    let app = router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("Gateway listening on {addr}");
    info!("  API:    http://{addr}/api/scheduled-tasks");
    info!("  Health: http://{addr}/health");
    info!("  Agent backend: {}", config.agent_backend.base_url);
    info!("  Cron time zone: {}", scheduler.zone());
    info!(
        "  Scheduler: {} tasks loaded, {} armed",
        report.loaded, report.armed
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    info!("Waiting for in-flight runs to finish");
    scheduler.drain().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
