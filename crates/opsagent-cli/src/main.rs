mod tasks;

use clap::{Parser, Subcommand};

use anyhow::Context;
use opsagent_cron::{CronExpr, Zone};

#[derive(Parser)]
#[command(name = "opsagent", about = "Scheduled agent task server")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and REST server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate a cron expression and preview its next fire times
    Cron {
        /// Five-field cron expression, e.g. "0 9 * * 1-5"
        expression: String,

        /// Time zone to evaluate in: "local", "UTC" or an IANA name
        /// (defaults to scheduler.timezone from config)
        #[arg(long)]
        tz: Option<String>,

        /// Number of fire times to show
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
    /// Manage tasks on a running server
    Tasks {
        #[command(subcommand)]
        command: tasks::TasksCommand,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,

        /// Bearer token for authentication
        #[arg(long)]
        token: Option<String>,
    },
    /// Check configuration
    Health,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Serve { port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let config = match opsagent_config::load_config() {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Failed to load config, using defaults: {e}");
                        opsagent_config::OpsAgentConfig::default()
                    }
                };
                opsagent_gateway::start_server(config, port).await
            })?;
        }
        Commands::Cron {
            expression,
            tz,
            count,
        } => {
            let tz = tz.unwrap_or_else(|| {
                opsagent_config::load_config()
                    .map(|c| c.scheduler.timezone)
                    .unwrap_or_else(|_| "local".to_string())
            });
            let zone = tz.parse::<Zone>().context("invalid --tz")?;
            let expr = match CronExpr::parse(&expression) {
                Ok(expr) => expr.with_zone(zone),
                Err(e) => anyhow::bail!("invalid cron expression: {e}"),
            };
            println!("{expr} is valid; next {count} fire times ({zone}):");
            for at in expr.upcoming(chrono::Utc::now()).take(count) {
                println!("  {}", zone.wall_clock(at).format("%Y-%m-%d %H:%M %a"));
            }
        }
        Commands::Tasks {
            command,
            url,
            token,
        } => {
            let token = token.or_else(|| {
                opsagent_config::load_config()
                    .ok()
                    .and_then(|c| c.server.auth_token)
            });
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(tasks::run_tasks(command, url, token))?;
        }
        Commands::Health => {
            println!("opsagent is healthy");
            let config = opsagent_config::load_config().unwrap_or_default();
            println!("  server: {}:{}", config.server.host, config.server.port);
            println!("  storage backend: {:?}", config.storage.backend);
            println!("  agent backend: {}", config.agent_backend.base_url);
            println!("  cron time zone: {}", config.scheduler.timezone);
            println!("  agents configured: {}", config.agents.len());
            println!(
                "  execution timeout: {}s",
                config.scheduler.execution_timeout_secs
            );
        }
    }

    Ok(())
}
