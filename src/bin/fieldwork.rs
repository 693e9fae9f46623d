//! fieldwork CLI — operator interface to the dispatch orchestrator.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing::info;

use fieldwork::classify::OutcomeClassifier;
use fieldwork::config::{Config, load_accounts};
use fieldwork::correlate::CorrelatorConfig;
use fieldwork::db::Db;
use fieldwork::db::results::ResultStore;
use fieldwork::model::WorkKind;
use fieldwork::orchestrator::OrchestratorConfig;
use fieldwork::source::HttpTaskSource;
use fieldwork::supervisor::Supervisor;
use fieldwork::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "fieldwork", about = "Crowd-work dispatch orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervised account fleet
    Serve {
        /// TOML file with [[account]] entries
        #[arg(long, default_value = "accounts.toml")]
        accounts: PathBuf,
        /// Dispatch attempts per work item before abandoning
        #[arg(long, default_value_t = 4)]
        max_attempts: u32,
        /// Hard deadline waiting for a correlated result (seconds)
        #[arg(long, default_value_t = 240)]
        result_timeout_secs: u64,
        /// Sleep between result store probes (seconds)
        #[arg(long, default_value_t = 5)]
        poll_interval_secs: u64,
        /// Cooldown before restarting a crashed account loop (seconds)
        #[arg(long, default_value_t = 10)]
        restart_cooldown_secs: u64,
    },
    /// Peek at the next message on a kind's dispatch queue
    QueuePeek {
        /// Work kind ("detail" | "list")
        kind: String,
    },
    /// Show today's deposited result for a correlation key
    ResultShow {
        /// Work kind ("detail" | "list")
        kind: String,
        /// Correlation key, e.g. "H1|2025-11-10|2025-11-11"
        identity: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "fieldwork".to_string(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    db.create_queue(WorkKind::Detail).await?;
    db.create_queue(WorkKind::List).await?;
    let db = Arc::new(db);

    match cli.command {
        Command::Serve {
            accounts,
            max_attempts,
            result_timeout_secs,
            poll_interval_secs,
            restart_cooldown_secs,
        } => {
            let roster = load_accounts(&accounts)?;
            let source = Arc::new(HttpTaskSource::new(config.task_api_url.clone())?);

            let supervisor = Supervisor::new(
                source,
                Arc::clone(&db),
                Arc::clone(&db),
                Arc::new(OutcomeClassifier::with_default_checks()),
                CorrelatorConfig {
                    timeout: Duration::from_secs(result_timeout_secs),
                    poll_interval: Duration::from_secs(poll_interval_secs),
                },
                OrchestratorConfig {
                    max_attempts,
                    restart_cooldown: Duration::from_secs(restart_cooldown_secs),
                    ..OrchestratorConfig::default()
                },
            );
            let supervisor = Arc::new(supervisor);

            let sig = Arc::clone(&supervisor);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested, finishing in-flight work");
                    sig.shutdown();
                }
            });

            supervisor.run(roster).await?;
        }
        Command::QueuePeek { kind } => {
            let kind = WorkKind::from_str(&kind)?;
            // Peek with a 1s visibility timeout so the message reappears
            // for the real consumer almost immediately.
            match db.read_from_queue(kind, 1).await? {
                Some(msg) => {
                    println!(
                        "msg_id={} read_ct={} enqueued_at={}",
                        msg.msg_id, msg.read_ct, msg.enqueued_at
                    );
                    println!("{}", serde_json::to_string_pretty(&msg.message)?);
                }
                None => println!("queue {} is empty", kind.queue_name()),
            }
        }
        Command::ResultShow { kind, identity } => {
            let kind = WorkKind::from_str(&kind)?;
            let today = chrono::Local::now().date_naive();
            match db.fetch(kind, &identity, today).await? {
                Some(record) => {
                    println!("produced_at={}", record.produced_at);
                    println!("{}", serde_json::to_string_pretty(&record.payload)?);
                }
                None => println!("no result for {identity} today"),
            }
        }
    }

    Ok(())
}
