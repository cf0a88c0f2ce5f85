use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use reconciler::constants;
use reconciler::database::EntityKind;
use reconciler::{
    ConfigManager, CronCommand, CronScheduler, CronServices, Database, HttpPaymentGateway,
    JobRunner, WebhookMailer,
};

/// Reservation and payment reconciliation cron engine
#[derive(Parser, Debug)]
#[command(name = "reconciler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reservation and payment reconciliation cron engine", long_about = None)]
struct Cli {
    /// Configuration directory holding main.toml and secrets.toml
    #[arg(short, long = "config", default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Action {
    /// Start the scheduler (default)
    Daemon,
    /// Run one command once and exit with its status
    Run {
        /// Command name, with or without the `cron:` prefix
        #[arg(value_parser = parse_command)]
        command: CronCommand,
    },
    /// Print the configured command table
    List,
    /// Unfreeze a reserva or mensualidad
    ResetLedger {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        id: i64,
    },
}

fn parse_command(raw: &str) -> Result<CronCommand, String> {
    raw.parse()
}

fn parse_kind(raw: &str) -> Result<EntityKind, String> {
    raw.parse().map_err(|e: anyhow::Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("reconciler=info".parse()?)
        .add_directive("tokio_cron_scheduler=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let action = cli.action.clone().unwrap_or(Action::Daemon);

    let config_manager = ConfigManager::new(&cli.config_dir).await?;
    let config = config_manager.get_current_config();

    if action == Action::List {
        for job in config.job_table()? {
            println!(
                "{:<40} {:<22} {:<20} overlap={:?} enabled={} max_run={}s",
                job.command.name(),
                job.cadence.to_string(),
                job.cadence.to_cron(),
                job.overlap,
                job.enabled,
                job.max_run.as_secs()
            );
        }
        return Ok(());
    }

    let database = Arc::new(Database::new(&config.database_path).await?);

    if let Action::ResetLedger { kind, id } = action {
        if database.reset_ledger(kind, id, Utc::now()).await? {
            info!("Ledger of {} {} reset", kind, id);
            return Ok(());
        }
        return Err(anyhow!("No {} with id {}", kind, id));
    }

    let gateway = Arc::new(HttpPaymentGateway::new(&config.gateway)?);
    let mailer = Arc::new(WebhookMailer::new(&config.mail)?);
    let services = CronServices::new(config.clone(), database.clone(), gateway, mailer);
    let runner = JobRunner::new(services, database.clone());

    match action {
        Action::Run { command } => {
            let job = config
                .job_table()?
                .into_iter()
                .find(|job| job.command == command)
                .ok_or_else(|| anyhow!("{} is not in the command table", command))?;

            let outcome = runner.run(&job).await;
            std::process::exit(outcome.exit_code());
        }
        Action::Daemon => {
            info!("Starting reservation reconciliation daemon");

            let mut scheduler = CronScheduler::new(config.clone(), runner.clone()).await?;
            scheduler.start().await?;

            let tracker = runner.tracker().clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                    constants::scheduler::TRACKER_CLEANUP_INTERVAL_SECONDS,
                ));
                loop {
                    interval.tick().await;
                    let cleaned = tracker
                        .cleanup_stale(constants::scheduler::TRACKER_STALE_HOURS)
                        .await;
                    if cleaned > 0 {
                        warn!("Dropped {} lost running marks", cleaned);
                    }
                }
            });

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, stopping scheduler");
            if let Err(e) = scheduler.shutdown().await {
                error!("Scheduler shutdown failed: {}", e);
            }
        }
        Action::List | Action::ResetLedger { .. } => {}
    }

    Ok(())
}
