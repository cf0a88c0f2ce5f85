//! Runs one command with the job-boundary guarantees: overlap policy, the
//! `[CRON]` log lines, the maximum run time, panic containment and the
//! `cron_ejecuciones` audit row.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{CronCommand, JobDefinition, OverlapPolicy};
use crate::database::{Database, RUN_COMPLETED, RUN_FAILED};
use crate::errors::CronError;
use crate::run_tracker::RunTracker;
use crate::services::{CommandSummary, CronServices};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    /// Not started: the previous run is still running
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub command: CronCommand,
    pub status: RunStatus,
    pub summary: Option<CommandSummary>,
    pub message: Option<String>,
}

impl JobOutcome {
    /// Process exit code for one-shot runs. A skipped run is not a failure.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Failed => 1,
            RunStatus::Completed | RunStatus::Skipped => 0,
        }
    }
}

#[derive(Clone)]
pub struct JobRunner {
    services: CronServices,
    database: Arc<Database>,
    tracker: RunTracker,
    /// Lock owner id of this process
    owner: String,
}

impl JobRunner {
    pub fn new(services: CronServices, database: Arc<Database>) -> Self {
        Self {
            services,
            database,
            tracker: RunTracker::new(),
            owner: Uuid::new_v4().to_string(),
        }
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    pub async fn run(&self, job: &JobDefinition) -> JobOutcome {
        let name = job.command.name();

        if job.overlap == OverlapPolicy::Skip {
            if let Some(reason) = self.claim(job).await {
                info!("[CRON] Comando {} omitido: {}", name, reason);
                if let Err(e) = self
                    .database
                    .record_skipped_run(&name, &reason, Utc::now())
                    .await
                {
                    warn!("Failed to record skipped run of {}: {}", name, e);
                }
                return JobOutcome {
                    command: job.command,
                    status: RunStatus::Skipped,
                    summary: None,
                    message: Some(reason),
                };
            }
        }

        let outcome = self.execute(job).await;

        if job.overlap == OverlapPolicy::Skip {
            if let Err(e) = self.database.release_lock(&name, &self.owner).await {
                warn!("Failed to release lock of {}: {}", name, e);
            }
            self.tracker.finish(&name).await;
        }

        outcome
    }

    /// Take the in-process mark and the database lock. Returns the skip
    /// reason when either is held.
    async fn claim(&self, job: &JobDefinition) -> Option<String> {
        let name = job.command.name();
        let run_id = Uuid::new_v4().to_string();

        if let Err(e) = self.tracker.try_start(&name, &run_id).await {
            return Some(e.to_string());
        }

        let now = Utc::now();
        let expires_at = now
            + ChronoDuration::from_std(job.max_run).unwrap_or_else(|_| ChronoDuration::hours(1));

        match self
            .database
            .try_acquire_lock(&name, &self.owner, now, expires_at)
            .await
        {
            Ok(true) => None,
            Ok(false) => {
                self.tracker.finish(&name).await;
                Some(format!("{} is running in another process", name))
            }
            Err(e) => {
                // Without the lock table the in-process mark still prevents
                // overlap inside this daemon
                warn!("Could not take the lock of {}: {}", name, e);
                None
            }
        }
    }

    async fn execute(&self, job: &JobDefinition) -> JobOutcome {
        let name = job.command.name();
        let started_at = Utc::now();
        info!("[CRON] Iniciando comando {}", name);

        let run_id = match self.database.start_run(&name, started_at).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record start of {}: {}", name, e);
                None
            }
        };

        let services = self.services.clone();
        let command = job.command;
        let mut handle = tokio::spawn(async move { services.execute(command, started_at).await });

        let result = match timeout(job.max_run, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(CronError::Other(format!(
                "run aborted unexpectedly: {}",
                join_error
            ))),
            Err(_) => {
                handle.abort();
                // The lock and the running mark are released only once the
                // aborted task has stopped
                if let Err(join_error) = handle.await {
                    if !join_error.is_cancelled() {
                        warn!("Run of {} ended abnormally after abort: {}", name, join_error);
                    }
                }
                Err(CronError::Other(format!(
                    "exceeded maximum run time of {}s",
                    job.max_run.as_secs()
                )))
            }
        };

        let (status, summary, message) = match result {
            Ok(summary) => {
                info!("[CRON] Comando {} finalizado: {}", name, summary);
                (RunStatus::Completed, Some(summary), None)
            }
            Err(e) => {
                error!("[CRON] Comando {} falló: {}", name, e);
                (RunStatus::Failed, None, Some(e.to_string()))
            }
        };

        if let Some(run_id) = run_id {
            let estado = match status {
                RunStatus::Completed => RUN_COMPLETED,
                _ => RUN_FAILED,
            };
            let resumen = summary
                .as_ref()
                .and_then(|s| serde_json::to_string(s).ok());
            if let Err(e) = self
                .database
                .finish_run(
                    &run_id,
                    estado,
                    resumen.as_deref(),
                    message.as_deref(),
                    Utc::now(),
                )
                .await
            {
                warn!("Failed to record end of {}: {}", name, e);
            }
        }

        JobOutcome {
            command,
            status,
            summary,
            message,
        }
    }
}
