use anyhow::{anyhow, Result};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, instrument, warn};

use super::runner::JobRunner;
use super::{validate_6_field_cron, JobDefinition};
use crate::config::Config;

/// Daemon mode: one cron job per enabled command, fired in the configured
/// timezone. Every fire runs in its own task so a slow command never delays
/// the others; overlap is decided by the runner.
pub struct CronScheduler {
    config: Arc<Config>,
    runner: JobRunner,
    scheduler: JobScheduler,
}

impl CronScheduler {
    pub async fn new(config: Arc<Config>, runner: JobRunner) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create JobScheduler: {}", e))?;

        Ok(Self {
            config,
            runner,
            scheduler,
        })
    }

    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<usize> {
        let tz = self.config.tz();
        info!(
            "Starting cron scheduler with 6-field cron format (sec min hour day month dow) in {}",
            tz
        );

        let mut scheduled_count = 0;
        for job in self.config.job_table()? {
            if !job.enabled {
                info!("{} disabled, skipping schedule", job.command);
                continue;
            }

            let expression = job.cadence.to_cron();
            match self.schedule(job.clone(), tz).await {
                Ok(()) => {
                    scheduled_count += 1;
                    info!(
                        "✓ Scheduled {}: {} ({}, overlap {:?})",
                        job.command, job.cadence, expression, job.overlap
                    );
                }
                Err(e) => {
                    error!(
                        "✗ Failed to schedule {}: {} (cadence: {})",
                        job.command, e, job.cadence
                    );
                }
            }
        }

        if scheduled_count > 0 {
            self.scheduler
                .start()
                .await
                .map_err(|e| anyhow!("Failed to start JobScheduler: {}", e))?;
            info!("✓ Cron scheduler started with {} jobs", scheduled_count);
        } else {
            warn!("No commands enabled - scheduler not started");
        }

        Ok(scheduled_count)
    }

    async fn schedule(&self, job: JobDefinition, tz: Tz) -> Result<()> {
        let expression = job.cadence.to_cron();
        validate_6_field_cron(&expression)
            .map_err(|e| anyhow!("Invalid 6-field cron schedule '{}': {}", expression, e))?;

        let runner = self.runner.clone();
        let cron_job = Job::new_async_tz(expression.as_str(), tz, move |_uuid, _scheduler| {
            let runner = runner.clone();
            let job = job.clone();

            Box::pin(async move {
                // Detached so the scheduler tick returns immediately
                tokio::spawn(async move {
                    runner.run(&job).await;
                });
            })
        })
        .map_err(|e| anyhow!("Failed to create job for '{}': {}", expression, e))?;

        self.scheduler
            .add(cron_job)
            .await
            .map_err(|e| anyhow!("Failed to add job to scheduler: {}", e))?;

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| anyhow!("Failed to stop JobScheduler: {}", e))
    }
}
