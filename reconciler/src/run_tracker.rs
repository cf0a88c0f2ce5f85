//! In-process tracking of running cron commands
//!
//! Each command is either idle or running. A start attempt while the command
//! is running fails, and the caller skips the fire instead of queuing it.
//! Cross-process exclusion is the job of the `cron_bloqueos` lock table; this
//! tracker covers overlapping fires inside one daemon without a database
//! round trip.
//!
//! ```ignore
//! tracker.try_start("cron:confirmar-pagos", &run_id).await?;
//! // run the command...
//! tracker.finish("cron:confirmar-pagos").await;
//! ```

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub command: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunTrackerStatus {
    pub running: HashMap<String, ActiveRun>,
    pub total_running: usize,
}

#[derive(Clone, Default)]
pub struct RunTracker {
    active_runs: Arc<RwLock<HashMap<String, ActiveRun>>>, // command -> run
}

fn format_elapsed(started_at: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(started_at);
    if elapsed.num_minutes() > 0 {
        format!("{}m {}s", elapsed.num_minutes(), elapsed.num_seconds() % 60)
    } else {
        format!("{}s", elapsed.num_seconds())
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `command` as running. Fails if it already is.
    #[instrument(skip(self), fields(command = %command))]
    pub async fn try_start(&self, command: &str, run_id: &str) -> Result<()> {
        let mut active = self.active_runs.write().await;

        if let Some(current) = active.get(command) {
            return Err(anyhow::anyhow!(
                "{} is still running (run {}, started {} ago)",
                command,
                current.run_id,
                format_elapsed(current.started_at)
            ));
        }

        active.insert(
            command.to_string(),
            ActiveRun {
                command: command.to_string(),
                run_id: run_id.to_string(),
                started_at: Utc::now(),
            },
        );
        debug!("{} marked as running", command);
        Ok(())
    }

    pub async fn finish(&self, command: &str) {
        let mut active = self.active_runs.write().await;
        if let Some(run) = active.remove(command) {
            debug!(
                "{} back to idle after {}",
                command,
                format_elapsed(run.started_at)
            );
        }
    }

    pub async fn is_running(&self, command: &str) -> bool {
        self.active_runs.read().await.contains_key(command)
    }

    pub async fn status(&self) -> RunTrackerStatus {
        let active = self.active_runs.read().await;
        RunTrackerStatus {
            running: active.clone(),
            total_running: active.len(),
        }
    }

    /// Forget runs older than `max_hours` (a run whose task was lost)
    pub async fn cleanup_stale(&self, max_hours: i64) -> u32 {
        let mut active = self.active_runs.write().await;
        let cutoff = Utc::now() - chrono::Duration::hours(max_hours);
        let before = active.len();

        active.retain(|command, run| {
            let keep = run.started_at > cutoff;
            if !keep {
                warn!(
                    "Dropping stale running mark of {} (run {}, started {})",
                    command, run.run_id, run.started_at
                );
            }
            keep
        });

        (before - active.len()) as u32
    }
}
