//! Cron run audit records (`cron_ejecuciones`) and cross-process command
//! locks (`cron_bloqueos`).

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::records::CronRun;
use super::Database;
use crate::errors::DatabaseError;

pub const RUN_RUNNING: &str = "running";
pub const RUN_COMPLETED: &str = "completed";
pub const RUN_FAILED: &str = "failed";
pub const RUN_SKIPPED: &str = "skipped";

impl Database {
    pub async fn start_run(&self, command: &str, now: DateTime<Utc>) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO cron_ejecuciones (id, comando, estado, started_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(command)
        .bind(RUN_RUNNING)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        debug!("Cron run {} started for {}", id, command);
        Ok(id)
    }

    pub async fn finish_run(
        &self,
        id: &str,
        estado: &str,
        resumen: Option<&str>,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cron_ejecuciones
            SET estado = ?, finished_at = ?, resumen = ?, error_message = ?
            WHERE id = ? AND estado = ?
            "#,
        )
        .bind(estado)
        .bind(now)
        .bind(resumen)
        .bind(error_message)
        .bind(id)
        .bind(RUN_RUNNING)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(())
    }

    /// A run that never started because another one was in progress
    pub async fn record_skipped_run(
        &self,
        command: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO cron_ejecuciones (id, comando, estado, started_at, finished_at, resumen)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(command)
        .bind(RUN_SKIPPED)
        .bind(now)
        .bind(now)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(id)
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<CronRun>> {
        let row = sqlx::query(
            r#"
            SELECT id, comando, estado, started_at, finished_at, resumen, error_message
            FROM cron_ejecuciones WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(CronRun {
                id: row.try_get("id")?,
                comando: row.try_get("comando")?,
                estado: row.try_get("estado")?,
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
                resumen: row.try_get("resumen")?,
                error_message: row.try_get("error_message")?,
            })
        })
        .transpose()
    }

    /// Latest runs of one command, newest first
    pub async fn recent_runs(&self, command: &str, limit: i64) -> Result<Vec<CronRun>> {
        let rows = sqlx::query(
            r#"
            SELECT id, comando, estado, started_at, finished_at, resumen, error_message
            FROM cron_ejecuciones
            WHERE comando = ?
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(command)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CronRun {
                    id: row.try_get("id")?,
                    comando: row.try_get("comando")?,
                    estado: row.try_get("estado")?,
                    started_at: row.try_get("started_at")?,
                    finished_at: row.try_get("finished_at")?,
                    resumen: row.try_get("resumen")?,
                    error_message: row.try_get("error_message")?,
                })
            })
            .collect()
    }

    /// Runs left in `running` by a crashed process are marked failed
    pub(super) async fn cleanup_stuck_runs(&self, hours: i64) -> Result<u32> {
        let now = Utc::now();
        let cutoff = now - Duration::hours(hours);

        let rows = sqlx::query(
            r#"
            SELECT id, comando, started_at FROM cron_ejecuciones
            WHERE estado = ? AND started_at < ?
            ORDER BY started_at ASC
            "#,
        )
        .bind(RUN_RUNNING)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            debug!("No stuck cron runs found");
            return Ok(0);
        }

        let mut cleaned = 0u32;
        for row in &rows {
            let id: String = row.try_get("id")?;
            let command: String = row.try_get("comando")?;
            let started_at: DateTime<Utc> = row.try_get("started_at")?;

            warn!("Cleaning up stuck run {} of {} started at {}", id, command, started_at);

            let result = self
                .finish_run(
                    &id,
                    RUN_FAILED,
                    None,
                    Some("Marked as failed during startup cleanup: run was stuck in running state"),
                    now,
                )
                .await;

            match result {
                Ok(()) => cleaned += 1,
                Err(e) => error!("Failed to cleanup run {}: {}", id, e),
            }
        }

        Ok(cleaned)
    }

    /// Take the command lock unless a live one is held by someone else.
    /// Expired locks are taken over.
    pub async fn try_acquire_lock(
        &self,
        command: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO cron_bloqueos (comando, owner, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(comando) DO UPDATE SET
                owner = excluded.owner,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE cron_bloqueos.expires_at < excluded.acquired_at
            "#,
        )
        .bind(command)
        .bind(owner)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        let acquired = result.rows_affected() == 1;
        if acquired {
            debug!("Lock for {} acquired by {}", command, owner);
        } else {
            info!("Lock for {} is held by another run", command);
        }
        Ok(acquired)
    }

    pub async fn release_lock(&self, command: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cron_bloqueos WHERE comando = ? AND owner = ?")
            .bind(command)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() == 1)
    }
}
