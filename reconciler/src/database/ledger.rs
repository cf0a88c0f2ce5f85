//! Failure ledger: `fallos_reporte`, `ultimo_error_reporte`, `congelada_at`
//! and `reportada_at` on reservations and mensualidades.
//!
//! The increment is one `UPDATE ... RETURNING` statement guarded by the
//! expected status and by `fallos_reporte < threshold`, so concurrent
//! writers can neither lose an increment nor push a frozen entity past the
//! threshold. Ledger statements address rows by id and include deleted
//! rows (canceled reservations awaiting acknowledgment are soft-deleted).

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, warn};

use super::records::{EntityKind, FrozenEntity, LedgerState};
use super::Database;
use crate::constants;
use crate::errors::DatabaseError;

fn truncate_error(message: &str) -> String {
    message
        .chars()
        .take(constants::ledger::MAX_ERROR_MESSAGE_CHARS)
        .collect()
}

impl Database {
    /// Count one failed processing attempt. Returns `None` when the row is
    /// not in `expected_status` anymore or is already frozen.
    pub async fn record_failure(
        &self,
        kind: EntityKind,
        id: i64,
        expected_status: &str,
        error_message: &str,
        threshold: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<LedgerState>> {
        let sql = format!(
            r#"
            UPDATE {}
            SET fallos_reporte = fallos_reporte + 1,
                ultimo_error_reporte = ?,
                congelada_at = CASE WHEN fallos_reporte + 1 >= ? THEN ? ELSE congelada_at END,
                reportada_at = CASE WHEN fallos_reporte + 1 >= ? THEN NULL ELSE reportada_at END,
                updated_at = ?
            WHERE id = ? AND estado = ? AND fallos_reporte < ?
            RETURNING fallos_reporte
            "#,
            kind.table()
        );

        let row = sqlx::query(&sql)
            .bind(truncate_error(error_message))
            .bind(threshold)
            .bind(now)
            .bind(threshold)
            .bind(now)
            .bind(id)
            .bind(expected_status)
            .bind(threshold)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            debug!("Ledger not updated for {} {}: status changed or frozen", kind, id);
            return Ok(None);
        };

        let failures: i64 = row.try_get("fallos_reporte")?;
        let state = LedgerState {
            failures,
            frozen: failures >= threshold,
        };

        if state.frozen {
            warn!(
                "{} {} frozen after {} consecutive failures: {}",
                kind, id, failures, error_message
            );
        }

        Ok(Some(state))
    }

    /// The gateway answered without settling the payment: the failure streak
    /// ends. Frozen rows stay frozen until a manual reset.
    pub async fn clear_failures(
        &self,
        kind: EntityKind,
        id: i64,
        expected_status: &str,
        threshold: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE {}
            SET fallos_reporte = 0, ultimo_error_reporte = NULL, updated_at = ?
            WHERE id = ? AND estado = ? AND fallos_reporte > 0 AND fallos_reporte < ?
            "#,
            kind.table()
        );

        let result = sqlx::query(&sql)
            .bind(now)
            .bind(id)
            .bind(expected_status)
            .bind(threshold)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            debug!("Failure streak of {} {} cleared", kind, id);
        }
        Ok(result.rows_affected() == 1)
    }

    /// Manual unfreeze. Clears the counter, the last error and the freeze
    /// and report stamps.
    pub async fn reset_ledger(&self, kind: EntityKind, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE {}
            SET fallos_reporte = 0, ultimo_error_reporte = NULL, congelada_at = NULL,
                reportada_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
            kind.table()
        );

        let result = sqlx::query(&sql)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                query: format!("reset ledger of {} {}", kind, id),
                reason: e.to_string(),
            })?;

        Ok(result.rows_affected() == 1)
    }

    /// Frozen entities no failure report has listed yet. Includes deleted rows.
    pub async fn frozen_unreported(
        &self,
        kind: EntityKind,
        threshold: i64,
    ) -> Result<Vec<FrozenEntity>> {
        let sql = format!(
            r#"
            SELECT id, codigo, fallos_reporte, ultimo_error_reporte, congelada_at
            FROM {}
            WHERE fallos_reporte >= ?
              AND congelada_at IS NOT NULL
              AND reportada_at IS NULL
            ORDER BY congelada_at ASC, id ASC
            "#,
            kind.table()
        );

        let rows = sqlx::query(&sql)
            .bind(threshold)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(FrozenEntity {
                    id: row.try_get("id")?,
                    codigo: row.try_get("codigo")?,
                    fallos_reporte: row.try_get("fallos_reporte")?,
                    ultimo_error_reporte: row.try_get("ultimo_error_reporte")?,
                    congelada_at: row.try_get("congelada_at")?,
                })
            })
            .collect()
    }
}
