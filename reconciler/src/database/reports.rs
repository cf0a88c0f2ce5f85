//! Failure report runs. A report stamps `reportada_at` on every entity it
//! listed in the same transaction that records the send, so an entity frozen
//! while a report is being built is picked up by the next one.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::records::{EntityKind, FrozenEntity};
use super::Database;

impl Database {
    pub async fn last_report_sent_at(&self) -> Result<Option<DateTime<Utc>>> {
        let sent_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(enviado_at) FROM reportes_fallos")
                .fetch_one(&self.pool)
                .await?;
        Ok(sent_at)
    }

    pub async fn record_report_sent(
        &self,
        sent_at: DateTime<Utc>,
        reservas: &[FrozenEntity],
        mensualidades: &[FrozenEntity],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO reportes_fallos (enviado_at, reservas, mensualidades) VALUES (?, ?, ?)",
        )
        .bind(sent_at)
        .bind(reservas.len() as i64)
        .bind(mensualidades.len() as i64)
        .execute(&mut *tx)
        .await?;

        for (kind, entities) in [
            (EntityKind::Reserva, reservas),
            (EntityKind::Mensualidad, mensualidades),
        ] {
            let sql = format!(
                "UPDATE {} SET reportada_at = ? WHERE id = ? AND congelada_at IS NOT NULL AND reportada_at IS NULL",
                kind.table()
            );
            for entity in entities {
                sqlx::query(&sql)
                    .bind(sent_at)
                    .bind(entity.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
