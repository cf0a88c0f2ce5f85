//! Mensualidad queries and conditional state transitions. Same discipline
//! as reservations: every transition is guarded by the expected status.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::records::{
    EntityKind, Mensualidad, MensualidadStatus, NewMensualidad, PaymentStatus, PendingPayment,
};
use super::reservations::decode_pending_payments;
use super::Database;

fn mensualidad_from_row(row: &SqliteRow) -> Result<Mensualidad> {
    let estado: String = row.try_get("estado")?;
    Ok(Mensualidad {
        id: row.try_get("id")?,
        codigo: row.try_get("codigo")?,
        usuario_id: row.try_get("usuario_id")?,
        usuario_email: row.try_get("usuario_email")?,
        espacio_id: row.try_get("espacio_id")?,
        periodo_inicio: row.try_get("periodo_inicio")?,
        periodo_fin: row.try_get("periodo_fin")?,
        valor: row.try_get("valor")?,
        estado: estado.parse()?,
        referencia_pago: row.try_get("referencia_pago")?,
        fallos_reporte: row.try_get("fallos_reporte")?,
        ultimo_error_reporte: row.try_get("ultimo_error_reporte")?,
        congelada_at: row.try_get("congelada_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

impl Database {
    pub async fn insert_mensualidad(&self, mensualidad: &NewMensualidad) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO mensualidades (
                codigo, usuario_id, usuario_email, espacio_id, periodo_inicio, periodo_fin,
                valor, estado, referencia_pago, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&mensualidad.codigo)
        .bind(mensualidad.usuario_id)
        .bind(&mensualidad.usuario_email)
        .bind(mensualidad.espacio_id)
        .bind(mensualidad.periodo_inicio)
        .bind(mensualidad.periodo_fin)
        .bind(mensualidad.valor)
        .bind(MensualidadStatus::PendingPayment.as_str())
        .bind(&mensualidad.referencia_pago)
        .bind(mensualidad.created_at)
        .bind(mensualidad.created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Includes deleted rows
    pub async fn get_mensualidad(&self, id: i64) -> Result<Option<Mensualidad>> {
        let row = sqlx::query(
            r#"
            SELECT id, codigo, usuario_id, usuario_email, espacio_id, periodo_inicio, periodo_fin,
                   valor, estado, referencia_pago, fallos_reporte, ultimo_error_reporte,
                   congelada_at, created_at, updated_at, deleted_at
            FROM mensualidades WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(mensualidad_from_row).transpose()
    }

    pub async fn find_pending_mensualidad_payments(
        &self,
        threshold: i64,
        limit: i64,
    ) -> Result<Vec<PendingPayment>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id AS entity_id, m.codigo, m.usuario_email, m.created_at AS entity_created_at,
                   p.id AS payment_id, p.ticket_id, p.valor
            FROM mensualidades m
            JOIN pagos p ON p.mensualidad_id = m.id
            WHERE m.estado = ?
              AND m.deleted_at IS NULL
              AND m.fallos_reporte < ?
              AND p.estado = ?
              AND p.ticket_id <> ''
            ORDER BY m.created_at ASC, m.id ASC, p.id DESC
            LIMIT ?
            "#,
        )
        .bind(MensualidadStatus::PendingPayment.as_str())
        .bind(threshold)
        .bind(PaymentStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_pending_payments(&rows, EntityKind::Mensualidad))
    }

    pub async fn confirm_mensualidad_payment(
        &self,
        mensualidad_id: i64,
        payment_id: i64,
        bank_timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let mensualidad = sqlx::query(
            r#"
            UPDATE mensualidades
            SET estado = ?, fallos_reporte = 0, ultimo_error_reporte = NULL,
                congelada_at = NULL, updated_at = ?
            WHERE id = ? AND estado = ? AND deleted_at IS NULL
            "#,
        )
        .bind(MensualidadStatus::Paid.as_str())
        .bind(now)
        .bind(mensualidad_id)
        .bind(MensualidadStatus::PendingPayment.as_str())
        .execute(&mut *tx)
        .await?;

        if mensualidad.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let payment = sqlx::query(
            r#"
            UPDATE pagos SET estado = ?, fecha_banco = ?, updated_at = ?
            WHERE id = ? AND mensualidad_id = ? AND estado = ?
            "#,
        )
        .bind(PaymentStatus::Confirmed.as_str())
        .bind(bank_timestamp.unwrap_or(now))
        .bind(now)
        .bind(payment_id)
        .bind(mensualidad_id)
        .bind(PaymentStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        if payment.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Cancel (soft delete) a pending mensualidad whose payment failed.
    pub async fn cancel_mensualidad_for_payment(
        &self,
        mensualidad_id: i64,
        payment_id: i64,
        payment_status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let mensualidad = sqlx::query(
            r#"
            UPDATE mensualidades
            SET estado = ?, deleted_at = ?, fallos_reporte = 0,
                ultimo_error_reporte = NULL, congelada_at = NULL, updated_at = ?
            WHERE id = ? AND estado = ? AND deleted_at IS NULL
            "#,
        )
        .bind(MensualidadStatus::Canceled.as_str())
        .bind(now)
        .bind(now)
        .bind(mensualidad_id)
        .bind(MensualidadStatus::PendingPayment.as_str())
        .execute(&mut *tx)
        .await?;

        if mensualidad.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE pagos SET estado = ?, updated_at = ? WHERE id = ? AND mensualidad_id = ? AND estado = ?",
        )
        .bind(payment_status.as_str())
        .bind(now)
        .bind(payment_id)
        .bind(mensualidad_id)
        .bind(PaymentStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}
