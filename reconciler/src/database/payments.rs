//! Payment rows. Transitions happen together with their owner entity in
//! `reservations.rs` / `mensualidades.rs`; this file only reads and inserts.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::records::{NewPayment, Payment, PaymentStatus};
use super::Database;

fn payment_from_row(row: &SqliteRow) -> Result<Payment> {
    let estado: String = row.try_get("estado")?;
    Ok(Payment {
        id: row.try_get("id")?,
        reserva_id: row.try_get("reserva_id")?,
        mensualidad_id: row.try_get("mensualidad_id")?,
        ticket_id: row.try_get("ticket_id")?,
        estado: estado.parse()?,
        valor: row.try_get("valor")?,
        fecha_banco: row.try_get("fecha_banco")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Database {
    pub async fn insert_payment(&self, payment: &NewPayment) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO pagos (
                reserva_id, mensualidad_id, ticket_id, estado, valor, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payment.reserva_id)
        .bind(payment.mensualidad_id)
        .bind(&payment.ticket_id)
        .bind(PaymentStatus::Pending.as_str())
        .bind(payment.valor)
        .bind(payment.created_at)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    pub async fn get_payment(&self, id: i64) -> Result<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, reserva_id, mensualidad_id, ticket_id, estado, valor, fecha_banco,
                   created_at, updated_at
            FROM pagos WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    pub async fn payments_for_reservation(&self, reserva_id: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, reserva_id, mensualidad_id, ticket_id, estado, valor, fecha_banco,
                   created_at, updated_at
            FROM pagos WHERE reserva_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(reserva_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payment_from_row).collect()
    }
}
