//! Reservation queries and conditional state transitions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, error};

use super::records::{
    EntityKind, NewReservation, PaymentStatus, PendingPayment, QueuedCancellation, Reservation,
    ReservationStatus, StaleReservation,
};
use super::Database;

const RESERVATION_COLUMNS: &str = "id, codigo, estado, fecha, hora_inicio, hora_fin, usuario_id, \
     usuario_email, espacio_id, valor_total, referencia_pago, fallos_reporte, ultimo_error_reporte, \
     congelada_at, motivo_cancelacion, cancelacion_notificada_at, created_at, updated_at, deleted_at";

fn reservation_from_row(row: &SqliteRow) -> Result<Reservation> {
    let estado: String = row.try_get("estado")?;
    Ok(Reservation {
        id: row.try_get("id")?,
        codigo: row.try_get("codigo")?,
        estado: estado.parse()?,
        fecha: row.try_get("fecha")?,
        hora_inicio: row.try_get("hora_inicio")?,
        hora_fin: row.try_get("hora_fin")?,
        usuario_id: row.try_get("usuario_id")?,
        usuario_email: row.try_get("usuario_email")?,
        espacio_id: row.try_get("espacio_id")?,
        valor_total: row.try_get("valor_total")?,
        referencia_pago: row.try_get("referencia_pago")?,
        fallos_reporte: row.try_get("fallos_reporte")?,
        ultimo_error_reporte: row.try_get("ultimo_error_reporte")?,
        congelada_at: row.try_get("congelada_at")?,
        motivo_cancelacion: row.try_get("motivo_cancelacion")?,
        cancelacion_notificada_at: row.try_get("cancelacion_notificada_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// Outcome of cancelling a pending reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Canceled; the gateway still has to be told (a ticket exists)
    CanceledNotifyPending,
    /// Canceled; nothing to tell the gateway
    Canceled,
    /// The reservation was no longer pending (another job won, or a
    /// payment was confirmed meanwhile)
    NotPending,
}

impl Database {
    pub async fn insert_reservation(&self, reservation: &NewReservation) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO reservas (
                codigo, estado, fecha, hora_inicio, hora_fin, usuario_id, usuario_email,
                espacio_id, valor_total, referencia_pago, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&reservation.codigo)
        .bind(ReservationStatus::PendingPayment.as_str())
        .bind(reservation.fecha)
        .bind(reservation.hora_inicio)
        .bind(reservation.hora_fin)
        .bind(reservation.usuario_id)
        .bind(&reservation.usuario_email)
        .bind(reservation.espacio_id)
        .bind(reservation.valor_total)
        .bind(&reservation.referencia_pago)
        .bind(reservation.created_at)
        .bind(reservation.created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!("Inserted reservation {} ({})", id, reservation.codigo);
        Ok(id)
    }

    /// Includes deleted rows: callers inspect canceled reservations too
    pub async fn get_reservation(&self, id: i64) -> Result<Option<Reservation>> {
        let sql = format!("SELECT {} FROM reservas WHERE id = ?", RESERVATION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(reservation_from_row).transpose()
    }

    /// Pending reservations created before `cutoff` with no confirmed payment,
    /// oldest first. Only the columns the sweep needs are read, so a row the
    /// booking flow wrote with an odd date does not stall the sweep.
    pub async fn find_stale_pending_reservations(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<StaleReservation>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.codigo FROM reservas r
            WHERE r.estado = ?
              AND r.deleted_at IS NULL
              AND r.created_at < ?
              AND NOT EXISTS (
                  SELECT 1 FROM pagos p WHERE p.reserva_id = r.id AND p.estado = ?
              )
            ORDER BY r.created_at ASC, r.id ASC
            LIMIT ?
            "#,
        )
        .bind(ReservationStatus::PendingPayment.as_str())
        .bind(cutoff)
        .bind(PaymentStatus::Confirmed.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let decoded = (|| -> Result<StaleReservation> {
                    Ok(StaleReservation {
                        id: row.try_get("id")?,
                        codigo: row.try_get("codigo")?,
                    })
                })();
                decoded
                    .map_err(|e| error!("Skipping undecodable stale reservation row: {}", e))
                    .ok()
            })
            .collect())
    }

    /// Cancel a pending reservation that never got paid. Pending payments of
    /// the reservation expire with it. Frozen ledgers are kept so the entity
    /// still shows up in the failure report.
    pub async fn cancel_unpaid_reservation(
        &self,
        id: i64,
        reason: &str,
        threshold: i64,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await?;

        let outcome = cancel_pending_reservation(&mut tx, id, reason, threshold, now).await?;
        if outcome == CancelOutcome::NotPending {
            tx.rollback().await?;
            return Ok(outcome);
        }

        sqlx::query(
            "UPDATE pagos SET estado = ?, updated_at = ? WHERE reserva_id = ? AND estado = ?",
        )
        .bind(PaymentStatus::Expired.as_str())
        .bind(now)
        .bind(id)
        .bind(PaymentStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    /// Pending reservations whose pending payment carries a ticket and whose
    /// ledger is below `threshold`, oldest reservation first.
    pub async fn find_pending_reservation_payments(
        &self,
        threshold: i64,
        limit: i64,
    ) -> Result<Vec<PendingPayment>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id AS entity_id, r.codigo, r.usuario_email, r.created_at AS entity_created_at,
                   p.id AS payment_id, p.ticket_id, p.valor
            FROM reservas r
            JOIN pagos p ON p.reserva_id = r.id
            WHERE r.estado = ?
              AND r.deleted_at IS NULL
              AND r.fallos_reporte < ?
              AND p.estado = ?
              AND p.ticket_id <> ''
            ORDER BY r.created_at ASC, r.id ASC, p.id DESC
            LIMIT ?
            "#,
        )
        .bind(ReservationStatus::PendingPayment.as_str())
        .bind(threshold)
        .bind(PaymentStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_pending_payments(&rows, EntityKind::Reserva))
    }

    /// Confirm the payment and the reservation in one transaction.
    /// Returns false (and changes nothing) if the reservation is no longer
    /// pending or the payment is no longer pending.
    pub async fn confirm_reservation_payment(
        &self,
        reservation_id: i64,
        payment_id: i64,
        bank_timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let reservation = sqlx::query(
            r#"
            UPDATE reservas
            SET estado = ?, fallos_reporte = 0, ultimo_error_reporte = NULL,
                congelada_at = NULL, updated_at = ?
            WHERE id = ? AND estado = ? AND deleted_at IS NULL
            "#,
        )
        .bind(ReservationStatus::Confirmed.as_str())
        .bind(now)
        .bind(reservation_id)
        .bind(ReservationStatus::PendingPayment.as_str())
        .execute(&mut *tx)
        .await?;

        if reservation.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let payment = sqlx::query(
            r#"
            UPDATE pagos SET estado = ?, fecha_banco = ?, updated_at = ?
            WHERE id = ? AND reserva_id = ? AND estado = ?
            "#,
        )
        .bind(PaymentStatus::Confirmed.as_str())
        .bind(bank_timestamp.unwrap_or(now))
        .bind(now)
        .bind(payment_id)
        .bind(reservation_id)
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

    /// Cancel the reservation because the gateway rejected or expired its
    /// payment; the payment takes `payment_status`.
    pub async fn cancel_reservation_for_payment(
        &self,
        reservation_id: i64,
        payment_id: i64,
        payment_status: PaymentStatus,
        reason: &str,
        threshold: i64,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await?;

        let outcome =
            cancel_pending_reservation(&mut tx, reservation_id, reason, threshold, now).await?;
        if outcome == CancelOutcome::NotPending {
            tx.rollback().await?;
            return Ok(outcome);
        }

        sqlx::query(
            "UPDATE pagos SET estado = ?, updated_at = ? WHERE id = ? AND reserva_id = ? AND estado = ?",
        )
        .bind(payment_status.as_str())
        .bind(now)
        .bind(payment_id)
        .bind(reservation_id)
        .bind(PaymentStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    /// Canceled reservations whose cancellation the gateway has not
    /// acknowledged yet, oldest cancellation first. Includes deleted rows:
    /// canceled reservations are always soft-deleted.
    pub async fn find_unacknowledged_cancellations(
        &self,
        threshold: i64,
        limit: i64,
    ) -> Result<Vec<QueuedCancellation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, codigo, referencia_pago FROM reservas
            WHERE estado = ?
              AND cancelacion_notificada_at IS NULL
              AND referencia_pago IS NOT NULL
              AND referencia_pago <> ''
              AND fallos_reporte < ?
            ORDER BY deleted_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(ReservationStatus::Canceled.as_str())
        .bind(threshold)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let decoded = (|| -> Result<QueuedCancellation> {
                    Ok(QueuedCancellation {
                        id: row.try_get("id")?,
                        codigo: row.try_get("codigo")?,
                        ticket: row.try_get("referencia_pago")?,
                    })
                })();
                decoded
                    .map_err(|e| error!("Skipping undecodable canceled reservation row: {}", e))
                    .ok()
            })
            .collect())
    }

    /// Stamp the remote acknowledgment and reset the ledger. Includes deleted rows.
    pub async fn acknowledge_cancellation(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservas
            SET cancelacion_notificada_at = ?, fallos_reporte = 0,
                ultimo_error_reporte = NULL, congelada_at = NULL, updated_at = ?
            WHERE id = ? AND estado = ? AND cancelacion_notificada_at IS NULL
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(ReservationStatus::Canceled.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// The conditional transition shared by the reaper and the reconciler.
/// Soft-deletes the row; when there is no ticket the cancellation is
/// acknowledged on the spot.
async fn cancel_pending_reservation(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
    reason: &str,
    threshold: i64,
    now: DateTime<Utc>,
) -> Result<CancelOutcome> {
    let row = sqlx::query(
        r#"
        UPDATE reservas
        SET estado = ?,
            deleted_at = ?,
            motivo_cancelacion = ?,
            cancelacion_notificada_at = CASE
                WHEN referencia_pago IS NULL OR referencia_pago = '' THEN ?
                ELSE NULL
            END,
            fallos_reporte = CASE WHEN fallos_reporte >= ? THEN fallos_reporte ELSE 0 END,
            ultimo_error_reporte = CASE WHEN fallos_reporte >= ? THEN ultimo_error_reporte ELSE NULL END,
            updated_at = ?
        WHERE id = ?
          AND estado = ?
          AND deleted_at IS NULL
          AND NOT EXISTS (
              SELECT 1 FROM pagos p WHERE p.reserva_id = reservas.id AND p.estado = ?
          )
        RETURNING cancelacion_notificada_at
        "#,
    )
    .bind(ReservationStatus::Canceled.as_str())
    .bind(now)
    .bind(reason)
    .bind(now)
    .bind(threshold)
    .bind(threshold)
    .bind(now)
    .bind(id)
    .bind(ReservationStatus::PendingPayment.as_str())
    .bind(PaymentStatus::Confirmed.as_str())
    .fetch_optional(&mut **tx)
    .await?;

    let Some(row) = row else {
        return Ok(CancelOutcome::NotPending);
    };

    let acknowledged: Option<DateTime<Utc>> = row.try_get("cancelacion_notificada_at")?;
    Ok(if acknowledged.is_some() {
        CancelOutcome::Canceled
    } else {
        CancelOutcome::CanceledNotifyPending
    })
}

/// Decode candidate rows one by one; an undecodable row is logged and left
/// out instead of failing the whole batch
pub(super) fn decode_pending_payments(rows: &[SqliteRow], kind: EntityKind) -> Vec<PendingPayment> {
    rows.iter()
        .filter_map(|row| match pending_payment_from_row(row, kind) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                let id: i64 = row.try_get("entity_id").unwrap_or_default();
                error!("Skipping undecodable pending payment of {} {}: {}", kind, id, e);
                None
            }
        })
        .collect()
}

fn pending_payment_from_row(row: &SqliteRow, kind: EntityKind) -> Result<PendingPayment> {
    Ok(PendingPayment {
        kind,
        entity_id: row.try_get("entity_id")?,
        codigo: row.try_get("codigo")?,
        usuario_email: row.try_get("usuario_email")?,
        payment_id: row.try_get("payment_id")?,
        ticket_id: row.try_get("ticket_id")?,
        valor: row.try_get("valor")?,
        entity_created_at: row.try_get("entity_created_at")?,
    })
}
