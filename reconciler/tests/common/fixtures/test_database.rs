//! Test database utilities: the real `Database` schema on in-memory or
//! temporary-file SQLite, plus seeding helpers.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use reconciler::database::{NewMensualidad, NewNovedad, NewPayment, NewReservation};
use reconciler::Database;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use super::test_data::{emails, spaces};

static CODE_SEQ: AtomicU32 = AtomicU32::new(1);

fn next_code(prefix: &str) -> String {
    format!("{}-{:05}", prefix, CODE_SEQ.fetch_add(1, Ordering::SeqCst))
}

pub struct TestDatabase {
    pub db: Arc<Database>,
    _dir: Option<TempDir>,
}

impl TestDatabase {
    /// Single-connection in-memory database
    pub async fn new() -> Self {
        let db = Database::new_in_memory()
            .await
            .expect("Failed to create in-memory database");
        Self {
            db: Arc::new(db),
            _dir: None,
        }
    }

    /// File-backed database with a real connection pool, for concurrency tests
    pub async fn on_disk() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("reservas.db");
        let db = Database::new(path.to_str().expect("utf-8 temp path"))
            .await
            .expect("Failed to create file database");
        Self {
            db: Arc::new(db),
            _dir: Some(dir),
        }
    }

    /// Pending reservation; with a ticket it also gets a pending payment.
    /// Returns (reservation id, payment id).
    pub async fn pending_reservation(
        &self,
        created_at: DateTime<Utc>,
        ticket: Option<&str>,
    ) -> (i64, Option<i64>) {
        let reservation_id = self
            .db
            .insert_reservation(&NewReservation {
                codigo: next_code("RES"),
                fecha: NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
                hora_inicio: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                hora_fin: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
                usuario_id: 10,
                usuario_email: emails::CLIENT.to_string(),
                espacio_id: spaces::COURT_1,
                valor_total: 80_000,
                referencia_pago: ticket.map(str::to_string),
                created_at,
            })
            .await
            .expect("Failed to insert reservation");

        let payment_id = match ticket {
            Some(ticket) => Some(
                self.db
                    .insert_payment(&NewPayment {
                        reserva_id: Some(reservation_id),
                        mensualidad_id: None,
                        ticket_id: ticket.to_string(),
                        valor: 80_000,
                        created_at,
                    })
                    .await
                    .expect("Failed to insert payment"),
            ),
            None => None,
        };

        (reservation_id, payment_id)
    }

    /// Pending mensualidad with a pending payment. Returns (mensualidad id, payment id).
    pub async fn pending_mensualidad(&self, created_at: DateTime<Utc>, ticket: &str) -> (i64, i64) {
        let mensualidad_id = self
            .db
            .insert_mensualidad(&NewMensualidad {
                codigo: next_code("MEN"),
                usuario_id: 11,
                usuario_email: emails::CLIENT.to_string(),
                espacio_id: spaces::COURT_2,
                periodo_inicio: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                periodo_fin: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
                valor: 300_000,
                referencia_pago: Some(ticket.to_string()),
                created_at,
            })
            .await
            .expect("Failed to insert mensualidad");

        let payment_id = self
            .db
            .insert_payment(&NewPayment {
                reserva_id: None,
                mensualidad_id: Some(mensualidad_id),
                ticket_id: ticket.to_string(),
                valor: 300_000,
                created_at,
            })
            .await
            .expect("Failed to insert payment");

        (mensualidad_id, payment_id)
    }

    pub async fn novedad(
        &self,
        espacio_id: i64,
        fecha_inicio: &str,
        fecha_fin: &str,
        hours: Option<(&str, &str)>,
    ) -> i64 {
        let parse_time = |t: &str| NaiveTime::parse_from_str(t, "%H:%M").unwrap();
        self.db
            .insert_novedad(
                &NewNovedad {
                    espacio_id,
                    fecha_inicio: fecha_inicio.parse().unwrap(),
                    fecha_fin: fecha_fin.parse().unwrap(),
                    hora_inicio: hours.map(|(start, _)| parse_time(start)),
                    hora_fin: hours.map(|(_, end)| parse_time(end)),
                    descripcion: "Mantenimiento de cancha".to_string(),
                },
                Utc::now(),
            )
            .await
            .expect("Failed to insert novedad")
    }

    /// Admin-side soft delete of a novedad
    pub async fn delete_novedad(&self, id: i64) {
        sqlx::query("UPDATE novedades SET deleted_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.db.pool())
            .await
            .expect("Failed to delete novedad");
    }

    /// Put an entity's ledger directly at `failures`
    pub async fn set_ledger(&self, table: &str, id: i64, failures: i64, frozen_at: Option<DateTime<Utc>>) {
        sqlx::query(&format!(
            "UPDATE {} SET fallos_reporte = ?, ultimo_error_reporte = ?, congelada_at = ? WHERE id = ?",
            table
        ))
        .bind(failures)
        .bind("Gateway returned HTTP 503 for ticket X")
        .bind(frozen_at)
        .bind(id)
        .execute(self.db.pool())
        .await
        .expect("Failed to set ledger");
    }

    /// Edit a novedad's hours the way the admin screens do, without
    /// validation
    pub async fn set_novedad_hours(&self, id: i64, start: &str, end: &str) {
        let parse_time = |t: &str| NaiveTime::parse_from_str(t, "%H:%M").unwrap();
        sqlx::query("UPDATE novedades SET hora_inicio = ?, hora_fin = ? WHERE id = ?")
            .bind(parse_time(start))
            .bind(parse_time(end))
            .bind(id)
            .execute(self.db.pool())
            .await
            .expect("Failed to update novedad");
    }

    /// Store a raw column value the engine cannot decode
    pub async fn corrupt_column(&self, table: &str, id: i64, column: &str, raw: &str) {
        sqlx::query(&format!("UPDATE {} SET {} = ? WHERE id = ?", table, column))
            .bind(raw)
            .bind(id)
            .execute(self.db.pool())
            .await
            .expect("Failed to corrupt column");
    }

    /// Make every UPDATE of one row fail
    pub async fn reject_updates(&self, table: &str, id: i64) {
        sqlx::query(&format!(
            "CREATE TRIGGER rechazar_{table}_{id} BEFORE UPDATE ON {table} \
             WHEN OLD.id = {id} BEGIN SELECT RAISE(ABORT, 'fila bloqueada'); END"
        ))
        .execute(self.db.pool())
        .await
        .expect("Failed to create trigger");
    }
}
