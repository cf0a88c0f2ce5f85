//! Database layer for the reconciliation engine.
//!
//! This module provides SQLite persistence for:
//! - Reservations, payments and mensualidades (shared with the booking flow)
//! - Novedades and the availability blocks derived from them
//! - The failure ledger and failure report runs (`reportada_at` marks the
//!   frozen entities a report already listed)
//! - Cron run audit records and cross-process cron locks
//!
//! Soft delete: every query here filters `deleted_at IS NULL` unless its doc
//! comment says it includes deleted rows.
//!
//! State transitions are single conditional updates (`WHERE id = ? AND
//! estado = ?`), so two jobs racing on the same row produce exactly one
//! winner without explicit locking.

mod cron_runs;
mod ledger;
mod mensualidades;
mod novedades;
mod payments;
mod reports;
mod reservations;
mod records;

pub use cron_runs::{RUN_COMPLETED, RUN_FAILED, RUN_RUNNING, RUN_SKIPPED};
pub use records::*;
pub use reservations::CancelOutcome;

use crate::constants;
use crate::errors::DatabaseError;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::{error, info, warn};

pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Expose pool for integration test queries
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn new(database_path: &str) -> Result<Self> {
        info!("Opening database at {}", database_path);

        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("Failed to create parent directory {:?}: {}", parent, e);
                    return Err(e.into());
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", database_path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(constants::database::BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(constants::database::MAX_CONNECTIONS)
            .acquire_timeout(constants::database::ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: format!("{}: {}", database_path, e),
            })?;

        let database = Self { pool };
        database.initialize().await?;
        Ok(database)
    }

    /// Single-connection in-memory database (every connection to
    /// `sqlite::memory:` is a separate database)
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(constants::database::ACQUIRE_TIMEOUT)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        let database = Self { pool };
        database.initialize().await?;
        Ok(database)
    }

    async fn initialize(&self) -> Result<()> {
        if let Err(e) = self.initialize_tables().await {
            error!("Database table initialization failed: {}", e);
            return Err(e);
        }

        match self
            .cleanup_stuck_runs(constants::database::STUCK_RUN_HOURS)
            .await
        {
            Ok(0) => {}
            Ok(cleaned) => warn!("Marked {} stuck cron runs as failed on startup", cleaned),
            Err(e) => {
                // Not fatal: the audit table does not gate job execution
                error!("Failed to cleanup stuck cron runs: {}", e);
            }
        }

        info!("Database initialized");
        Ok(())
    }

    async fn initialize_tables(&self) -> Result<()> {
        let statements: [(&str, &str); 14] = [
            (
                "reservas",
                r#"
                CREATE TABLE IF NOT EXISTS reservas (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    codigo TEXT UNIQUE NOT NULL,
                    estado TEXT NOT NULL,
                    fecha TEXT NOT NULL,
                    hora_inicio TEXT NOT NULL,
                    hora_fin TEXT NOT NULL,
                    usuario_id INTEGER NOT NULL,
                    usuario_email TEXT NOT NULL,
                    espacio_id INTEGER NOT NULL,
                    valor_total INTEGER NOT NULL,
                    referencia_pago TEXT,
                    fallos_reporte INTEGER NOT NULL DEFAULT 0,
                    ultimo_error_reporte TEXT,
                    congelada_at DATETIME,
                    reportada_at DATETIME,
                    motivo_cancelacion TEXT,
                    cancelacion_notificada_at DATETIME,
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL,
                    deleted_at DATETIME
                )
                "#,
            ),
            (
                "idx_reservas_estado",
                "CREATE INDEX IF NOT EXISTS idx_reservas_estado ON reservas(estado, created_at)",
            ),
            (
                "mensualidades",
                r#"
                CREATE TABLE IF NOT EXISTS mensualidades (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    codigo TEXT UNIQUE NOT NULL,
                    usuario_id INTEGER NOT NULL,
                    usuario_email TEXT NOT NULL,
                    espacio_id INTEGER NOT NULL,
                    periodo_inicio TEXT NOT NULL,
                    periodo_fin TEXT NOT NULL,
                    valor INTEGER NOT NULL,
                    estado TEXT NOT NULL,
                    referencia_pago TEXT,
                    fallos_reporte INTEGER NOT NULL DEFAULT 0,
                    ultimo_error_reporte TEXT,
                    congelada_at DATETIME,
                    reportada_at DATETIME,
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL,
                    deleted_at DATETIME
                )
                "#,
            ),
            (
                "idx_mensualidades_estado",
                "CREATE INDEX IF NOT EXISTS idx_mensualidades_estado ON mensualidades(estado, created_at)",
            ),
            (
                "pagos",
                r#"
                CREATE TABLE IF NOT EXISTS pagos (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    reserva_id INTEGER REFERENCES reservas(id),
                    mensualidad_id INTEGER REFERENCES mensualidades(id),
                    ticket_id TEXT NOT NULL,
                    estado TEXT NOT NULL,
                    valor INTEGER NOT NULL,
                    fecha_banco DATETIME,
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL,
                    CHECK ((reserva_id IS NULL) <> (mensualidad_id IS NULL))
                )
                "#,
            ),
            (
                "idx_pagos_reserva_confirmado",
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_pagos_reserva_confirmado ON pagos(reserva_id) WHERE estado = 'confirmed' AND reserva_id IS NOT NULL",
            ),
            (
                "idx_pagos_mensualidad_confirmado",
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_pagos_mensualidad_confirmado ON pagos(mensualidad_id) WHERE estado = 'confirmed' AND mensualidad_id IS NOT NULL",
            ),
            (
                "novedades",
                r#"
                CREATE TABLE IF NOT EXISTS novedades (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    espacio_id INTEGER NOT NULL,
                    fecha_inicio TEXT NOT NULL,
                    fecha_fin TEXT NOT NULL,
                    hora_inicio TEXT,
                    hora_fin TEXT,
                    descripcion TEXT NOT NULL,
                    created_at DATETIME NOT NULL,
                    deleted_at DATETIME
                )
                "#,
            ),
            (
                "bloqueos_espacio",
                r#"
                CREATE TABLE IF NOT EXISTS bloqueos_espacio (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    novedad_id INTEGER NOT NULL,
                    espacio_id INTEGER NOT NULL,
                    fecha TEXT NOT NULL,
                    hora_inicio TEXT,
                    hora_fin TEXT,
                    descripcion TEXT NOT NULL,
                    updated_at DATETIME NOT NULL,
                    UNIQUE (novedad_id, fecha)
                )
                "#,
            ),
            (
                "idx_bloqueos_espacio_fecha",
                "CREATE INDEX IF NOT EXISTS idx_bloqueos_espacio_fecha ON bloqueos_espacio(espacio_id, fecha)",
            ),
            (
                "reportes_fallos",
                r#"
                CREATE TABLE IF NOT EXISTS reportes_fallos (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    enviado_at DATETIME NOT NULL,
                    reservas INTEGER NOT NULL,
                    mensualidades INTEGER NOT NULL
                )
                "#,
            ),
            (
                "cron_ejecuciones",
                r#"
                CREATE TABLE IF NOT EXISTS cron_ejecuciones (
                    id TEXT PRIMARY KEY,
                    comando TEXT NOT NULL,
                    estado TEXT NOT NULL,
                    started_at DATETIME NOT NULL,
                    finished_at DATETIME,
                    resumen TEXT,
                    error_message TEXT
                )
                "#,
            ),
            (
                "idx_cron_ejecuciones_comando",
                "CREATE INDEX IF NOT EXISTS idx_cron_ejecuciones_comando ON cron_ejecuciones(comando, started_at DESC)",
            ),
            (
                "cron_bloqueos",
                r#"
                CREATE TABLE IF NOT EXISTS cron_bloqueos (
                    comando TEXT PRIMARY KEY,
                    owner TEXT NOT NULL,
                    acquired_at DATETIME NOT NULL,
                    expires_at DATETIME NOT NULL
                )
                "#,
            ),
        ];

        for (name, sql) in statements {
            if let Err(e) = sqlx::query(sql).execute(&self.pool).await {
                error!("Failed to create {}: {}", name, e);
                return Err(DatabaseError::QueryFailed {
                    query: name.to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        }

        info!("Database tables and indexes ready");
        Ok(())
    }
}
