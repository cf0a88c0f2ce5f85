//! Novedades (read-only to the engine) and the availability blocks derived
//! from them.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::records::{MalformedRow, NewNovedad, Novedad, SpaceBlock};
use super::Database;

fn novedad_from_row(row: &SqliteRow) -> Result<Novedad> {
    Ok(Novedad {
        id: row.try_get("id")?,
        espacio_id: row.try_get("espacio_id")?,
        fecha_inicio: row.try_get("fecha_inicio")?,
        fecha_fin: row.try_get("fecha_fin")?,
        hora_inicio: row.try_get("hora_inicio")?,
        hora_fin: row.try_get("hora_fin")?,
        descripcion: row.try_get("descripcion")?,
    })
}

impl Database {
    pub async fn insert_novedad(&self, novedad: &NewNovedad, now: DateTime<Utc>) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO novedades (
                espacio_id, fecha_inicio, fecha_fin, hora_inicio, hora_fin, descripcion, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(novedad.espacio_id)
        .bind(novedad.fecha_inicio)
        .bind(novedad.fecha_fin)
        .bind(novedad.hora_inicio)
        .bind(novedad.hora_fin)
        .bind(&novedad.descripcion)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Novedades whose date range intersects `[from, to]`. Each row is
    /// decoded on its own; a row that cannot be decoded comes back as a
    /// `MalformedRow` in its place.
    pub async fn find_novedades_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Result<Novedad, MalformedRow>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, espacio_id, fecha_inicio, fecha_fin, hora_inicio, hora_fin, descripcion
            FROM novedades
            WHERE deleted_at IS NULL
              AND fecha_inicio <= ?
              AND fecha_fin >= ?
            ORDER BY fecha_inicio ASC, id ASC
            "#,
        )
        .bind(to)
        .bind(from)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                novedad_from_row(row).map_err(|e| MalformedRow {
                    id: row.try_get("id").unwrap_or_default(),
                    reason: e.to_string(),
                })
            })
            .collect())
    }

    /// Replace the blocks of one novedad inside `[window_start, window_end]`
    /// with `blocks`: upserts the given days and drops days of that window
    /// that no longer belong to the novedad.
    pub async fn replace_novedad_blocks(
        &self,
        novedad_id: i64,
        window_start: NaiveDate,
        window_end: NaiveDate,
        blocks: &[SpaceBlock],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM bloqueos_espacio WHERE novedad_id = ? AND fecha >= ? AND fecha <= ?",
        )
        .bind(novedad_id)
        .bind(window_start)
        .bind(window_end)
        .execute(&mut *tx)
        .await?;

        for block in blocks {
            sqlx::query(
                r#"
                INSERT INTO bloqueos_espacio (
                    novedad_id, espacio_id, fecha, hora_inicio, hora_fin, descripcion, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(novedad_id, fecha) DO UPDATE SET
                    espacio_id = excluded.espacio_id,
                    hora_inicio = excluded.hora_inicio,
                    hora_fin = excluded.hora_fin,
                    descripcion = excluded.descripcion,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(block.novedad_id)
            .bind(block.espacio_id)
            .bind(block.fecha)
            .bind(block.hora_inicio)
            .bind(block.hora_fin)
            .bind(&block.descripcion)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(blocks.len())
    }

    /// Drop blocks dated before `today` and blocks whose novedad is gone
    pub async fn prune_space_blocks(&self, today: NaiveDate) -> Result<u64> {
        let expired = sqlx::query("DELETE FROM bloqueos_espacio WHERE fecha < ?")
            .bind(today)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let orphaned = sqlx::query(
            r#"
            DELETE FROM bloqueos_espacio
            WHERE novedad_id NOT IN (SELECT id FROM novedades WHERE deleted_at IS NULL)
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(expired + orphaned)
    }

    pub async fn space_blocks(&self, espacio_id: i64) -> Result<Vec<SpaceBlock>> {
        let rows = sqlx::query(
            r#"
            SELECT novedad_id, espacio_id, fecha, hora_inicio, hora_fin, descripcion
            FROM bloqueos_espacio
            WHERE espacio_id = ?
            ORDER BY fecha ASC, novedad_id ASC
            "#,
        )
        .bind(espacio_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SpaceBlock {
                    novedad_id: row.try_get("novedad_id")?,
                    espacio_id: row.try_get("espacio_id")?,
                    fecha: row.try_get("fecha")?,
                    hora_inicio: row.try_get("hora_inicio")?,
                    hora_fin: row.try_get("hora_fin")?,
                    descripcion: row.try_get("descripcion")?,
                })
            })
            .collect()
    }
}
