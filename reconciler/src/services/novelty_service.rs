//! `cron:procesar-novedades`: turn space novedades that are active today or
//! about to start into per-day availability blocks.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::database::{Database, Novedad, SpaceBlock};
use crate::errors::CronError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NoveltySummary {
    pub novedades: usize,
    pub blocks_written: usize,
    pub blocks_pruned: u64,
    pub invalid: usize,
    pub errors: usize,
}

impl fmt::Display for NoveltySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} novedades, {} blocks written, {} blocks pruned, {} invalid, {} errors",
            self.novedades, self.blocks_written, self.blocks_pruned, self.invalid, self.errors
        )
    }
}

/// Reject novedades the booking flow could not apply
pub fn validate_novedad(novedad: &Novedad) -> Result<(), String> {
    if novedad.fecha_fin < novedad.fecha_inicio {
        return Err(format!(
            "ends ({}) before it starts ({})",
            novedad.fecha_fin, novedad.fecha_inicio
        ));
    }

    match (novedad.hora_inicio, novedad.hora_fin) {
        (None, None) => Ok(()),
        (Some(start), Some(end)) if end > start => Ok(()),
        (Some(start), Some(end)) => Err(format!(
            "end hour {} is not after start hour {}",
            end, start
        )),
        _ => Err("only one of hora_inicio/hora_fin is set".to_string()),
    }
}

/// One block per day of the novedad that falls inside `[from, to]`
pub fn blocks_for(novedad: &Novedad, from: NaiveDate, to: NaiveDate) -> Vec<SpaceBlock> {
    let start = novedad.fecha_inicio.max(from);
    let end = novedad.fecha_fin.min(to);

    start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|fecha| SpaceBlock {
            novedad_id: novedad.id,
            espacio_id: novedad.espacio_id,
            fecha,
            hora_inicio: novedad.hora_inicio,
            hora_fin: novedad.hora_fin,
            descripcion: novedad.descripcion.clone(),
        })
        .collect()
}

#[derive(Clone)]
pub struct NoveltyService {
    config: Arc<Config>,
    database: Arc<Database>,
}

impl NoveltyService {
    pub fn new(config: Arc<Config>, database: Arc<Database>) -> Self {
        Self { config, database }
    }

    pub async fn run(&self) -> Result<NoveltySummary, CronError> {
        self.run_at(Utc::now()).await
    }

    #[instrument(skip(self), fields(command = "cron:procesar-novedades"))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<NoveltySummary, CronError> {
        let today = now.with_timezone(&self.config.tz()).date_naive();
        let horizon = today + Duration::days(self.config.novelties.lookahead_days);
        let mut summary = NoveltySummary::default();

        let novedades = self.database.find_novedades_between(today, horizon).await?;
        debug!(
            "{} novedades intersect {}..={}",
            novedades.len(),
            today,
            horizon
        );

        for entry in &novedades {
            let novedad = match entry {
                Ok(novedad) => novedad,
                Err(malformed) => {
                    summary.invalid += 1;
                    error!("Skipping undecodable novedad {}: {}", malformed.id, malformed.reason);
                    self.clear_blocks(malformed.id, today, horizon, now, &mut summary)
                        .await;
                    continue;
                }
            };

            if let Err(reason) = validate_novedad(novedad) {
                summary.invalid += 1;
                warn!("Skipping invalid novedad {}: {}", novedad.id, reason);
                self.clear_blocks(novedad.id, today, horizon, now, &mut summary)
                    .await;
                continue;
            }

            let blocks = blocks_for(novedad, today, horizon);
            match self
                .database
                .replace_novedad_blocks(novedad.id, today, horizon, &blocks, now)
                .await
            {
                Ok(written) => {
                    summary.novedades += 1;
                    summary.blocks_written += written;
                }
                Err(e) => {
                    summary.errors += 1;
                    error!("Failed to apply novedad {}: {}", novedad.id, e);
                }
            }
        }

        summary.blocks_pruned = self.database.prune_space_blocks(today).await?;
        if summary.blocks_pruned > 0 {
            info!("Pruned {} outdated space blocks", summary.blocks_pruned);
        }

        Ok(summary)
    }

    /// Drop the blocks a novedad left in the window before it stopped being
    /// usable
    async fn clear_blocks(
        &self,
        novedad_id: i64,
        today: NaiveDate,
        horizon: NaiveDate,
        now: DateTime<Utc>,
        summary: &mut NoveltySummary,
    ) {
        if let Err(e) = self
            .database
            .replace_novedad_blocks(novedad_id, today, horizon, &[], now)
            .await
        {
            summary.errors += 1;
            error!("Failed to clear blocks of novedad {}: {}", novedad_id, e);
        }
    }
}
