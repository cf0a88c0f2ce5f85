//! `cron:reservas-sin-pago`: cancel reservations that stayed unpaid past the
//! grace period.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::config::Config;
use crate::constants;
use crate::database::{CancelOutcome, Database};
use crate::errors::CronError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReaperSummary {
    pub examined: usize,
    pub canceled: usize,
    /// Canceled reservations whose ticket still has to be canceled remotely
    pub queued_for_gateway: usize,
    /// Lost the conditional update (paid or canceled meanwhile)
    pub skipped: usize,
    pub errors: usize,
}

impl fmt::Display for ReaperSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} examined, {} canceled ({} queued for gateway cancellation), {} skipped, {} errors",
            self.examined, self.canceled, self.queued_for_gateway, self.skipped, self.errors
        )
    }
}

#[derive(Clone)]
pub struct StaleReservationService {
    config: Arc<Config>,
    database: Arc<Database>,
}

impl StaleReservationService {
    pub fn new(config: Arc<Config>, database: Arc<Database>) -> Self {
        Self { config, database }
    }

    pub async fn run(&self) -> Result<ReaperSummary, CronError> {
        self.run_at(Utc::now()).await
    }

    #[instrument(skip(self), fields(command = "cron:reservas-sin-pago"))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ReaperSummary, CronError> {
        let cutoff = now - Duration::minutes(self.config.reservation_grace_minutes);
        let threshold = self.config.freeze_threshold;
        let mut summary = ReaperSummary::default();

        loop {
            let batch = self
                .database
                .find_stale_pending_reservations(cutoff, self.config.batch_size)
                .await?;
            let batch_len = batch.len();
            let errors_before = summary.errors;

            for reservation in batch {
                summary.examined += 1;

                let result = self
                    .database
                    .cancel_unpaid_reservation(
                        reservation.id,
                        constants::reaper::CANCEL_REASON,
                        threshold,
                        now,
                    )
                    .await;

                match result {
                    Ok(CancelOutcome::CanceledNotifyPending) => {
                        summary.canceled += 1;
                        summary.queued_for_gateway += 1;
                        info!(
                            "Reservation {} canceled after {} min unpaid; ticket queued for cancellation",
                            reservation.codigo, self.config.reservation_grace_minutes
                        );
                    }
                    Ok(CancelOutcome::Canceled) => {
                        summary.canceled += 1;
                        info!(
                            "Reservation {} canceled after {} min unpaid",
                            reservation.codigo, self.config.reservation_grace_minutes
                        );
                    }
                    Ok(CancelOutcome::NotPending) => {
                        summary.skipped += 1;
                        debug!("Reservation {} no longer pending, skipped", reservation.codigo);
                    }
                    Err(e) => {
                        summary.errors += 1;
                        error!("Failed to cancel reservation {}: {}", reservation.codigo, e);
                    }
                }
            }

            // Rows that failed stay selectable; stop instead of re-reading them
            if batch_len < self.config.batch_size as usize || summary.errors > errors_before {
                break;
            }
        }

        Ok(summary)
    }
}
