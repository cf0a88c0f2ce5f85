//! `cron:repetir-cancelaciones`: tell the gateway about local cancellations
//! it has not acknowledged yet. No in-process backoff: the next cadence
//! retries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::database::{Database, EntityKind, QueuedCancellation, ReservationStatus};
use crate::errors::{CronError, GatewayError};
use crate::gateway::PaymentGateway;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CancellationSummary {
    pub examined: usize,
    pub acknowledged: usize,
    pub failures: usize,
    pub frozen: usize,
    pub errors: usize,
}

impl fmt::Display for CancellationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} examined, {} acknowledged, {} gateway failures ({} frozen), {} errors",
            self.examined, self.acknowledged, self.failures, self.frozen, self.errors
        )
    }
}

#[derive(Clone)]
pub struct CancellationService {
    config: Arc<Config>,
    database: Arc<Database>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CancellationService {
    pub fn new(
        config: Arc<Config>,
        database: Arc<Database>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            config,
            database,
            gateway,
        }
    }

    pub async fn run(&self) -> Result<CancellationSummary, CronError> {
        self.run_at(Utc::now()).await
    }

    #[instrument(skip(self), fields(command = "cron:repetir-cancelaciones"))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CancellationSummary, CronError> {
        let pending = self
            .database
            .find_unacknowledged_cancellations(self.config.freeze_threshold, self.config.batch_size)
            .await?;

        let mut summary = CancellationSummary::default();
        if pending.is_empty() {
            debug!("No cancellations waiting for the gateway");
            return Ok(summary);
        }

        for reservation in &pending {
            summary.examined += 1;
            if let Err(e) = self.dispatch(reservation, now, &mut summary).await {
                summary.errors += 1;
                error!(
                    "Failed to record cancellation result for {}: {}",
                    reservation.codigo, e
                );
            }
        }

        Ok(summary)
    }

    async fn dispatch(
        &self,
        reservation: &QueuedCancellation,
        now: DateTime<Utc>,
        summary: &mut CancellationSummary,
    ) -> anyhow::Result<()> {
        let ticket = &reservation.ticket;

        let result = match timeout(
            self.config.gateway.timeout(),
            self.gateway.cancel_transaction(ticket),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                operation: "cancelling transaction".to_string(),
                ticket: ticket.clone(),
            }),
        };

        match result {
            Ok(()) => {
                if self.database.acknowledge_cancellation(reservation.id, now).await? {
                    summary.acknowledged += 1;
                    info!(
                        "Gateway acknowledged cancellation of {} (ticket {})",
                        reservation.codigo, ticket
                    );
                }
            }
            Err(gateway_error) => {
                summary.failures += 1;
                warn!(
                    "Cancellation of {} (ticket {}) not acknowledged: {}",
                    reservation.codigo, ticket, gateway_error
                );

                let state = self
                    .database
                    .record_failure(
                        EntityKind::Reserva,
                        reservation.id,
                        ReservationStatus::Canceled.as_str(),
                        &gateway_error.to_string(),
                        self.config.freeze_threshold,
                        now,
                    )
                    .await?;

                if state.is_some_and(|state| state.frozen) {
                    summary.frozen += 1;
                }
            }
        }

        Ok(())
    }
}
