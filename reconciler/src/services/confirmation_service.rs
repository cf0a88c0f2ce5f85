//! `cron:confirmar-pagos`: ask the gateway about every pending payment and
//! apply the answer.
//!
//! Candidates are reservations and mensualidades together, oldest entity
//! first, so a gateway outage freezes the oldest backlog rather than an
//! arbitrary subset. Gateway calls may overlap up to `gateway_concurrency`
//! but their results are applied one by one in candidate order.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::constants;
use crate::database::{
    CancelOutcome, Database, EntityKind, MensualidadStatus, PaymentStatus, PendingPayment,
    ReservationStatus,
};
use crate::errors::{CronError, GatewayError};
use crate::gateway::{PaymentGateway, TransactionStatus};
use crate::mail::{MailMessage, Mailer};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfirmationSummary {
    pub examined: usize,
    pub confirmed: usize,
    pub canceled: usize,
    pub still_pending: usize,
    pub failures: usize,
    pub frozen: usize,
    /// Lost the conditional update to another job
    pub skipped: usize,
    pub mail_failures: usize,
    pub errors: usize,
}

impl fmt::Display for ConfirmationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} examined, {} confirmed, {} canceled, {} still pending, {} gateway failures ({} frozen), {} skipped, {} errors",
            self.examined,
            self.confirmed,
            self.canceled,
            self.still_pending,
            self.failures,
            self.frozen,
            self.skipped,
            self.errors
        )
    }
}

/// Keep one candidate per entity (the first row, i.e. the latest payment)
/// and order everything oldest entity first.
pub fn order_candidates(mut candidates: Vec<PendingPayment>, limit: usize) -> Vec<PendingPayment> {
    let mut seen = HashSet::new();
    candidates.retain(|candidate| seen.insert((candidate.kind, candidate.entity_id)));
    candidates.sort_by(|a, b| {
        a.entity_created_at
            .cmp(&b.entity_created_at)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    candidates.truncate(limit);
    candidates
}

fn pending_status(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Reserva => ReservationStatus::PendingPayment.as_str(),
        EntityKind::Mensualidad => MensualidadStatus::PendingPayment.as_str(),
    }
}

#[derive(Clone)]
pub struct ConfirmationService {
    config: Arc<Config>,
    database: Arc<Database>,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
}

impl ConfirmationService {
    pub fn new(
        config: Arc<Config>,
        database: Arc<Database>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            database,
            gateway,
            mailer,
        }
    }

    pub async fn run(&self) -> Result<ConfirmationSummary, CronError> {
        self.run_at(Utc::now()).await
    }

    #[instrument(skip(self), fields(command = "cron:confirmar-pagos"))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ConfirmationSummary, CronError> {
        let threshold = self.config.freeze_threshold;
        let limit = self.config.batch_size;

        let mut candidates = self
            .database
            .find_pending_reservation_payments(threshold, limit)
            .await?;
        candidates.extend(
            self.database
                .find_pending_mensualidad_payments(threshold, limit)
                .await?,
        );
        let candidates = order_candidates(candidates, limit as usize);

        let mut summary = ConfirmationSummary::default();
        if candidates.is_empty() {
            debug!("No pending payments to reconcile");
            return Ok(summary);
        }

        let gateway = self.gateway.clone();
        let call_timeout = self.config.gateway.timeout();
        let mut answers = stream::iter(candidates)
            .map(|candidate| {
                let gateway = gateway.clone();
                async move {
                    let ticket = candidate.ticket_id.clone();
                    let answer = match timeout(call_timeout, gateway.transaction_status(&ticket)).await {
                        Ok(answer) => answer,
                        Err(_) => Err(GatewayError::Timeout {
                            operation: "fetching transaction status".to_string(),
                            ticket,
                        }),
                    };
                    (candidate, answer)
                }
            })
            .buffered(self.config.gateway_concurrency.max(1));

        while let Some((candidate, answer)) = answers.next().await {
            summary.examined += 1;
            if let Err(e) = self.apply(&candidate, answer, now, &mut summary).await {
                summary.errors += 1;
                error!(
                    "Failed to apply gateway answer for {} {}: {}",
                    candidate.kind, candidate.codigo, e
                );
            }
        }

        Ok(summary)
    }

    async fn apply(
        &self,
        candidate: &PendingPayment,
        answer: Result<TransactionStatus, GatewayError>,
        now: DateTime<Utc>,
        summary: &mut ConfirmationSummary,
    ) -> anyhow::Result<()> {
        match answer {
            Ok(TransactionStatus::Confirmed { bank_timestamp }) => {
                let applied = match candidate.kind {
                    EntityKind::Reserva => {
                        self.database
                            .confirm_reservation_payment(
                                candidate.entity_id,
                                candidate.payment_id,
                                bank_timestamp,
                                now,
                            )
                            .await?
                    }
                    EntityKind::Mensualidad => {
                        self.database
                            .confirm_mensualidad_payment(
                                candidate.entity_id,
                                candidate.payment_id,
                                bank_timestamp,
                                now,
                            )
                            .await?
                    }
                };

                if !applied {
                    summary.skipped += 1;
                    debug!("{} {} changed meanwhile, skipped", candidate.kind, candidate.codigo);
                    return Ok(());
                }

                summary.confirmed += 1;
                info!("Payment confirmed for {} {}", candidate.kind, candidate.codigo);
                if !self.send_confirmation(candidate, bank_timestamp.unwrap_or(now)).await {
                    summary.mail_failures += 1;
                }
            }
            Ok(TransactionStatus::Rejected { reason }) => {
                let reason = match reason {
                    Some(detail) if !detail.trim().is_empty() => {
                        format!("Pago rechazado por la pasarela: {}", detail.trim())
                    }
                    _ => "Pago rechazado por la pasarela".to_string(),
                };
                self.cancel(candidate, PaymentStatus::Rejected, &reason, now, summary)
                    .await?;
            }
            Ok(TransactionStatus::Expired) => {
                self.cancel(
                    candidate,
                    PaymentStatus::Expired,
                    "Pago expirado en la pasarela",
                    now,
                    summary,
                )
                .await?;
            }
            Ok(TransactionStatus::Pending) => {
                summary.still_pending += 1;
                debug!("Ticket {} still pending at the bank", candidate.ticket_id);

                // A clean answer ends the streak of consecutive failures
                self.database
                    .clear_failures(
                        candidate.kind,
                        candidate.entity_id,
                        pending_status(candidate.kind),
                        self.config.freeze_threshold,
                        now,
                    )
                    .await?;
            }
            Err(gateway_error) => {
                summary.failures += 1;
                warn!(
                    "Gateway failure for {} {} (ticket {}): {}",
                    candidate.kind, candidate.codigo, candidate.ticket_id, gateway_error
                );

                let state = self
                    .database
                    .record_failure(
                        candidate.kind,
                        candidate.entity_id,
                        pending_status(candidate.kind),
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

    async fn cancel(
        &self,
        candidate: &PendingPayment,
        payment_status: PaymentStatus,
        reason: &str,
        now: DateTime<Utc>,
        summary: &mut ConfirmationSummary,
    ) -> anyhow::Result<()> {
        let canceled = match candidate.kind {
            EntityKind::Reserva => {
                let outcome = self
                    .database
                    .cancel_reservation_for_payment(
                        candidate.entity_id,
                        candidate.payment_id,
                        payment_status,
                        reason,
                        self.config.freeze_threshold,
                        now,
                    )
                    .await?;
                outcome != CancelOutcome::NotPending
            }
            EntityKind::Mensualidad => {
                self.database
                    .cancel_mensualidad_for_payment(
                        candidate.entity_id,
                        candidate.payment_id,
                        payment_status,
                        now,
                    )
                    .await?
            }
        };

        if canceled {
            summary.canceled += 1;
            info!(
                "{} {} canceled: {}",
                candidate.kind, candidate.codigo, reason
            );
        } else {
            summary.skipped += 1;
            debug!("{} {} changed meanwhile, skipped", candidate.kind, candidate.codigo);
        }
        Ok(())
    }

    /// Mail failures never undo the confirmation
    async fn send_confirmation(&self, candidate: &PendingPayment, paid_at: DateTime<Utc>) -> bool {
        let template = match candidate.kind {
            EntityKind::Reserva => constants::templates::RESERVATION_CONFIRMED,
            EntityKind::Mensualidad => constants::templates::MENSUALIDAD_PAID,
        };

        let message = MailMessage::new(
            template,
            vec![candidate.usuario_email.clone()],
            json!({
                "codigo": candidate.codigo,
                "valor": candidate.valor,
                "ticket": candidate.ticket_id,
                "fecha_pago": paid_at,
            }),
        );

        match self.mailer.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Confirmation mail for {} {} not sent: {}",
                    candidate.kind, candidate.codigo, e
                );
                false
            }
        }
    }
}
