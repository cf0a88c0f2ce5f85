//! `cron:reportar-reservas-mensualidades`: mail operators the frozen entities
//! no previous report listed. Only the report stamp of the ledger is written.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::Config;
use crate::constants;
use crate::database::{Database, EntityKind, FrozenEntity};
use crate::errors::{CronError, MailError};
use crate::mail::{MailMessage, Mailer};

/// Payload of the `reporte_fallos` mail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub generated_at: DateTime<Utc>,
    /// When the previous report went out; `None` when none was ever sent
    pub since: Option<DateTime<Utc>>,
    pub threshold: i64,
    pub reservas: Vec<FrozenEntity>,
    pub mensualidades: Vec<FrozenEntity>,
}

impl FailureReport {
    pub fn is_empty(&self) -> bool {
        self.reservas.is_empty() && self.mensualidades.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub reservas: usize,
    pub mensualidades: usize,
    pub sent: bool,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sent {
            write!(
                f,
                "report sent with {} reservas and {} mensualidades",
                self.reservas, self.mensualidades
            )
        } else {
            write!(f, "no unreported frozen entities, no mail sent")
        }
    }
}

#[derive(Clone)]
pub struct ReportService {
    config: Arc<Config>,
    database: Arc<Database>,
    mailer: Arc<dyn Mailer>,
}

impl ReportService {
    pub fn new(config: Arc<Config>, database: Arc<Database>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            config,
            database,
            mailer,
        }
    }

    pub async fn build_report(&self, now: DateTime<Utc>) -> Result<FailureReport, CronError> {
        let since = self.database.last_report_sent_at().await?;
        let threshold = self.config.freeze_threshold;

        Ok(FailureReport {
            generated_at: now,
            since,
            threshold,
            reservas: self
                .database
                .frozen_unreported(EntityKind::Reserva, threshold)
                .await?,
            mensualidades: self
                .database
                .frozen_unreported(EntityKind::Mensualidad, threshold)
                .await?,
        })
    }

    pub async fn run(&self) -> Result<ReportSummary, CronError> {
        self.run_at(Utc::now()).await
    }

    /// The report run is recorded only after the mail went out, so a failed
    /// send lists the same entities next time.
    #[instrument(skip(self), fields(command = "cron:reportar-reservas-mensualidades"))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ReportSummary, CronError> {
        let report = self.build_report(now).await?;
        let mut summary = ReportSummary {
            reservas: report.reservas.len(),
            mensualidades: report.mensualidades.len(),
            sent: false,
        };

        if report.is_empty() {
            info!("No frozen reservas or mensualidades left to report");
            return Ok(summary);
        }

        let data = serde_json::to_value(&report).map_err(|e| MailError::DeliveryFailed {
            template: constants::templates::FAILURE_REPORT.to_string(),
            reason: format!("report serialization failed: {}", e),
        })?;

        let message = MailMessage::new(
            constants::templates::FAILURE_REPORT,
            self.config.mail.report_recipients.clone(),
            data,
        );
        self.mailer.send(&message).await?;

        self.database
            .record_report_sent(now, &report.reservas, &report.mensualidades)
            .await?;
        summary.sent = true;

        info!(
            "Failure report sent: {} reservas, {} mensualidades",
            summary.reservas, summary.mensualidades
        );
        Ok(summary)
    }
}
