pub mod cancellation_service;
pub mod confirmation_service;
pub mod novelty_service;
pub mod reaper_service;
pub mod report_service;

pub use cancellation_service::{CancellationService, CancellationSummary};
pub use confirmation_service::{ConfirmationService, ConfirmationSummary};
pub use novelty_service::{NoveltyService, NoveltySummary};
pub use reaper_service::{ReaperSummary, StaleReservationService};
pub use report_service::{FailureReport, ReportService, ReportSummary};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::database::Database;
use crate::errors::CronError;
use crate::gateway::PaymentGateway;
use crate::mail::Mailer;
use crate::scheduler::CronCommand;

/// Result of one command run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandSummary {
    Reaper(ReaperSummary),
    Novelties(NoveltySummary),
    Confirmations(ConfirmationSummary),
    Cancellations(CancellationSummary),
    Report(ReportSummary),
}

impl fmt::Display for CommandSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSummary::Reaper(s) => s.fmt(f),
            CommandSummary::Novelties(s) => s.fmt(f),
            CommandSummary::Confirmations(s) => s.fmt(f),
            CommandSummary::Cancellations(s) => s.fmt(f),
            CommandSummary::Report(s) => s.fmt(f),
        }
    }
}

/// The five command services wired to shared collaborators
#[derive(Clone)]
pub struct CronServices {
    pub reaper: StaleReservationService,
    pub novelties: NoveltyService,
    pub confirmations: ConfirmationService,
    pub cancellations: CancellationService,
    pub reports: ReportService,
}

impl CronServices {
    pub fn new(
        config: Arc<Config>,
        database: Arc<Database>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            reaper: StaleReservationService::new(config.clone(), database.clone()),
            novelties: NoveltyService::new(config.clone(), database.clone()),
            confirmations: ConfirmationService::new(
                config.clone(),
                database.clone(),
                gateway.clone(),
                mailer.clone(),
            ),
            cancellations: CancellationService::new(config.clone(), database.clone(), gateway),
            reports: ReportService::new(config, database, mailer),
        }
    }

    pub async fn execute(
        &self,
        command: CronCommand,
        now: DateTime<Utc>,
    ) -> Result<CommandSummary, CronError> {
        Ok(match command {
            CronCommand::ReservasSinPago => CommandSummary::Reaper(self.reaper.run_at(now).await?),
            CronCommand::ProcesarNovedades => {
                CommandSummary::Novelties(self.novelties.run_at(now).await?)
            }
            CronCommand::ConfirmarPagos => {
                CommandSummary::Confirmations(self.confirmations.run_at(now).await?)
            }
            CronCommand::RepetirCancelaciones => {
                CommandSummary::Cancellations(self.cancellations.run_at(now).await?)
            }
            CronCommand::ReportarReservasMensualidades => {
                CommandSummary::Report(self.reports.run_at(now).await?)
            }
        })
    }
}
