pub mod manager;
pub mod secrets;

pub use manager::ConfigManager;

use crate::constants;
use crate::errors::ConfigError;
use crate::scheduler::{Cadence, CronCommand, JobDefinition, OverlapPolicy};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_path: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_grace_minutes")]
    pub reservation_grace_minutes: i64,
    #[serde(default = "default_freeze_threshold")]
    pub freeze_threshold: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_gateway_concurrency")]
    pub gateway_concurrency: usize,
    pub gateway: GatewayConfig,
    pub mail: MailConfig,
    #[serde(default)]
    pub novelties: NoveltyConfig,
    /// Per-command overrides keyed by command name (with or without the `cron:` prefix)
    #[serde(default)]
    pub jobs: BTreeMap<String, JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    // Usually injected from secrets.toml or PAYMENT_GATEWAY_API_KEY
    #[serde(default)]
    pub api_key: String,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub report_recipients: Vec<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltyConfig {
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: i64,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            lookahead_days: default_lookahead_days(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    pub cadence: Option<String>,
    pub overlap: Option<OverlapPolicy>,
    pub enabled: Option<bool>,
    pub max_run_seconds: Option<u64>,
}

fn default_timezone() -> String {
    constants::scheduler::DEFAULT_TIMEZONE.to_string()
}

fn default_grace_minutes() -> i64 {
    constants::reaper::GRACE_MINUTES
}

fn default_freeze_threshold() -> i64 {
    constants::ledger::FREEZE_THRESHOLD
}

fn default_batch_size() -> i64 {
    constants::limits::BATCH_SIZE
}

fn default_gateway_concurrency() -> usize {
    constants::limits::GATEWAY_CONCURRENCY
}

fn default_lookahead_days() -> i64 {
    constants::novelties::LOOKAHEAD_DAYS
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(constants::http::GATEWAY_TIMEOUT)
    }
}

impl MailConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(constants::http::MAIL_TIMEOUT)
    }
}

impl Config {
    /// Timezone used for "today" and calendar cadences.
    /// Falls back to UTC only if `validate` was skipped.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.trim().is_empty() {
            return Err(invalid("database_path", "must not be empty"));
        }
        if self.timezone.parse::<Tz>().is_err() {
            return Err(invalid(
                "timezone",
                &format!("'{}' is not an IANA timezone", self.timezone),
            ));
        }
        if self.reservation_grace_minutes < 1 {
            return Err(invalid("reservation_grace_minutes", "must be at least 1"));
        }
        if self.freeze_threshold < 1 {
            return Err(invalid("freeze_threshold", "must be at least 1"));
        }
        if self.batch_size < 1 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.gateway_concurrency == 0
            || self.gateway_concurrency > constants::limits::MAX_GATEWAY_CONCURRENCY
        {
            return Err(invalid(
                "gateway_concurrency",
                &format!(
                    "must be between 1 and {}",
                    constants::limits::MAX_GATEWAY_CONCURRENCY
                ),
            ));
        }
        if self.gateway.base_url.trim().is_empty() {
            return Err(invalid("gateway.base_url", "must not be empty"));
        }
        if self.mail.webhook_url.trim().is_empty() {
            return Err(invalid("mail.webhook_url", "must not be empty"));
        }
        if self.novelties.lookahead_days < 0 {
            return Err(invalid("novelties.lookahead_days", "must not be negative"));
        }

        // Resolving the table checks job names and cadences
        self.job_table()?;
        Ok(())
    }

    /// Resolve the command table: built-in defaults overridden by `[jobs.<name>]`.
    pub fn job_table(&self) -> Result<Vec<JobDefinition>, ConfigError> {
        for name in self.jobs.keys() {
            if name.parse::<CronCommand>().is_err() {
                return Err(invalid(&format!("jobs.{}", name), "unknown command"));
            }
        }

        let mut table = Vec::with_capacity(CronCommand::ALL.len());
        for command in CronCommand::ALL {
            let overrides = self
                .jobs
                .iter()
                .find(|(name, _)| name.parse::<CronCommand>().ok() == Some(command))
                .map(|(_, job)| job.clone())
                .unwrap_or_default();

            let cadence = match &overrides.cadence {
                Some(raw) => raw.parse::<Cadence>().map_err(|reason| {
                    invalid(&format!("jobs.{}.cadence", command.short_name()), &reason)
                })?,
                None => command.default_cadence(),
            };

            let max_run_seconds = overrides
                .max_run_seconds
                .unwrap_or(constants::scheduler::MAX_RUN_SECONDS);
            if max_run_seconds == 0 {
                return Err(invalid(
                    &format!("jobs.{}.max_run_seconds", command.short_name()),
                    "must be positive",
                ));
            }

            table.push(JobDefinition {
                command,
                cadence,
                overlap: overrides.overlap.unwrap_or_default(),
                enabled: overrides.enabled.unwrap_or(true),
                max_run: Duration::from_secs(max_run_seconds),
            });
        }

        Ok(table)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
