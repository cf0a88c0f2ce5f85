//! Cron-based scheduling of the reconciliation commands
//!
//! This module provides:
//! - The command table (`CronCommand`) naming the five background commands
//! - Cadences (`Cadence`) translated to 6-field cron expressions
//!   (sec min hour day month dow) evaluated in the configured timezone
//! - Overlap policy: by default a fire while the previous run of the same
//!   command is still running is skipped, never queued
//!
//! # Configuration
//!
//! ```toml
//! [jobs.confirmar-pagos]
//! cadence = "every_five_minutes"
//! overlap = "skip"
//! max_run_seconds = 600
//!
//! [jobs.procesar-novedades]
//! cadence = "daily 00:05"
//! ```

pub mod cron_jobs;
pub mod runner;

pub use cron_jobs::CronScheduler;
pub use runner::{JobOutcome, JobRunner, RunStatus};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CronCommand {
    ReservasSinPago,
    ProcesarNovedades,
    ConfirmarPagos,
    RepetirCancelaciones,
    ReportarReservasMensualidades,
}

impl CronCommand {
    pub const ALL: [CronCommand; 5] = [
        CronCommand::ReservasSinPago,
        CronCommand::ProcesarNovedades,
        CronCommand::ConfirmarPagos,
        CronCommand::RepetirCancelaciones,
        CronCommand::ReportarReservasMensualidades,
    ];

    /// Name without the `cron:` prefix, as used in `[jobs.<name>]`
    pub fn short_name(&self) -> &'static str {
        match self {
            CronCommand::ReservasSinPago => "reservas-sin-pago",
            CronCommand::ProcesarNovedades => "procesar-novedades",
            CronCommand::ConfirmarPagos => "confirmar-pagos",
            CronCommand::RepetirCancelaciones => "repetir-cancelaciones",
            CronCommand::ReportarReservasMensualidades => "reportar-reservas-mensualidades",
        }
    }

    pub fn name(&self) -> String {
        format!("cron:{}", self.short_name())
    }

    pub fn default_cadence(&self) -> Cadence {
        match self {
            CronCommand::ReservasSinPago => Cadence::EveryMinute,
            CronCommand::ConfirmarPagos => Cadence::EveryFiveMinutes,
            CronCommand::RepetirCancelaciones => Cadence::Hourly,
            CronCommand::ProcesarNovedades => Cadence::Daily { hour: 0, minute: 5 },
            CronCommand::ReportarReservasMensualidades => Cadence::Monthly {
                day: 1,
                hour: 7,
                minute: 0,
            },
        }
    }
}

impl fmt::Display for CronCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cron:{}", self.short_name())
    }
}

impl FromStr for CronCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let short = s.trim().strip_prefix("cron:").unwrap_or(s.trim());
        CronCommand::ALL
            .into_iter()
            .find(|command| command.short_name() == short)
            .ok_or_else(|| format!("Unknown command '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Skip a fire while the previous run is still running
    #[default]
    Skip,
    /// Let runs overlap
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cadence {
    EveryMinute,
    EveryFiveMinutes,
    Hourly,
    Daily { hour: u32, minute: u32 },
    Monthly { day: u32, hour: u32, minute: u32 },
    /// Raw 6-field expression
    Cron(String),
}

impl Cadence {
    pub fn to_cron(&self) -> String {
        match self {
            Cadence::EveryMinute => "0 * * * * *".to_string(),
            Cadence::EveryFiveMinutes => "0 */5 * * * *".to_string(),
            Cadence::Hourly => "0 0 * * * *".to_string(),
            Cadence::Daily { hour, minute } => format!("0 {} {} * * *", minute, hour),
            Cadence::Monthly { day, hour, minute } => {
                format!("0 {} {} {} * *", minute, hour, day)
            }
            Cadence::Cron(expr) => expr.clone(),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::EveryMinute => write!(f, "every_minute"),
            Cadence::EveryFiveMinutes => write!(f, "every_five_minutes"),
            Cadence::Hourly => write!(f, "hourly"),
            Cadence::Daily { hour, minute } => write!(f, "daily {:02}:{:02}", hour, minute),
            Cadence::Monthly { day, hour, minute } => {
                write!(f, "monthly {} {:02}:{:02}", day, hour, minute)
            }
            Cadence::Cron(expr) => write!(f, "cron {}", expr),
        }
    }
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, rest) = match s.split_once(char::is_whitespace) {
            Some((kind, rest)) => (kind, rest.trim()),
            None => (s, ""),
        };

        match (kind, rest) {
            ("every_minute", "") => Ok(Cadence::EveryMinute),
            ("every_five_minutes", "") => Ok(Cadence::EveryFiveMinutes),
            ("hourly", "") => Ok(Cadence::Hourly),
            ("daily", time) => {
                let (hour, minute) = parse_hh_mm(time)?;
                Ok(Cadence::Daily { hour, minute })
            }
            ("monthly", args) => {
                let (day, time) = args
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| format!("Expected 'monthly <day> HH:MM', got '{}'", s))?;
                let day = day
                    .parse::<u32>()
                    .ok()
                    .filter(|d| (1..=28).contains(d))
                    .ok_or_else(|| format!("Monthly day must be 1-28, got '{}'", day))?;
                let (hour, minute) = parse_hh_mm(time.trim())?;
                Ok(Cadence::Monthly { day, hour, minute })
            }
            ("cron", expr) => {
                validate_6_field_cron(expr)?;
                Ok(Cadence::Cron(expr.to_string()))
            }
            _ => Err(format!("Unknown cadence '{}'", s)),
        }
    }
}

fn parse_hh_mm(time: &str) -> Result<(u32, u32), String> {
    let (hour, minute) = time
        .split_once(':')
        .ok_or_else(|| format!("Expected HH:MM, got '{}'", time))?;
    let hour = hour
        .parse::<u32>()
        .ok()
        .filter(|h| *h < 24)
        .ok_or_else(|| format!("Invalid hour in '{}'", time))?;
    let minute = minute
        .parse::<u32>()
        .ok()
        .filter(|m| *m < 60)
        .ok_or_else(|| format!("Invalid minute in '{}'", time))?;
    Ok((hour, minute))
}

/// tokio-cron-scheduler expects sec min hour day month dow
pub fn validate_6_field_cron(schedule: &str) -> Result<(), String> {
    let parts: Vec<&str> = schedule.split_whitespace().collect();

    if parts.len() != 6 {
        return Err(format!(
            "Cron expression requires exactly 6 fields (second minute hour day month dayofweek), got {}: '{}'",
            parts.len(),
            schedule
        ));
    }

    validate_cron_field(parts[0], "second", 0, 59)?;
    validate_cron_field(parts[1], "minute", 0, 59)?;
    validate_cron_field(parts[2], "hour", 0, 23)?;
    validate_cron_field(parts[3], "day", 1, 31)?;
    validate_cron_field(parts[4], "month", 1, 12)?;
    validate_cron_field(parts[5], "dayofweek", 0, 7)?;
    Ok(())
}

fn validate_cron_field(field: &str, name: &str, min: u32, max: u32) -> Result<(), String> {
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        if let Some(step) = step {
            let step = step
                .parse::<u32>()
                .map_err(|_| format!("Invalid {} step: {}", name, step))?;
            if step == 0 {
                return Err(format!("{} step must be positive", name));
            }
        }

        if range == "*" || range == "?" {
            continue;
        }

        let bounds: Vec<&str> = range.split('-').collect();
        if bounds.len() > 2 {
            return Err(format!("Invalid {} range: {}", name, range));
        }
        for bound in &bounds {
            let value = bound
                .parse::<u32>()
                .map_err(|_| format!("Invalid {} value: {}", name, bound))?;
            if value < min || value > max {
                return Err(format!(
                    "{} value {} out of range {}-{}",
                    name, value, min, max
                ));
            }
        }
    }
    Ok(())
}

/// One row of the command table
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub command: CronCommand,
    pub cadence: Cadence,
    pub overlap: OverlapPolicy,
    pub enabled: bool,
    pub max_run: Duration,
}
