//! Application-wide constants for timeouts, limits, and default configuration values
//!
//! Everything here is a default: the values that operators may tune are
//! overridable from `config/main.toml`.

use std::time::Duration;

/// Failure ledger defaults
pub mod ledger {
    /// Consecutive failures after which an entity is frozen
    pub const FREEZE_THRESHOLD: i64 = 5;

    /// Longest error message stored in `ultimo_error_reporte`
    pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;
}

/// Stale-reservation reaper defaults
pub mod reaper {
    /// Minutes a reservation may stay unpaid before it is canceled
    pub const GRACE_MINUTES: i64 = 30;

    /// Reason stored on reservations canceled by the reaper
    pub const CANCEL_REASON: &str = "Reserva cancelada automáticamente: pago no completado a tiempo";
}

/// Batch sizes and concurrency
pub mod limits {
    /// Maximum rows loaded per job run
    pub const BATCH_SIZE: i64 = 200;

    /// Gateway requests in flight during a reconciliation run
    pub const GATEWAY_CONCURRENCY: usize = 1;

    /// Upper bound accepted for `gateway_concurrency`
    pub const MAX_GATEWAY_CONCURRENCY: usize = 16;
}

/// Novelty processor defaults
pub mod novelties {
    /// Days after today whose blocks are materialized ahead of time
    pub const LOOKAHEAD_DAYS: i64 = 1;
}

/// HTTP client timeouts
pub mod http {
    use super::Duration;

    /// Default timeout for a payment gateway request
    pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

    /// Default timeout for a mail relay request
    pub const MAIL_TIMEOUT: Duration = Duration::from_secs(10);

    /// Timeout for establishing HTTP connections
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Database timeouts
pub mod database {
    use super::Duration;

    /// Maximum wait for a pooled connection
    pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

    /// SQLite busy timeout while another writer holds the lock
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    pub const MAX_CONNECTIONS: u32 = 5;

    /// Runs stuck in `running` for longer than this are failed on startup
    pub const STUCK_RUN_HOURS: i64 = 1;
}

/// Scheduler defaults
pub mod scheduler {
    /// Timezone used for calendar cadences when none is configured
    pub const DEFAULT_TIMEZONE: &str = "America/Bogota";

    /// Default upper bound for a single job run
    pub const MAX_RUN_SECONDS: u64 = 3600;

    /// How often the daemon drops running marks whose task was lost
    pub const TRACKER_CLEANUP_INTERVAL_SECONDS: u64 = 600;

    /// Running marks older than this are considered lost
    pub const TRACKER_STALE_HOURS: i64 = 2;
}

/// Mail templates understood by the mail relay
pub mod templates {
    pub const RESERVATION_CONFIRMED: &str = "reserva_confirmada";
    pub const MENSUALIDAD_PAID: &str = "mensualidad_pagada";
    pub const FAILURE_REPORT: &str = "reporte_fallos";
}
