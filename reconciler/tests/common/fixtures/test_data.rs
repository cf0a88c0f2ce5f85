//! Common test data and constants

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Fixed "now" for deterministic runs: 2026-03-10 15:00:00 UTC
/// (10:00 in America/Bogota)
pub fn base_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap()
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    base_now() - Duration::minutes(minutes)
}

pub mod tickets {
    pub const T1: &str = "TCK-0001";
    pub const T2: &str = "TCK-0002";
    pub const T3: &str = "TCK-0003";
    pub const MONTHLY: &str = "TCK-M-0001";
}

pub mod emails {
    pub const CLIENT: &str = "cliente@example.com";
    pub const OPERATIONS: &str = "operaciones@example.com";
}

pub mod spaces {
    pub const COURT_1: i64 = 1;
    pub const COURT_2: i64 = 2;
}
