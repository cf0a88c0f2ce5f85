//! Custom error types for the reconciliation engine
//!
//! Application boundaries use `anyhow`; the types here exist where a failure
//! has to be classified (timeouts, invalid responses) or turned into a
//! failure-ledger message.

use std::fmt;

/// Main error type for the reconciliation engine
#[derive(Debug)]
pub enum CronError {
    /// Configuration-related errors
    Config(ConfigError),

    /// Payment gateway communication errors
    Gateway(GatewayError),

    /// Database operation errors
    Database(DatabaseError),

    /// Mail relay errors
    Mail(MailError),

    /// Other errors with context
    Other(String),
}

/// Configuration error variants
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to load configuration file
    LoadFailed { path: String, reason: String },

    /// Invalid configuration value
    InvalidValue { field: String, reason: String },

    /// Configuration parsing error
    ParseError { reason: String },
}

/// Payment gateway error variants
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Connection to the gateway failed
    ConnectionFailed { reason: String },

    /// Request did not finish within the configured timeout
    Timeout { operation: String, ticket: String },

    /// Gateway answered with something we cannot interpret
    InvalidResponse { ticket: String, reason: String },

    /// Gateway answered with a non-success HTTP status
    Status { ticket: String, status: u16 },

    /// Gateway refused to cancel the transaction
    CancelRefused { ticket: String, reason: String },
}

/// Database error variants
#[derive(Debug)]
pub enum DatabaseError {
    /// Connection failed
    ConnectionFailed { reason: String },

    /// Query execution failed
    QueryFailed { query: String, reason: String },
}

/// Mail relay error variants
#[derive(Debug, Clone, PartialEq)]
pub enum MailError {
    /// Relay could not be reached or timed out
    DeliveryFailed { template: String, reason: String },

    /// Relay answered with a non-success HTTP status
    Rejected { template: String, status: u16 },

    /// Mail has no recipients
    NoRecipients { template: String },
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}

impl fmt::Display for CronError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronError::Config(e) => write!(f, "Configuration error: {}", e),
            CronError::Gateway(e) => write!(f, "Gateway error: {}", e),
            CronError::Database(e) => write!(f, "Database error: {}", e),
            CronError::Mail(e) => write!(f, "Mail error: {}", e),
            CronError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::LoadFailed { path, reason } => {
                write!(f, "Failed to load config from '{}': {}", path, reason)
            }
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            ConfigError::ParseError { reason } => {
                write!(f, "Failed to parse config: {}", reason)
            }
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::ConnectionFailed { reason } => {
                write!(f, "Connection to payment gateway failed: {}", reason)
            }
            GatewayError::Timeout { operation, ticket } => {
                write!(f, "Timeout while {} for ticket {}", operation, ticket)
            }
            GatewayError::InvalidResponse { ticket, reason } => {
                write!(f, "Invalid gateway response for ticket {}: {}", ticket, reason)
            }
            GatewayError::Status { ticket, status } => {
                write!(f, "Gateway returned HTTP {} for ticket {}", status, ticket)
            }
            GatewayError::CancelRefused { ticket, reason } => {
                write!(f, "Gateway refused to cancel ticket {}: {}", ticket, reason)
            }
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::ConnectionFailed { reason } => {
                write!(f, "Database connection failed: {}", reason)
            }
            DatabaseError::QueryFailed { query, reason } => {
                write!(f, "Query '{}' failed: {}", query, reason)
            }
        }
    }
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailError::DeliveryFailed { template, reason } => {
                write!(f, "Failed to deliver '{}' mail: {}", template, reason)
            }
            MailError::Rejected { template, status } => {
                write!(f, "Mail relay rejected '{}' mail with HTTP {}", template, status)
            }
            MailError::NoRecipients { template } => {
                write!(f, "Mail '{}' has no recipients", template)
            }
        }
    }
}

impl std::error::Error for CronError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for GatewayError {}
impl std::error::Error for DatabaseError {}
impl std::error::Error for MailError {}

impl From<anyhow::Error> for CronError {
    fn from(err: anyhow::Error) -> Self {
        CronError::Other(err.to_string())
    }
}

impl From<ConfigError> for CronError {
    fn from(err: ConfigError) -> Self {
        CronError::Config(err)
    }
}

impl From<GatewayError> for CronError {
    fn from(err: GatewayError) -> Self {
        CronError::Gateway(err)
    }
}

impl From<DatabaseError> for CronError {
    fn from(err: DatabaseError) -> Self {
        CronError::Database(err)
    }
}

impl From<MailError> for CronError {
    fn from(err: MailError) -> Self {
        CronError::Mail(err)
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionFailed {
                    reason: err.to_string(),
                }
            }
            other => DatabaseError::QueryFailed {
                query: "unknown".to_string(),
                reason: other.to_string(),
            },
        }
    }
}
