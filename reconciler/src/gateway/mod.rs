//! Payment gateway seam.
//!
//! The reconciler only needs two questions answered by the bank side: what
//! happened to a ticket, and whether it accepts a cancellation. Both are
//! bounded by a timeout in every implementation; a timeout is reported as
//! `GatewayError::Timeout` and ends up in the failure ledger.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::GatewayError;

pub use http::HttpPaymentGateway;

/// Bank-side state of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Confirmed { bank_timestamp: Option<DateTime<Utc>> },
    Rejected { reason: Option<String> },
    Expired,
    /// The bank has not decided yet
    Pending,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Confirmed { .. } => write!(f, "confirmed"),
            TransactionStatus::Rejected { .. } => write!(f, "rejected"),
            TransactionStatus::Expired => write!(f, "expired"),
            TransactionStatus::Pending => write!(f, "pending"),
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn transaction_status(&self, ticket: &str) -> Result<TransactionStatus, GatewayError>;

    /// `Ok(())` means the gateway acknowledged the cancellation
    async fn cancel_transaction(&self, ticket: &str) -> Result<(), GatewayError>;
}
