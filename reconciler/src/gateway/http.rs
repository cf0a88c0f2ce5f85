//! HTTP client for the payment gateway.
//!
//! `GET {base}/transactions/{ticket}` answers
//! `{"status": "...", "bank_timestamp": "...", "reason": "..."}` and
//! `POST {base}/transactions/{ticket}/cancel` acknowledges with any 2xx.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{PaymentGateway, TransactionStatus};
use crate::config::GatewayConfig;
use crate::constants;
use crate::errors::GatewayError;

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    bank_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct HttpPaymentGateway {
    base_url: Url,
    api_key: String,
    client: Client,
    request_timeout: Duration,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let request_timeout = config.timeout();
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(constants::http::CONNECT_TIMEOUT)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client for payment gateway: {}", e))?;

        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| anyhow!("Invalid gateway base URL '{}': {}", config.base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Gateway base URL '{}' cannot carry a path", config.base_url));
        }

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            client,
            request_timeout,
        })
    }

    /// `{base}/transactions/{ticket}[/{action}]` with the ticket encoded as
    /// a single path segment
    fn transaction_url(&self, ticket: &str, action: Option<&str>) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::ConnectionFailed {
                reason: format!("gateway base URL {} cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .push("transactions")
            .push(ticket)
            .extend(action);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }
}

fn transport_error(err: reqwest::Error, operation: &str, ticket: &str) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout {
            operation: operation.to_string(),
            ticket: ticket.to_string(),
        }
    } else {
        GatewayError::ConnectionFailed {
            reason: err.to_string(),
        }
    }
}

/// Map the gateway's status vocabulary onto `TransactionStatus`
fn parse_status(ticket: &str, body: StatusResponse) -> Result<TransactionStatus, GatewayError> {
    match body.status.trim().to_ascii_lowercase().as_str() {
        "confirmed" | "approved" => Ok(TransactionStatus::Confirmed {
            bank_timestamp: body.bank_timestamp,
        }),
        "rejected" | "declined" | "failed" => Ok(TransactionStatus::Rejected {
            reason: body.reason,
        }),
        "expired" => Ok(TransactionStatus::Expired),
        "pending" | "processing" => Ok(TransactionStatus::Pending),
        other => Err(GatewayError::InvalidResponse {
            ticket: ticket.to_string(),
            reason: format!("unknown status '{}'", other),
        }),
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn transaction_status(&self, ticket: &str) -> Result<TransactionStatus, GatewayError> {
        let operation = "fetching transaction status";
        let url = self.transaction_url(ticket, None)?;
        debug!("GET {}", url);

        let request = self.authorize(self.client.get(url)).send();
        let response = match timeout(self.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(transport_error(e, operation, ticket)),
            Err(_) => {
                return Err(GatewayError::Timeout {
                    operation: operation.to_string(),
                    ticket: ticket.to_string(),
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("Gateway returned HTTP {} for ticket {}", status, ticket);
            return Err(GatewayError::Status {
                ticket: ticket.to_string(),
                status: status.as_u16(),
            });
        }

        let body: StatusResponse =
            response
                .json()
                .await
                .map_err(|e| GatewayError::InvalidResponse {
                    ticket: ticket.to_string(),
                    reason: e.to_string(),
                })?;

        parse_status(ticket, body)
    }

    async fn cancel_transaction(&self, ticket: &str) -> Result<(), GatewayError> {
        let operation = "cancelling transaction";
        let url = self.transaction_url(ticket, Some("cancel"))?;
        debug!("POST {}", url);

        let request = self.authorize(self.client.post(url)).send();
        let response = match timeout(self.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(transport_error(e, operation, ticket)),
            Err(_) => {
                return Err(GatewayError::Timeout {
                    operation: operation.to_string(),
                    ticket: ticket.to_string(),
                })
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            let reason = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect::<String>();
            return Err(GatewayError::CancelRefused {
                ticket: ticket.to_string(),
                reason: if reason.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    reason
                },
            });
        }

        Err(GatewayError::Status {
            ticket: ticket.to_string(),
            status: status.as_u16(),
        })
    }
}
