//! Mail relay reached through a JSON webhook.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{MailMessage, Mailer};
use crate::config::MailConfig;
use crate::errors::MailError;

pub struct WebhookMailer {
    webhook_url: String,
    client: Client,
    send_timeout: Duration,
}

impl WebhookMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let send_timeout = config.timeout();
        let client = Client::builder()
            .timeout(send_timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client for mail relay: {}", e))?;

        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            client,
            send_timeout,
        })
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        if message.recipients.is_empty() {
            return Err(MailError::NoRecipients {
                template: message.template.clone(),
            });
        }

        let payload = json!({
            "timestamp": Utc::now(),
            "template": message.template,
            "recipients": message.recipients,
            "data": message.data,
        });

        debug!("Posting '{}' mail to relay", message.template);

        match timeout(
            self.send_timeout,
            self.client.post(&self.webhook_url).json(&payload).send(),
        )
        .await
        {
            Ok(Ok(response)) => {
                if response.status().is_success() {
                    info!(
                        "Mail '{}' sent to {} recipient(s)",
                        message.template,
                        message.recipients.len()
                    );
                    Ok(())
                } else {
                    warn!(
                        "Mail relay returned status {} for '{}'",
                        response.status(),
                        message.template
                    );
                    Err(MailError::Rejected {
                        template: message.template.clone(),
                        status: response.status().as_u16(),
                    })
                }
            }
            Ok(Err(e)) => Err(MailError::DeliveryFailed {
                template: message.template.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(MailError::DeliveryFailed {
                template: message.template.clone(),
                reason: "mail relay timeout".to_string(),
            }),
        }
    }
}
