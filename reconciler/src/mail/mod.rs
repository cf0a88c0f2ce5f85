//! Mail collaborator. Templates are rendered by the relay; the engine only
//! names the template and supplies its data.

pub mod webhook;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::MailError;

pub use webhook::WebhookMailer;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailMessage {
    pub template: String,
    pub recipients: Vec<String>,
    pub data: serde_json::Value,
}

impl MailMessage {
    pub fn new(template: &str, recipients: Vec<String>, data: serde_json::Value) -> Self {
        Self {
            template: template.to_string(),
            recipients,
            data,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}
