//! Secrets loader for the payment gateway credentials.
//!
//! Secrets live in a separate TOML file (config/secrets.toml) that should be
//! excluded from version control. The `PAYMENT_GATEWAY_API_KEY` environment
//! variable takes precedence over the file.
//!
//! Example secrets.toml:
//! ```toml
//! gateway_api_key = "secret-api-key"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

pub const GATEWAY_API_KEY_ENV: &str = "PAYMENT_GATEWAY_API_KEY";

/// Structure matching the secrets.toml file format
#[derive(Debug, Deserialize, Default)]
pub struct SecretsFile {
    pub gateway_api_key: Option<String>,
}

/// Loader for secrets from the secrets.toml file
pub struct SecretsLoader {
    secrets: SecretsFile,
}

impl SecretsLoader {
    /// Load secrets from the specified file path.
    /// Returns an empty loader if the file doesn't exist.
    pub fn load(secrets_path: &Path) -> Result<Self> {
        if !secrets_path.exists() {
            warn!(
                "Secrets file not found at {:?}, gateway key must come from {} or main.toml",
                secrets_path, GATEWAY_API_KEY_ENV
            );
            return Ok(Self {
                secrets: SecretsFile::default(),
            });
        }

        let content = std::fs::read_to_string(secrets_path)
            .with_context(|| format!("Failed to read secrets file: {:?}", secrets_path))?;

        let secrets: SecretsFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse secrets file: {:?}", secrets_path))?;

        info!("Loaded secrets from {:?}", secrets_path);

        Ok(Self { secrets })
    }

    /// Resolve the gateway API key: environment first, then the secrets file.
    pub fn gateway_api_key(&self) -> Option<String> {
        std::env::var(GATEWAY_API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.secrets.gateway_api_key.clone())
    }
}
