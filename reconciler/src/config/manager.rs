use super::secrets::SecretsLoader;
use super::Config;
use crate::errors::ConfigError;
use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

pub struct ConfigManager {
    current_config: Arc<Config>,
}

impl ConfigManager {
    pub async fn new(config_dir: &str) -> Result<Self> {
        let config = Self::load_configuration(config_dir).await?;
        Ok(Self {
            current_config: Arc::new(config),
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    async fn load_configuration(config_dir: &str) -> Result<Config> {
        let main_config_path = format!("{}/main.toml", config_dir);
        let main_config_content = fs::read_to_string(&main_config_path).await.map_err(|e| {
            ConfigError::LoadFailed {
                path: main_config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut config: Config = toml::from_str(&main_config_content).map_err(|e| {
            ConfigError::ParseError {
                reason: e.to_string(),
            }
        })?;

        let secrets_path = format!("{}/secrets.toml", config_dir);
        let secrets = SecretsLoader::load(Path::new(&secrets_path))?;
        if let Some(api_key) = secrets.gateway_api_key() {
            debug!("Gateway API key resolved from secrets");
            config.gateway.api_key = api_key;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Invalid configuration in {}: {}", main_config_path, e))?;

        let enabled = config
            .job_table()?
            .iter()
            .filter(|job| job.enabled)
            .count();
        info!(
            "Loaded configuration: database {}, timezone {}, grace {}m, freeze threshold {}, {} enabled commands",
            config.database_path,
            config.timezone,
            config.reservation_grace_minutes,
            config.freeze_threshold,
            enabled
        );

        Ok(config)
    }
}
