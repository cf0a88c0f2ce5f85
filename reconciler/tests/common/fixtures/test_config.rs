//! Test configuration: an in-memory `Config` for service tests and a
//! builder that writes config files for `ConfigManager` tests.

use reconciler::Config;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use super::test_data::emails;

/// Config pointing at unreachable endpoints; services get their
/// collaborators injected, so the URLs are never used.
pub fn test_config() -> Arc<Config> {
    let raw = format!(
        r#"
database_path = ":memory:"
timezone = "America/Bogota"
reservation_grace_minutes = 30
freeze_threshold = 5
batch_size = 50
gateway_concurrency = 1

[gateway]
base_url = "http://127.0.0.1:9/api"
timeout_seconds = 1

[mail]
webhook_url = "http://127.0.0.1:9/send"
report_recipients = ["{}"]
timeout_seconds = 1
"#,
        emails::OPERATIONS
    );
    let config: Config = toml::from_str(&raw).expect("test config must parse");
    config.validate().expect("test config must be valid");
    Arc::new(config)
}

/// Same as `test_config` with a modification applied
pub fn test_config_with<F>(f: F) -> Arc<Config>
where
    F: FnOnce(&mut Config),
{
    let mut config = (*test_config()).clone();
    f(&mut config);
    Arc::new(config)
}

/// Builder for config directories on disk
pub struct TestConfigBuilder {
    temp_dir: TempDir,
    database_path: String,
    timezone: String,
    gateway_url: String,
    mail_url: String,
    top_level: String,
    extra: String,
    secrets: Option<String>,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let database_path = temp_dir
            .path()
            .join("data/reservas.db")
            .to_string_lossy()
            .to_string();
        Self {
            temp_dir,
            database_path,
            timezone: "America/Bogota".to_string(),
            gateway_url: "https://pasarela.example.com/api".to_string(),
            mail_url: "https://correo.example.com/send".to_string(),
            top_level: String::new(),
            extra: String::new(),
            secrets: None,
        }
    }

    pub fn timezone(mut self, timezone: &str) -> Self {
        self.timezone = timezone.to_string();
        self
    }

    pub fn gateway_url(mut self, url: &str) -> Self {
        self.gateway_url = url.to_string();
        self
    }

    /// Top-level `key = value` line
    pub fn set(mut self, line: &str) -> Self {
        self.top_level.push_str(line);
        self.top_level.push('\n');
        self
    }

    /// Raw TOML tables appended after the required sections
    pub fn extra(mut self, toml: &str) -> Self {
        self.extra.push('\n');
        self.extra.push_str(toml);
        self
    }

    pub fn secrets(mut self, toml: &str) -> Self {
        self.secrets = Some(toml.to_string());
        self
    }

    pub fn build(self) -> TestConfigDir {
        let config_dir = self.temp_dir.path().join("config");
        fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        let main_toml = format!(
            r#"
database_path = "{}"
timezone = "{}"
{}
[gateway]
base_url = "{}"

[mail]
webhook_url = "{}"
report_recipients = ["{}"]
{}
"#,
            self.database_path,
            self.timezone,
            self.top_level,
            self.gateway_url,
            self.mail_url,
            emails::OPERATIONS,
            self.extra
        );
        fs::write(config_dir.join("main.toml"), main_toml).expect("Failed to write main.toml");

        if let Some(secrets) = &self.secrets {
            fs::write(config_dir.join("secrets.toml"), secrets)
                .expect("Failed to write secrets.toml");
        }

        TestConfigDir {
            _temp_dir: self.temp_dir,
            config_dir,
        }
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Config directory that lives as long as this value
pub struct TestConfigDir {
    _temp_dir: TempDir,
    pub config_dir: PathBuf,
}

impl TestConfigDir {
    pub fn path(&self) -> String {
        self.config_dir.to_string_lossy().to_string()
    }
}
