pub mod config;
pub mod constants;
pub mod database;
pub mod errors;
pub mod gateway;
pub mod mail;
pub mod run_tracker;
pub mod scheduler;
pub mod services;

// Re-export commonly used types
pub use config::{Config, ConfigManager};
pub use database::Database;
pub use gateway::{HttpPaymentGateway, PaymentGateway, TransactionStatus};
pub use mail::{MailMessage, Mailer, WebhookMailer};
pub use run_tracker::RunTracker;
pub use scheduler::{CronCommand, CronScheduler, JobOutcome, JobRunner, RunStatus};
pub use services::CronServices;
