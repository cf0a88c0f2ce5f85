//! This module provides reusable test utilities:
//! - Databases (in-memory and on-disk) with seeding helpers
//! - A scripted payment gateway and a recording mailer
//! - Mock HTTP servers (gateway, mail webhook)
//! - Test configuration builders
//! - Common test data

// Not every test binary uses every fixture
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fake_gateway;
pub mod mock_gateway;
pub mod mock_webhook;
pub mod recording_mailer;
pub mod test_config;
pub mod test_data;
pub mod test_database;

pub use fake_gateway::FakeGateway;
pub use mock_gateway::MockGatewayServer;
pub use mock_webhook::MockWebhookServer;
pub use recording_mailer::RecordingMailer;
pub use test_config::{test_config, test_config_with, TestConfigBuilder};
pub use test_data::*;
pub use test_database::TestDatabase;
