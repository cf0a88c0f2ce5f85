//! Mock payment gateway HTTP server
//!
//! Simulates the gateway's transaction endpoints so the HTTP client can be
//! tested without a real bank integration.

use serde_json::json;
use std::time::Duration;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub struct MockGatewayServer {
    pub server: MockServer,
    pub base_url: String,
}

impl MockGatewayServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();
        Self { server, base_url }
    }

    /// Gateway answers `status` for `ticket`
    pub async fn mock_status(&self, ticket: &str, status: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}", ticket)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": status,
                "reason": "fondos insuficientes"
            })))
            .mount(&self.server)
            .await;
    }

    /// Confirmed transaction carrying a bank timestamp
    pub async fn mock_confirmed_at(&self, ticket: &str, bank_timestamp: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}", ticket)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "confirmed",
                "bank_timestamp": bank_timestamp
            })))
            .mount(&self.server)
            .await;
    }

    /// Only answers when the bearer token matches
    pub async fn mock_status_requiring_key(&self, ticket: &str, api_key: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}", ticket)))
            .and(header("authorization", format!("Bearer {}", api_key).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "pending" })))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}", ticket)))
            .respond_with(ResponseTemplate::new(401))
            .with_priority(10)
            .mount(&self.server)
            .await;
    }

    pub async fn mock_status_code(&self, ticket: &str, code: u16) {
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}", ticket)))
            .respond_with(ResponseTemplate::new(code))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_garbage(&self, ticket: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}", ticket)))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&self.server)
            .await;
    }

    /// Status endpoint that answers after `delay`
    pub async fn mock_slow_status(&self, ticket: &str, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}", ticket)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": "confirmed" }))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mock_cancel(&self, ticket: &str, code: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/transactions/{}/cancel", ticket)))
            .respond_with(ResponseTemplate::new(code).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}
