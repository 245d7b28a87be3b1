//! `HttpHealthCheck`: the `HealthCheck` implementation the server wires
//! into `Process::start` (`fabric-core` keeps the trait generic so its
//! own unit tests don't need a real network stack — see
//! `fabric_core::process::HealthCheck`).

use async_trait::async_trait;
use fabric_core::process::HealthCheck;

pub struct HttpHealthCheck {
    http: reqwest::Client,
}

impl HttpHealthCheck {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, endpoint: &str) -> bool {
        match self.http.get(endpoint).timeout(std::time::Duration::from_secs(2)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
