//! Thin HTTP client over the control plane's own surface (§6): one struct
//! wrapping a transport, one method per server action, over plain HTTP
//! since the control plane's interface already is HTTP.

use std::time::Duration;

use fabric_store::RuntimeOverride;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url}: {source}")]
    Request { url: String, #[source] source: reqwest::Error },
    #[error("{status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },
}

pub struct FabricClient {
    http: reqwest::Client,
    base_url: String,
}

impl FabricClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self { http, base_url: base_url.into() }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_json(resp: reqwest::Response, url: &str) -> Result<Value, ClientError> {
        let status = resp.status();
        let body = resp.text().await.map_err(|e| ClientError::Request { url: url.to_string(), source: e })?;
        if !status.is_success() {
            return Err(ClientError::Status { status, body });
        }
        serde_json::from_str(&body).or_else(|_| Ok(Value::String(body)))
    }

    pub async fn status(&self, view: Option<&str>, include: Option<&str>, force: bool, allow_stale: bool) -> Result<Value, ClientError> {
        let url = format!("{}/api/cluster/status", self.base_url);
        let mut query = Vec::new();
        if let Some(v) = view {
            query.push(("view", v.to_string()));
        }
        if let Some(i) = include {
            query.push(("include", i.to_string()));
        }
        if force {
            query.push(("force", "true".to_string()));
        }
        if allow_stale {
            query.push(("allowStale", "true".to_string()));
        }
        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }

    pub async fn stop_cluster(&self) -> Result<Value, ClientError> {
        let url = format!("{}/api/cluster/stop", self.base_url);
        let resp = self.http.post(&url).send().await.map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }

    pub async fn get_settings(&self) -> Result<Value, ClientError> {
        let url = format!("{}/api/cluster/settings", self.base_url);
        let resp = self.http.get(&url).send().await.map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }

    pub async fn put_settings(&self, overrides: &RuntimeOverride) -> Result<Value, ClientError> {
        let url = format!("{}/api/cluster/settings", self.base_url);
        let resp = self
            .http
            .put(&url)
            .json(overrides)
            .send()
            .await
            .map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }

    pub async fn settings_wizard(&self, body: &Value) -> Result<Value, ClientError> {
        let url = format!("{}/api/cluster/settings/wizard", self.base_url);
        let resp = self.http.post(&url).json(body).send().await.map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }

    pub async fn list_models(&self) -> Result<Value, ClientError> {
        let url = format!("{}/api/models/", self.base_url);
        let resp = self.http.get(&url).send().await.map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }

    pub async fn unload_all(&self) -> Result<Value, ClientError> {
        let url = format!("{}/api/models/unload", self.base_url);
        let resp = self.http.post(&url).send().await.map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }

    pub async fn unload_one(&self, model_id: &str) -> Result<Value, ClientError> {
        let url = format!("{}/api/models/unload/{model_id}", self.base_url);
        let resp = self.http.post(&url).send().await.map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }

    pub async fn upsert_model(&self, body: &Value) -> Result<Value, ClientError> {
        let url = format!("{}/api/recipes/models", self.base_url);
        let resp = self.http.post(&url).json(body).send().await.map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }

    pub async fn delete_model(&self, model_id: &str) -> Result<Value, ClientError> {
        let url = format!("{}/api/recipes/models/{model_id}", self.base_url);
        let resp = self.http.delete(&url).send().await.map_err(|e| ClientError::Request { url: url.clone(), source: e })?;
        Self::read_json(resp, &url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    async fn spawn_stub() -> String {
        let app = Router::new().route(
            "/api/cluster/status",
            get(|| async { Json(serde_json::json!({"overall": "healthy"})) }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn status_reads_json_body() {
        let base_url = spawn_stub().await;
        let client = FabricClient::new(base_url);
        let value = client.status(None, None, false, false).await.unwrap();
        assert_eq!(value["overall"], "healthy");
    }

    #[tokio::test]
    async fn status_against_unreachable_server_errors() {
        let client = FabricClient::new("http://127.0.0.1:1");
        assert!(client.status(None, None, false, false).await.is_err());
    }
}
