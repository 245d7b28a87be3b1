//! Agent RPC Client (§4.2): authenticated HTTP to a remote node-agent's
//! shell/health endpoints. Maps non-2xx / timeout / body-too-large into
//! `ExecError` variants.

use fabric_agent_proto::{
    HealthResponse, RdmaPreflightResponse, ShellRequest, ShellResponse, SHELL_REQUEST_MAX_BYTES,
};
use fabric_model::NodeRoute;

use crate::error::ExecError;
use crate::exec::{ExecContext, ExecOutput};
use crate::inventory::Inventory;

pub struct AgentClient {
    http: reqwest::Client,
    bearer_token: Option<String>,
}

impl AgentClient {
    pub fn new(bearer_token: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), bearer_token }
    }

    fn base_url(&self, route: &NodeRoute, port: u16) -> String {
        format!("http://{}:{}", route.control_ip, port)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn health(&self, route: &NodeRoute, port: u16) -> Result<HealthResponse, ExecError> {
        let url = format!("{}/v1/health", self.base_url(route, port));
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| ExecError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExecError::NonSuccess { status, body });
        }
        resp.json().await.map_err(|e| ExecError::Http(e.to_string()))
    }

    pub async fn rdma_preflight(
        &self,
        route: &NodeRoute,
        port: u16,
    ) -> Result<RdmaPreflightResponse, ExecError> {
        let url = format!("{}/v1/rdma/preflight", self.base_url(route, port));
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| ExecError::Http(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 400 || status.is_success() {
            return resp.json().await.map_err(|e| ExecError::Http(e.to_string()));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ExecError::NonSuccess { status: status.as_u16(), body })
    }

    /// Runs a script on `route` via `POST /v1/ops/shell`, deriving the
    /// request timeout from `ctx`'s deadline.
    pub async fn run(
        &self,
        ctx: &ExecContext,
        route: &NodeRoute,
        script: &str,
    ) -> Result<ExecOutput, ExecError> {
        if script.len() > SHELL_REQUEST_MAX_BYTES {
            return Err(ExecError::BodyTooLarge { limit: SHELL_REQUEST_MAX_BYTES });
        }
        let timeout_seconds = ctx.remaining().map(|d| d.as_secs().max(1)).unwrap_or(300);
        let body = ShellRequest::plain(script, timeout_seconds);
        self.run_with_port(route, 8711, &body, timeout_seconds).await
    }

    pub async fn run_with_port(
        &self,
        route: &NodeRoute,
        port: u16,
        body: &ShellRequest,
        timeout_seconds: u64,
    ) -> Result<ExecOutput, ExecError> {
        let url = format!("{}/v1/ops/shell", self.base_url(route, port));
        let resp = self
            .authed(self.http.post(&url))
            .json(body)
            .timeout(std::time::Duration::from_secs(timeout_seconds + 5))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecError::Timeout
                } else {
                    ExecError::Http(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExecError::NonSuccess { status, body });
        }

        let parsed: ShellResponse = resp.json().await.map_err(|e| ExecError::Http(e.to_string()))?;
        let exit_code = parsed.exit_code.unwrap_or(if parsed.ok { 0 } else { -1 });
        if exit_code != 0 {
            return Err(ExecError::NonZeroExit { code: exit_code, tail: parsed.output });
        }
        Ok(ExecOutput { output_tail: parsed.output, truncated: false, exit_code })
    }

    /// Resolves `host` against `inventory` and runs there. Convenience for
    /// callers that already have an `Inventory` but not a `NodeRoute`.
    pub async fn run_on_host(
        &self,
        ctx: &ExecContext,
        inventory: &Inventory,
        host: &str,
        script: &str,
    ) -> Result<ExecOutput, ExecError> {
        let route = inventory.resolve(host).ok_or_else(|| ExecError::UnknownHost(host.to_string()))?;
        self.run(ctx, route, script).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    fn route(_port: u16) -> NodeRoute {
        NodeRoute {
            id: "n1".into(),
            head: false,
            data_ip: "127.0.0.1".into(),
            control_ip: "127.0.0.1".into(),
            proxy_ip: None,
            ssh_user: None,
        }
    }

    async fn spawn_agent(ok: bool, exit_code: i32) -> u16 {
        let app = Router::new()
            .route(
                "/v1/ops/shell",
                post(move |Json(_req): Json<ShellRequest>| async move {
                    Json(ShellResponse {
                        ok,
                        output: "agent output".to_string(),
                        exit_code: Some(exit_code),
                        error: None,
                    })
                }),
            )
            .route(
                "/v1/health",
                get(|| async { Json(HealthResponse { ok: true, hostname: "n1".into(), time: 0 }) }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        port
    }

    #[tokio::test]
    async fn successful_shell_call_returns_output() {
        let port = spawn_agent(true, 0).await;
        let client = AgentClient::new(None);
        let body = ShellRequest::plain("echo hi", 5);
        let out = client.run_with_port(&route(port), port, &body, 5).await.unwrap();
        assert_eq!(out.output_tail, "agent output");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_an_error() {
        let port = spawn_agent(false, 7).await;
        let client = AgentClient::new(None);
        let body = ShellRequest::plain("false", 5);
        let err = client.run_with_port(&route(port), port, &body, 5).await.unwrap_err();
        assert!(matches!(err, ExecError::NonZeroExit { code: 7, .. }));
    }

    #[tokio::test]
    async fn health_check_parses_response() {
        let port = spawn_agent(true, 0).await;
        let client = AgentClient::new(None);
        let health = client.health(&route(port), port).await.unwrap();
        assert!(health.ok);
        assert_eq!(health.hostname, "n1");
    }

    #[tokio::test]
    async fn oversized_script_is_rejected_before_sending() {
        let client = AgentClient::new(None);
        let ctx = ExecContext::default();
        let huge = "x".repeat(SHELL_REQUEST_MAX_BYTES + 1);
        let err = client.run(&ctx, &route(1), &huge).await.unwrap_err();
        assert!(matches!(err, ExecError::BodyTooLarge { .. }));
    }
}
