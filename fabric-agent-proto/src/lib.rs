//! Wire protocol spoken between the control plane and the per-node agent.
//!
//! The agent binary itself is out of scope (external collaborator); this
//! crate is the stable contract both sides serialize against.
//!
//! - `GET /v1/health`
//! - `POST /v1/ops/shell`
//! - `GET /v1/rdma/preflight`

use serde::{Deserialize, Serialize};

/// Request body for `POST /v1/ops/shell`. Exactly one of `script` /
/// `script_base64` should be set; a 2 MiB limit applies to whichever is
/// used (enforced by the caller — see `fabric-core::agent_rpc`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShellRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_base64: Option<String>,
    pub timeout_seconds: u64,
}

impl ShellRequest {
    pub fn plain(script: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            script: Some(script.into()),
            script_base64: None,
            timeout_seconds,
        }
    }
}

/// Maximum request body size the agent wire contract allows, per §4.2.
pub const SHELL_REQUEST_MAX_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShellResponse {
    pub ok: bool,
    pub output: String,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub hostname: String,
    /// Milliseconds since Unix epoch, set by the agent.
    pub time: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RdmaPreflightResponse {
    pub required: bool,
    pub eth_if: Option<String>,
    #[serde(default)]
    pub ib_if: Vec<String>,
    pub eth_up: bool,
    #[serde(default)]
    pub ib_up: Vec<bool>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RdmaPreflightResponse {
    /// §4.2: 400 if `required` and any listed interface is missing or down.
    pub fn is_satisfied(&self) -> bool {
        if !self.required {
            return true;
        }
        if self.eth_if.is_some() && !self.eth_up {
            return false;
        }
        if self.ib_if.iter().count() != self.ib_up.iter().filter(|up| **up).count() {
            return false;
        }
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_request_plain_sets_script_only() {
        let req = ShellRequest::plain("echo hi", 30);
        assert_eq!(req.script.as_deref(), Some("echo hi"));
        assert!(req.script_base64.is_none());
    }

    #[test]
    fn rdma_preflight_not_required_is_satisfied() {
        let r = RdmaPreflightResponse::default();
        assert!(r.is_satisfied());
    }

    #[test]
    fn rdma_preflight_required_eth_down_not_satisfied() {
        let r = RdmaPreflightResponse {
            required: true,
            eth_if: Some("eth0".into()),
            eth_up: false,
            ..Default::default()
        };
        assert!(!r.is_satisfied());
    }

    #[test]
    fn rdma_preflight_required_ib_mismatch_not_satisfied() {
        let r = RdmaPreflightResponse {
            required: true,
            ib_if: vec!["ib0".into(), "ib1".into()],
            ib_up: vec![true],
            ..Default::default()
        };
        assert!(!r.is_satisfied());
    }

    #[test]
    fn shell_response_roundtrips_through_json() {
        let resp = ShellResponse {
            ok: true,
            output: "done".into(),
            exit_code: Some(0),
            error: None,
        };
        let s = serde_json::to_string(&resp).unwrap();
        let back: ShellResponse = serde_json::from_str(&s).unwrap();
        assert_eq!(back.output, "done");
        assert_eq!(back.exit_code, Some(0));
    }
}
