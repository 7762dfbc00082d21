use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway tool `{tool}` returned status {status}: {body}")]
    Status { tool: String, status: u16, body: String },
}

/// Thin HTTP client for the external tool-invocation gateway.
///
/// One instance is shared by everything that talks to the gateway: the
/// indirect model transport, the customer-data lookups, and the
/// best-effort `record_ptp` write-through.
#[derive(Clone)]
pub struct ToolGateway {
    http: reqwest::Client,
    base_url: String,
}

impl ToolGateway {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, GatewayError> {
        let response = self
            .http
            .post(format!("{}/tools/{tool}", self.base_url))
            .json(&arguments)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                tool: tool.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}
