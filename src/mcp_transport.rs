//! HTTP implementation of [`ToolTransport`] against the external
//! GUI-automation server (spec.md §1 "external collaborator", §4.5).
//!
//! The server itself is out of scope; this module is the client side of the
//! wire protocol every other component programs against through the
//! [`ToolTransport`] trait. Grounded on the same `reqwest` one-shot-JSON
//! pattern as [`crate::llm::http_client::HttpLlmClient`], and on the
//! tool-discovery shape of the teacher's `src/mcp.rs` (a named tool with a
//! JSON schema, invoked by name with JSON arguments).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::ToolError;
use crate::tool_client::{ToolCallResult, ToolDescriptor, ToolTransport};

/// Talks to an automation server exposing two endpoints:
/// `GET {base_url}/tools` (a JSON array of [`ToolDescriptor`]) and
/// `POST {base_url}/tools/{name}/call` (a JSON arguments body, returning a
/// [`ToolCallResult`]).
pub struct HttpToolTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpToolTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn tools_url(&self) -> String {
        format!("{}/tools", self.base_url.trim_end_matches('/'))
    }

    fn call_url(&self, tool_name: &str) -> String {
        format!(
            "{}/tools/{}/call",
            self.base_url.trim_end_matches('/'),
            tool_name
        )
    }
}

#[derive(Deserialize)]
struct ToolListResponse {
    tools: Vec<ToolDescriptor>,
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let response = self
            .http
            .get(self.tools_url())
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ToolError::Transport(format!(
                "HTTP {status} listing tools: {}",
                text.chars().take(500).collect::<String>()
            )));
        }

        let parsed: ToolListResponse = serde_json::from_str(&text)
            .map_err(|e| ToolError::Transport(format!("invalid tool list JSON: {e}")))?;
        Ok(parsed.tools)
    }

    async fn call(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult, ToolError> {
        let response = self
            .http
            .post(self.call_url(tool_name))
            .json(&arguments)
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ToolError::NotFound {
                name: tool_name.to_string(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ToolError::Transport(format!(
                "HTTP {status} calling '{tool_name}': {}",
                text.chars().take(500).collect::<String>()
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| ToolError::Transport(format!("invalid tool call response JSON: {e}")))
    }
}
