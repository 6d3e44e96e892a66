//! Tool Client (spec.md §4.5) — request/response channel to the
//! GUI-automation server. The server itself is an external collaborator
//! (spec.md §1); this module defines the protocol every other component
//! programs against, grounded on the teacher's MCP tool-discovery shape
//! (`architehc-selfware` `src/mcp.rs`: name + JSON schema, call by name with
//! JSON arguments) and wraps transport calls in the [`CircuitBreaker`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ToolError;
use crate::supervision::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub success: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Transport to the automation server. Implementations own connection
/// lifecycle; this trait captures only the two operations spec.md §4.5
/// requires, so tests can substitute an in-memory fake.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;
    async fn call(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult, ToolError>;
}

/// Synchronous-from-the-caller's-view client: wraps a [`ToolTransport`] with
/// a circuit breaker so repeated transport failures fail fast instead of
/// retrying a dead server forever (spec.md §4.5, §5 "bounded, idempotent
/// retries only").
pub struct ToolClient {
    transport: Box<dyn ToolTransport>,
    breaker: CircuitBreaker,
    call_timeout: Duration,
}

impl ToolClient {
    pub fn new(transport: Box<dyn ToolTransport>, call_timeout: Duration) -> Self {
        Self {
            transport,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            call_timeout,
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        self.transport.list_tools().await
    }

    /// Call `tool_name` with `arguments`, applying the configured timeout
    /// and circuit breaker. Application-level failure (the tool itself
    /// reporting `success: false`) is returned as `Ok` with that payload —
    /// only transport errors go through the breaker (spec.md §4.5).
    pub async fn call(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, ToolError> {
        let tool_name_owned = tool_name.to_string();
        let timeout = self.call_timeout;
        let transport = &self.transport;

        let outcome = self
            .breaker
            .call(|| async move {
                tokio::time::timeout(timeout, transport.call(&tool_name_owned, arguments))
                    .await
                    .map_err(|_| ToolError::Timeout {
                        name: tool_name_owned.clone(),
                        seconds: timeout.as_secs(),
                    })?
            })
            .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(CircuitBreakerError::CircuitOpen) => Err(ToolError::Transport(format!(
                "circuit open: automation server for '{tool_name}' appears unreachable"
            ))),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        }
    }
}

/// Heuristic classification of a tool response into success/failure
/// (spec.md §4.6 step 4): `success` requires both the reported boolean and
/// the absence of error-like substrings in `content`.
pub fn classify_success(result: &ToolCallResult) -> Result<(), String> {
    if !result.success {
        return Err(result
            .error
            .clone()
            .unwrap_or_else(|| "tool reported failure".to_string()));
    }

    const ERROR_MARKERS: [&str; 3] = ["not found", "failed", "error"];
    let lower = result.content.to_lowercase();
    for marker in ERROR_MARKERS {
        if lower.contains(marker) {
            return Err(format!(
                "tool reported success=true but content contains '{marker}': {}",
                result.content
            ));
        }
    }
    Ok(())
}
