//! LLM provider contract (spec.md §1 "external collaborators, contract-only"
//! and §6 "LLM contract").
//!
//! The provider itself — a chat-completion API returning JSON — is out of
//! scope; this module defines the trait every caller (planner, resolver,
//! recovery synthesizer) programs against, grounded on the teacher's
//! `LlmClient` trait (`architehc-selfware` `src/api/mod.rs`), plus a real
//! HTTP implementation and a deterministic mock used in tests.

pub mod http_client;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::LlmError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Trait abstraction over the chat-completion endpoint, enabling test
/// mocking of every LLM-driven component (planner, resolver, recovery
/// synthesizer).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a strict-JSON-mode chat completion and return the raw
    /// completion text (expected to be a single JSON document).
    async fn complete_json(
        &self,
        messages: Vec<ChatMessage>,
        timeout: std::time::Duration,
    ) -> Result<String, LlmError>;
}
