//! Deterministic mock [`LlmClient`], grounded on the teacher's test mocking
//! pattern (mockall-free hand-rolled fakes used across `tests/integration`).
//! Tests queue a sequence of canned responses and assert on the prompts the
//! agent actually sent.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::LlmError;

use super::{ChatMessage, LlmClient};

pub struct MockLlmClient {
    responses: Mutex<Vec<String>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlmClient {
    /// Responses are returned in order, oldest first.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete_json(
        &self,
        messages: Vec<ChatMessage>,
        _timeout: std::time::Duration,
    ) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(messages);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(responses.remove(0))
    }
}
