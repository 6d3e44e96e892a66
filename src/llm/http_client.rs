//! Real HTTP implementation of [`super::LlmClient`] against an
//! OpenAI-compatible chat-completions endpoint (the teacher's `reqwest`
//! stack, `architehc-selfware` `src/api/mod.rs`, minus streaming — the
//! planner/resolver/recovery synthesizer only ever need one-shot JSON
//! completions).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::errors::LlmError;

use super::{ChatMessage, LlmClient};

pub struct HttpLlmClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete_json(
        &self,
        messages: Vec<ChatMessage>,
        timeout: std::time::Duration,
    ) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        seconds: timeout.as_secs(),
                    }
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Transport(format!(
                "HTTP {status}: {}",
                text.chars().take(500).collect::<String>()
            )));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidJson(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyCompletion)?;

        if content.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }

        Ok(content)
    }
}
