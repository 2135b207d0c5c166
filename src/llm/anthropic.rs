//! Anthropic Messages API provider
//!
//! SECURITY: The API key is only sent to the configured Anthropic endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{CompletionOptions, LlmError, LlmProvider, ProviderOutput};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<RequestMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn send_request(&self, request: &MessagesRequest<'_>) -> Result<MessagesResponse, LlmError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(LlmError::from_network_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status, error_text));
        }

        response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

fn collect_text(blocks: Vec<ContentBlock>) -> String {
    blocks
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderOutput, LlmError> {
        let started = Instant::now();
        let request = MessagesRequest {
            model,
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            system: options.system_prompt.as_deref(),
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
        };

        let response = self.send_request(&request).await?;
        let text = collect_text(response.content);
        if text.is_empty() {
            return Err(LlmError::InvalidResponse(
                "no text content in response".to_string(),
            ));
        }

        let mut output =
            ProviderOutput::text(text).with_usage(response.usage.input_tokens, response.usage.output_tokens);
        output.latency_ms = Some(started.elapsed().as_millis() as u64);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_empty_system() {
        let request = MessagesRequest {
            model: "claude-3-5-sonnet-20241022",
            max_tokens: 100,
            system: None,
            messages: vec![RequestMessage {
                role: "user",
                content: "hi",
            }],
            temperature: Some(0.2),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_parse_response_skips_non_text_blocks() {
        let body = r#"{
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "t1", "name": "x", "input": {}},
                {"type": "text", "text": " there"}
            ],
            "usage": {"input_tokens": 5, "output_tokens": 2}
        }"#;
        let response: MessagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.usage.input_tokens, 5);
        assert_eq!(collect_text(response.content), "Hello there");
    }
}
