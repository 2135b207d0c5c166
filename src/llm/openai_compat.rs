//! Generic OpenAI-compatible provider
//!
//! Serves OpenAI itself and OpenRouter, both speaking the chat completions
//! format. Image models (`dall-e-*`) go to the images endpoint instead and
//! answer with the image URL.
//!
//! SECURITY: Credentials are only sent to the configured endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{CompletionOptions, LlmError, LlmProvider, ProviderOutput};

/// Authentication method for the API
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Bearer token in Authorization header
    BearerToken(String),
    /// API key in a custom header
    ApiKeyHeader { header: String, key: String },
}

/// Configuration for an OpenAI-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    /// Registry name ("openai", "openrouter")
    pub name: String,
    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub auth: AuthMethod,
    /// Used when a request does not set `max_tokens`
    pub max_tokens: u32,
    pub custom_headers: Vec<(String, String)>,
}

impl OpenAiCompatConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            max_tokens: 4096,
            custom_headers: Vec::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn images_url(&self) -> String {
        format!("{}/images/generations", self.base_url)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

// ============================================================================
// Provider
// ============================================================================

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatProvider {
    pub fn new(config: OpenAiCompatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &OpenAiCompatConfig {
        &self.config
    }

    fn is_image_model(model: &str) -> bool {
        model.starts_with("dall-e")
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = match &self.config.auth {
            AuthMethod::BearerToken(token) => {
                request.header("Authorization", format!("Bearer {}", token))
            }
            AuthMethod::ApiKeyHeader { header, key } => request.header(header.as_str(), key),
        };
        self.config
            .custom_headers
            .iter()
            .fold(request, |req, (name, value)| {
                req.header(name.as_str(), value.as_str())
            })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, LlmError> {
        let response = self
            .authorize(self.client.post(url))
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(LlmError::from_network_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::debug!(provider = %self.config.name, %status, "request failed");
            return Err(LlmError::from_http_status(status, error_text));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    async fn chat(
        &self,
        model: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderOutput, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = options.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model,
            messages,
            max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: options.temperature,
        };
        let response: ChatResponse = self.post(&self.config.chat_url(), &request).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let output = ProviderOutput::text(content);
        Ok(match response.usage {
            Some(usage) => output.with_usage(usage.prompt_tokens, usage.completion_tokens),
            None => output,
        })
    }

    async fn generate_image(&self, model: &str, prompt: &str) -> Result<ProviderOutput, LlmError> {
        let request = ImageRequest {
            model,
            prompt,
            n: 1,
        };
        let response: ImageResponse = self.post(&self.config.images_url(), &request).await?;

        let image = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no image in response".to_string()))?;
        let url = image
            .url
            .ok_or_else(|| LlmError::InvalidResponse("image response without url".to_string()))?;

        // Images carry no token usage; the router estimates
        Ok(ProviderOutput::text(match image.revised_prompt {
            Some(revised) => format!("{url}\n\n{revised}"),
            None => url,
        }))
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderOutput, LlmError> {
        let started = Instant::now();
        let mut output = if Self::is_image_model(model) {
            self.generate_image(model, prompt).await?
        } else {
            self.chat(model, prompt, options).await?
        };
        output.latency_ms = Some(started.elapsed().as_millis() as u64);
        Ok(output)
    }
}
