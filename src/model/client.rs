//! Reasoning backend client over an OpenAI-compatible chat completions API.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Model client errors.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("API error {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("Reasoning backend timed out after {0}s")]
    Timeout(u64),
}

impl ModelError {
    /// Network errors, timeouts, rate limits and server errors are worth one
    /// more attempt; anything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => *status == 429 || *status >= 500,
            Self::ParseError(_) => false,
        }
    }
}

/// Structured completion: `complete(system, user)` returns a JSON value the
/// planner maps onto an action plan.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn complete(&self, system_context: &str, user_context: &str) -> Result<Value, ModelError>;
}

/// Configuration for the reasoning model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub extra_body: HashMap<String, Value>,
    /// Request `response_format = json_object`.
    pub json_mode: bool,
    /// Upper bound on one completion request.
    pub timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model_name: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            max_tokens: 1500,
            temperature: 0.3,
            top_p: 0.85,
            extra_body: HashMap::new(),
            json_mode: true,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ModelConfig {
    /// Read `MODEL_BASE_URL`, `MODEL_API_KEY` and `MODEL_NAME`, keeping
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("MODEL_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(key) = env::var("MODEL_API_KEY") {
            config.api_key = key;
        }
        if let Ok(name) = env::var("MODEL_NAME") {
            config.model_name = name;
        }
        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Disable `response_format` for servers that reject it.
    pub fn without_json_mode(mut self) -> Self {
        self.json_mode = false;
        self
    }
}

/// OpenAI API response structures.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<Value>,
}

/// Client for OpenAI-compatible chat models.
///
/// Makes exactly one attempt per call; retry policy belongs to the planner.
pub struct ModelClient {
    config: ModelConfig,
    client: Client,
}

impl ModelClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ModelConfig::default())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn request_body(&self, messages: &[Value]) -> Value {
        let mut body = json!({
            "messages": messages,
            "model": self.config.model_name,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
        });

        if let Value::Object(ref mut map) = body {
            if self.config.json_mode {
                map.insert("response_format".to_string(), json!({"type": "json_object"}));
            }
            for (key, value) in &self.config.extra_body {
                map.insert(key.clone(), value.clone());
            }
        }
        body
    }

    /// Send one chat completion and return the message content as JSON.
    pub async fn request(&self, messages: &[Value]) -> Result<Value, ModelError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = self.request_body(messages);

        match tokio::time::timeout(self.config.timeout, self.send_request(&url, &body)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(self.config.timeout.as_secs())),
        }
    }

    async fn send_request(&self, url: &str, body: &Value) -> Result<Value, ModelError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::ParseError("No choices in response".to_string()))?;

        match content {
            Value::String(text) => parse_json_content(&text),
            Value::Object(_) => Ok(content),
            other => Err(ModelError::ParseError(format!(
                "Unexpected content format: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl ReasoningBackend for ModelClient {
    async fn complete(&self, system_context: &str, user_context: &str) -> Result<Value, ModelError> {
        let messages = vec![
            MessageBuilder::create_system_message(system_context),
            MessageBuilder::create_user_message(user_context),
        ];
        self.request(&messages).await
    }
}

/// Parse model text as JSON, unwrapping markdown fences if present.
pub fn parse_json_content(text: &str) -> Result<Value, ModelError> {
    let candidate = extract_json_from_response(text)
        .ok_or_else(|| ModelError::ParseError(format!("No JSON object in response: {}", preview(text))))?;
    serde_json::from_str(candidate)
        .map_err(|e| ModelError::ParseError(format!("Invalid JSON ({}): {}", e, preview(text))))
}

/// Locate the JSON object in a model response.
///
/// Tries, in order: the whole text, a ```json fenced block, any fenced
/// block starting with `{`, and finally the outermost `{...}` span.
pub fn extract_json_from_response(response: &str) -> Option<&str> {
    let trimmed = response.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = trimmed[start + 3..].trim_start();
        if after.starts_with('{') {
            if let Some(end) = after.find("```") {
                return Some(after[..end].trim());
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

/// Builds chat messages.
pub struct MessageBuilder;

impl MessageBuilder {
    pub fn create_system_message(content: &str) -> Value {
        json!({
            "role": "system",
            "content": content
        })
    }

    pub fn create_user_message(text: &str) -> Value {
        json!({
            "role": "user",
            "content": text
        })
    }

    pub fn create_assistant_message(content: &str) -> Value {
        json!({
            "role": "assistant",
            "content": content
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_default() {
        let config = ModelConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000/v1");
        assert!(config.json_mode);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_request_body_asks_for_json() {
        let client = ModelClient::new(ModelConfig::default().with_model_name("m"));
        let body = client.request_body(&[MessageBuilder::create_user_message("hi")]);
        assert_eq!(body["model"], "m");
        assert_eq!(body["response_format"]["type"], "json_object");

        let plain = ModelClient::new(ModelConfig::default().without_json_mode());
        assert!(plain.request_body(&[]).get("response_format").is_none());
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json_from_response(r#"{"a":1}"#), Some(r#"{"a":1}"#));
        assert_eq!(
            extract_json_from_response("Here:\n```json\n{\"a\": 1}\n```\nDone"),
            Some("{\"a\": 1}")
        );
        assert_eq!(
            extract_json_from_response("```\n{\"b\": 2}\n```"),
            Some("{\"b\": 2}")
        );
        assert_eq!(
            extract_json_from_response("The plan is {\"c\": 3} ok"),
            Some("{\"c\": 3}")
        );
        assert_eq!(extract_json_from_response("no json here"), None);
    }

    #[test]
    fn test_parse_json_content_errors() {
        assert!(matches!(
            parse_json_content("nothing"),
            Err(ModelError::ParseError(_))
        ));
        assert!(matches!(
            parse_json_content("{not: valid}"),
            Err(ModelError::ParseError(_))
        ));
        assert_eq!(parse_json_content("{\"x\": true}").unwrap()["x"], true);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ModelError::Timeout(30).is_transient());
        assert!(ModelError::ApiError { status: 503, body: String::new() }.is_transient());
        assert!(ModelError::ApiError { status: 429, body: String::new() }.is_transient());
        assert!(!ModelError::ApiError { status: 401, body: String::new() }.is_transient());
        assert!(!ModelError::ParseError("bad".into()).is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let client = ModelClient::new(
            ModelConfig::default()
                .with_base_url("http://127.0.0.1:9")
                .with_timeout(Duration::from_secs(5)),
        );
        let err = client.complete("system", "user").await.unwrap_err();
        assert!(err.is_transient());
    }
}
