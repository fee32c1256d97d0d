//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Covers OpenAI itself and compatible local or hosted servers. Constructed
//! once at startup; `reqwest::Client` is an `Arc` internally so cloning the
//! provider is cheap.

use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, LlmError, LlmProvider};

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| LlmError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_base_url, model, temperature, api_key })
    }

    async fn send(&self, payload: &ChatCompletionRequest) -> Result<String, LlmError> {
        debug!(
            "Sending LLM request: model={} messages={} json_mode={}",
            payload.model,
            payload.messages.len(),
            payload.response_format.is_some()
        );

        let mut req = self.client.post(&self.api_base_url).json(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!("LLM HTTP request failed: {e}");
            LlmError::Request(e.to_string())
        })?;
        let response = check_status(response).await?;

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| LlmError::Request(format!("failed to parse response body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::BadOutput("empty or missing content in response".into()))
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage { role: m.role.clone(), content: m.content.clone() })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::wire_messages(messages),
            temperature: Some(self.temperature),
            response_format: None,
        };
        self.send(&payload).await
    }

    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        schema_name: &str,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::wire_messages(messages),
            temperature: Some(self.temperature),
            response_format: Some(ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaSpec {
                    name: schema_name.to_string(),
                    schema: schema.clone(),
                },
            }),
        };
        self.send(&payload).await
    }
}

// ---------------------------------------------------------------------------
// Private wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaSpec,
}

#[derive(Debug, Serialize)]
struct JsonSchemaSpec {
    name: String,
    schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!("LLM request returned HTTP error: {message}");
    Err(LlmError::Request(message))
}
