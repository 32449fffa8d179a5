use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RefineConfig;

pub const SCHEMA_FORMAT_NAME: &str = "RefinedApiResponse";

#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    JsonSchema(Value),
    JsonObject,
}

impl OutputFormat {
    pub fn label(&self) -> &'static str {
        match self {
            OutputFormat::JsonSchema(_) => "json_schema",
            OutputFormat::JsonObject => "json_object",
        }
    }

    fn to_payload(&self) -> Value {
        match self {
            OutputFormat::JsonSchema(schema) => json!({
                "type": "json_schema",
                "name": SCHEMA_FORMAT_NAME,
                "schema": schema,
            }),
            OutputFormat::JsonObject => json!({ "type": "json_object" }),
        }
    }
}

/// One request to the text-generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationCall {
    pub model: String,
    pub prompt: String,
    pub format: OutputFormat,
    pub max_output_tokens: u64,
    pub temperature: f64,
    pub timeout: Duration,
}

impl GenerationCall {
    pub fn new(config: &RefineConfig, prompt: String, format: OutputFormat) -> Self {
        Self {
            model: config.model.clone(),
            prompt,
            format,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            timeout: config.call_timeout,
        }
    }

    pub fn payload(&self) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_output_tokens": self.max_output_tokens,
            "text": { "format": self.format.to_payload() },
            "input": [{
                "role": "user",
                "content": [{ "type": "input_text", "text": self.prompt }],
            }],
        })
    }
}

/// Raw HTTP outcome; the body is kept as text so non-JSON error pages survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReply {
    pub status: u16,
    pub body: String,
}

impl ServiceReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Transport(String),
}

pub trait GenerationService: Send + Sync {
    fn generate(&self, call: &GenerationCall) -> Result<ServiceReply, ServiceError>;
}

/// Client for the `/responses` endpoint of an OpenAI-compatible API.
pub struct OpenAiResponsesClient {
    http: HttpClient,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiResponsesClient {
    pub fn new(config: &RefineConfig) -> Self {
        Self {
            http: HttpClient::new(),
            endpoint: config.responses_endpoint(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl GenerationService for OpenAiResponsesClient {
    fn generate(&self, call: &GenerationCall) -> Result<ServiceReply, ServiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ServiceError::Transport("no API key configured".to_string()));
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .timeout(call.timeout)
            .json(&call.payload())
            .send()
            .map_err(|err| transport_error(err, call.timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| transport_error(err, call.timeout))?;
        debug!(status, bytes = body.len(), "responses call finished");
        Ok(ServiceReply { status, body })
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> ServiceError {
    if err.is_timeout() {
        return ServiceError::Timeout(timeout);
    }
    ServiceError::Transport(err.to_string())
}

/// Sends `call`; when the service rejects the schema-constrained format with
/// a 400, retries exactly once in plain JSON-object mode. The retry's timeout
/// comes from `fallback_timeout`, asked only once the first reply is in; `None`
/// skips the retry and returns the 400.
pub fn generate_with_fallback<S, F>(
    service: &S,
    call: &GenerationCall,
    fallback_timeout: F,
) -> Result<ServiceReply, ServiceError>
where
    S: GenerationService + ?Sized,
    F: FnOnce() -> Option<Duration>,
{
    let reply = service.generate(call)?;
    if reply.status != 400 || !matches!(call.format, OutputFormat::JsonSchema(_)) {
        return Ok(reply);
    }
    let fallback_format = OutputFormat::JsonObject;
    let Some(timeout) = fallback_timeout() else {
        warn!(
            rejected = call.format.label(),
            retry = fallback_format.label(),
            "output format rejected; no time left to retry"
        );
        return Ok(reply);
    };
    warn!(
        rejected = call.format.label(),
        retry = fallback_format.label(),
        "output format rejected; retrying once"
    );
    let fallback = GenerationCall {
        format: fallback_format,
        timeout,
        ..call.clone()
    };
    service.generate(&fallback)
}

/// Pulls the model text out of a Responses API envelope: the top-level
/// `output_text` shortcut when present, else the first text part of the first
/// `message` item that has one.
pub fn extract_output_text(response: &Value) -> String {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.to_string();
        }
    }

    let rows = response
        .get("output")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for row in rows {
        if row.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let Some(content) = row.get("content").and_then(Value::as_array) else {
            continue;
        };
        for part in content {
            match part.get("type").and_then(Value::as_str) {
                Some("output_text") => {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        return text.to_string();
                    }
                }
                Some("output_json") => {
                    let structured = part
                        .get("json")
                        .filter(|value| !value.is_null())
                        .or_else(|| part.get("data").filter(|value| !value.is_null()));
                    if let Some(structured) = structured {
                        return serde_json::to_string_pretty(structured).unwrap_or_default();
                    }
                }
                _ => {}
            }
        }
    }
    String::new()
}
