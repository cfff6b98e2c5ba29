//! OpenAI-compatible chat-completions synthesizer
//!
//! Sends the synthesis payload as JSON in the user message and asks for a
//! JSON object reply of the form `{"narrative_summary": "..."}`.
//!
//! # API Reference
//! - Endpoint: `{base_url}/chat/completions`
//! - Auth: optional bearer token

use super::{SynthesisError, SynthesisPayload, SynthesisResponse, Synthesizer};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// User-Agent header sent with every request
const USER_AGENT: &str = concat!("pdi-vd/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in a rejection message
const MAX_ERROR_BODY: usize = 512;

const SYSTEM_PROMPT: &str = "You write executive summaries of pharmaceutical intelligence. \
The user message is a JSON object with merged facts, parameter scores and route verdicts for one \
category of a drug. Reply with a JSON object {\"narrative_summary\": string} and nothing else. \
Do not introduce facts that are not in the input.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// HTTP synthesizer for any OpenAI-compatible endpoint
pub struct HttpSynthesizer {
    http_client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpSynthesizer {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`)
    ///
    /// The per-attempt timeout is enforced by the retry policy, not here.
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Result<Self, SynthesisError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));

        let http_client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| SynthesisError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, payload: &SynthesisPayload) -> Result<SynthesisResponse, SynthesisError> {
        let user_content = serde_json::to_string(payload)
            .map_err(|e| SynthesisError::Malformed(format!("payload serialization failed: {}", e)))?;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_content,
                },
            ],
            temperature: 0.2,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let mut request = self.http_client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(endpoint = %self.endpoint, category = %payload.category, "Sending synthesis request");

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(rejection(status, &text));
        }

        parse_completion(&text)
    }
}

fn map_transport_error(err: reqwest::Error) -> SynthesisError {
    if err.is_timeout() {
        SynthesisError::Timeout(0)
    } else {
        SynthesisError::Transport(err.to_string())
    }
}

fn rejection(status: StatusCode, body: &str) -> SynthesisError {
    let mut message: String = body.chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("no body").to_string();
    }
    SynthesisError::Rejected {
        status: status.as_u16(),
        message,
    }
}

/// Extract `{narrative_summary}` from a chat-completions response body
pub fn parse_completion(body: &str) -> Result<SynthesisResponse, SynthesisError> {
    let completion: ChatResponse =
        serde_json::from_str(body).map_err(|e| SynthesisError::Malformed(format!("not a chat completion: {}", e)))?;

    let content = completion
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| SynthesisError::Malformed("completion has no choices".to_string()))?;

    serde_json::from_str::<SynthesisResponse>(strip_code_fence(&content))
        .map_err(|e| SynthesisError::Malformed(format!("content is not {{narrative_summary}}: {}", e)))
}

/// Some models wrap JSON replies in a markdown code fence
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
