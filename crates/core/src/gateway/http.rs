//! OpenAI-compatible chat-completions client.
//!
//! The tool catalog is sent as function tools, plus one extra `request_clarification` function.
//! A tool call in the reply becomes a [`Directive::Invoke`] (or [`Directive::Clarify`]); plain
//! content becomes [`Directive::Conclude`].

use super::{Directive, GatewayError, GatewayRequest, GatewayResult, ReasoningService};
use crate::constants::DEFAULT_GATEWAY_MODEL;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const CLARIFICATION_FUNCTION: &str = "request_clarification";

const SYSTEM_PROMPT: &str = "You coordinate medication safety checks. You do not approve or \
    block orders yourself. Choose which safety tool to run next, ask the clinician a question \
    when the drug or dose is ambiguous, or reply with a brief summary once the relevant tools \
    have run.";

pub struct HttpReasoningService {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpReasoningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReasoningService")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpReasoningService {
    /// Creates a client for `base_url` (e.g. `https://api.openai.com/v1`).
    ///
    /// The reqwest timeout is a backstop; the gateway applies its own per-call timeout.
    pub fn new(
        base_url: &str,
        model: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.unwrap_or_else(|| DEFAULT_GATEWAY_MODEL.to_string()),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chat(&self, body: Value) -> GatewayResult<ChatResponse> {
        let mut request = self.http_client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Unavailable(format!("request timed out: {e}"))
            } else {
                GatewayError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!("HTTP {status}")));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

fn tools_payload(request: &GatewayRequest) -> Vec<Value> {
    let mut tools: Vec<Value> = request
        .catalog
        .iter()
        .map(|spec| {
            json!({
                "type": "function",
                "function": {
                    "name": spec.name.as_str(),
                    "description": spec.description,
                    "parameters": spec.input_schema,
                }
            })
        })
        .collect();
    tools.push(json!({
        "type": "function",
        "function": {
            "name": CLARIFICATION_FUNCTION,
            "description": "Ask the clinician a question when the order is ambiguous.",
            "parameters": {
                "type": "object",
                "required": ["question"],
                "properties": {"question": {"type": "string"}}
            }
        }
    }));
    tools
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize, Serialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize, Serialize)]
struct FunctionCall {
    name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    arguments: String,
}

fn directive_from_response(response: ChatResponse) -> GatewayResult<Directive> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| GatewayError::InvalidResponse("no choices in response".into()))?;

    if let Some(call) = message.tool_calls.into_iter().next() {
        let arguments: Value = if call.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                GatewayError::MalformedDirective(format!(
                    "arguments for {} are not JSON: {e}",
                    call.function.name
                ))
            })?
        };

        if call.function.name == CLARIFICATION_FUNCTION {
            let question = arguments
                .get("question")
                .and_then(|q| q.as_str())
                .unwrap_or_default()
                .to_string();
            return Ok(Directive::Clarify { question });
        }

        return Ok(Directive::Invoke {
            tool: call.function.name,
            arguments,
        });
    }

    match message.content {
        Some(content) if !content.trim().is_empty() => Ok(Directive::Conclude {
            summary: content.trim().to_string(),
        }),
        _ => Err(GatewayError::InvalidResponse(
            "response has neither a tool call nor content".into(),
        )),
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn next_directive(&self, request: &GatewayRequest) -> GatewayResult<Directive> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": request.prompt()},
            ],
            "tools": tools_payload(request),
            "tool_choice": "auto",
        });
        tracing::debug!(session_id = %request.session_id, turn = request.turn, "requesting directive");
        directive_from_response(self.chat(body).await?)
    }

    async fn compose(&self, prompt: &str) -> GatewayResult<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You write clear, accurate patient medication leaflets."},
                {"role": "user", "content": prompt},
            ],
        });
        let response = self.chat(body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GatewayError::InvalidResponse("empty completion".into()))
    }
}
