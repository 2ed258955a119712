//! OpenAI chat-completions wire adapter.
//!
//! Translates the wire shapes into [`IncomingRequest`] and back. Multimodal
//! content arrays are flattened to text here; the core only sees flat
//! transcripts.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::http::{error_response, map_error, AppState};
use crate::types::{
    dedupe_tools, ChatMessage, FinishReason, IncomingRequest, ProviderResult, Role, ToolDefinition,
};

#[derive(Debug, Deserialize)]
pub(super) struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(default)]
    tools: Option<Vec<WireTool>>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tool_call_id: Option<String>,
}

/// Wire content: a plain string or an array of typed parts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl WireContent {
    /// Flatten multimodal parts to text; non-text parts are dropped.
    fn flatten(self) -> String {
        match self {
            WireContent::Text(text) => text,
            WireContent::Parts(parts) => parts
                .into_iter()
                .filter(|part| part.kind.is_empty() || part.kind == "text")
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireTool {
    #[serde(rename = "type", default)]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Serialize)]
struct Choice {
    index: u32,
    message: AssistantMessage,
    finish_reason: FinishReason,
}

#[derive(Debug, Serialize)]
struct AssistantMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

pub(super) async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    if request.stream.unwrap_or(false) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "streaming_unsupported",
            "Response streaming is not supported",
        );
    }

    let request_id = request
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("request_id").cloned())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let messages: Vec<ChatMessage> = request
        .messages
        .into_iter()
        .map(|message| ChatMessage {
            role: message.role,
            content: message.content.map(WireContent::flatten).unwrap_or_default(),
            name: message.name,
            tool_call_id: message.tool_call_id,
        })
        .collect();

    let tools = dedupe_tools(
        request
            .tools
            .unwrap_or_default()
            .into_iter()
            .filter(|tool| tool.kind.is_empty() || tool.kind == "function")
            .map(|tool| ToolDefinition {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
            })
            .filter(|tool| !tool.name.trim().is_empty())
            .collect(),
    );

    let prompt_chars: usize = messages.iter().map(|message| message.content.len()).sum();
    let incoming = IncomingRequest {
        request_id: request_id.clone(),
        messages,
        tools,
        metadata: request.metadata.unwrap_or_default(),
    };

    match state.registry.run_model(&request.model, incoming).await {
        Ok(result) => {
            Json(completion_response(&request.model, &request_id, result, prompt_chars))
                .into_response()
        }
        Err(err) => map_error(&err),
    }
}

fn completion_response(
    model: &str,
    request_id: &str,
    result: ProviderResult,
    prompt_chars: usize,
) -> ChatCompletionResponse {
    let completion_chars = result.output_text.len();
    let tool_calls: Vec<WireToolCall> = result
        .tool_calls
        .into_iter()
        .map(|call| WireToolCall {
            id: call.id,
            kind: "function",
            function: WireFunctionCall {
                name: call.name,
                arguments: call.arguments,
            },
        })
        .collect();

    let content = if result.output_text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(result.output_text)
    };

    let prompt_tokens = estimate_tokens(prompt_chars);
    let completion_tokens = estimate_tokens(completion_chars);
    ChatCompletionResponse {
        id: format!("chatcmpl-{request_id}"),
        object: "chat.completion",
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: "assistant",
                content,
                tool_calls,
            },
            finish_reason: result.finish_reason,
        }],
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    }
}

/// Rough usage estimate: four characters per token.
fn estimate_tokens(chars: usize) -> u64 {
    chars.div_ceil(4) as u64
}

pub(super) async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let created = Utc::now().timestamp();
    let data: Vec<Value> = state
        .registry
        .list_models()
        .into_iter()
        .map(|model| {
            serde_json::json!({
                "id": model.id,
                "object": "model",
                "created": created,
                "owned_by": model.provider_id,
            })
        })
        .collect();
    Json(serde_json::json!({ "object": "list", "data": data }))
}
