//! Core request/response types shared across the gateway.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Message role in a chat transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Upper-case label used when flattening a transcript into prompt text.
    pub fn as_upper(self) -> &'static str {
        match self {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::Tool => "TOOL",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One message in a chat transcript. Content is already-flattened text; the
/// wire adapter is responsible for collapsing multimodal parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Required when `role` is `tool`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque JSON schema for the tool's arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Drop duplicate tool definitions by case-insensitive name, keeping the
/// first occurrence.
pub fn dedupe_tools(tools: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
    let mut seen = HashSet::new();
    tools
        .into_iter()
        .filter(|tool| seen.insert(tool.name.to_lowercase()))
        .collect()
}

/// A request as received from the wire layer, before model binding.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub request_id: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub metadata: HashMap<String, String>,
}

/// One model invocation, fully bound to a provider model. Immutable once
/// dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRequest {
    pub request_id: String,
    /// Public model id exposed to clients.
    pub model: String,
    /// Upstream model identifier the provider understands.
    pub provider_model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// How the child receives the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// The flattened prompt text on stdin.
    #[default]
    PromptStdin,
    /// The full request JSON on stdin.
    RequestJsonStdin,
}

/// What the child's stdout is expected to look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Free text, with opportunistic contract recognition.
    #[default]
    Text,
    /// Free text taken verbatim.
    TextPlain,
    /// The last non-empty line may be a JSON contract.
    TextContractFinalLine,
    /// Stdout must contain a JSON contract.
    JsonContract,
}

/// Why a response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    Error,
}

impl FinishReason {
    /// Parse a contract `finish_reason` string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(FinishReason::Stop),
            "tool_calls" => Some(FinishReason::ToolCalls),
            "length" => Some(FinishReason::Length),
            "error" => Some(FinishReason::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
        }
    }
}

/// A structured intent to invoke a named function. Arguments stay a
/// JSON-encoded string so the wire layer sees the provider's exact encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Normalized record of one successful model invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub output_text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    /// Raw stdout, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}
