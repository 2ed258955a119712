//! JSON response-contract recognition and tool-call normalization.
//!
//! Providers emit wildly different tool-call shapes; the alias tables below
//! fold them onto one structure. Argument payloads stay JSON-encoded
//! strings end to end.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::parser::{names, nested};
use crate::types::{FinishReason, ProviderResult, ToolCall, ToolDefinition};

const ID_KEYS: &[&str] = &["id", "call_id", "tool_id", "toolId"];
const NAME_KEYS: &[&str] = &["name", "tool_name", "toolName"];
const ARG_KEYS: &[&str] = &["arguments", "args", "parameters"];
const TEXT_KEYS: &[&str] = &["output_text", "text", "content"];

/// Interpretation of one parsed contract object.
#[derive(Debug, Default)]
pub struct Contract {
    pub output_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    has_contract_field: bool,
}

impl Contract {
    /// Interpret a parsed JSON value as a response contract. `None` when the
    /// value is not an object at all.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let mut has_contract_field = false;
        let mut output_text = String::new();
        for key in TEXT_KEYS {
            if let Some(text) = obj.get(*key).and_then(Value::as_str) {
                has_contract_field = true;
                output_text = text.to_string();
                break;
            }
        }

        let mut tool_calls = Vec::new();
        if let Some(entries) = obj.get("tool_calls").and_then(Value::as_array) {
            has_contract_field = true;
            for (index, entry) in entries.iter().enumerate() {
                if let Some(call) = normalize_tool_call(entry, index) {
                    tool_calls.push(call);
                }
            }
        }

        let finish_reason = obj
            .get("finish_reason")
            .and_then(Value::as_str)
            .and_then(FinishReason::parse)
            .unwrap_or(if tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            });

        Some(Self {
            output_text,
            tool_calls,
            finish_reason,
            has_contract_field,
        })
    }

    /// Whether the object carried any of the contract fields.
    pub fn has_contract_field(&self) -> bool {
        self.has_contract_field
    }

    pub fn into_result(self) -> ProviderResult {
        ProviderResult {
            output_text: self.output_text.trim().to_string(),
            tool_calls: self.tool_calls,
            finish_reason: self.finish_reason,
            raw: None,
        }
    }
}

/// Extract `(id, name, raw arguments)` from one tool-call entry, looking
/// through `function.{name,arguments,args}` as well. Shared with the nested
/// recovery walk.
pub(crate) fn tool_call_parts(entry: &Value) -> (Option<String>, Option<String>, Option<Value>) {
    let Some(obj) = entry.as_object() else {
        return (None, None, None);
    };
    let id = string_field(obj, ID_KEYS);
    let mut name = string_field(obj, NAME_KEYS);
    let mut args = ARG_KEYS.iter().find_map(|key| obj.get(*key)).cloned();
    if let Some(function) = obj.get("function").and_then(Value::as_object) {
        if name.is_none() {
            name = string_field(function, &["name"]);
        }
        if args.is_none() {
            args = ["arguments", "args"]
                .iter()
                .find_map(|key| function.get(*key))
                .cloned();
        }
    }
    (id, name, args)
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str).map(str::to_string))
}

/// Normalize one `tool_calls[]` entry. Returns `None` when no usable name
/// can be found even through nested recovery.
pub fn normalize_tool_call(entry: &Value, index: usize) -> Option<ToolCall> {
    let (mut id, mut name, mut raw_args) = tool_call_parts(entry);

    // A string argument payload may itself wrap an assistant-style reply
    // carrying the real call.
    if let Some(Value::String(inner_text)) = &raw_args {
        if let Some(inner) = nested::find_inner_tool_call(inner_text) {
            name = Some(inner.name);
            raw_args = inner.arguments;
            if id.is_none() {
                id = inner.id;
            }
        }
    }

    let name = name?;
    let arguments = normalize_arguments(raw_args);
    let id = match id {
        Some(id) if !id.is_empty() => id,
        _ => format!("call_{}", index + 1),
    };
    Some(ToolCall {
        id,
        name,
        arguments,
    })
}

/// Normalize an arguments payload into a JSON-encoded string.
///
/// Strings that look like JSON are parsed and re-serialized, which also
/// compacts whitespace-padded encodings; anything else passes through
/// verbatim. Objects and scalars are stringified.
pub(crate) fn normalize_arguments(raw: Option<Value>) -> String {
    match raw {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(parsed) => parsed.to_string(),
                    Err(_) => s,
                }
            } else {
                s
            }
        }
        Some(other) => other.to_string(),
    }
}

/// Filter and canonicalize tool calls against the declared tool set.
///
/// Undeclared calls are dropped; survivors are renamed to the declared
/// spelling and their argument keys are rewritten against the declared
/// parameter property names. An empty declared set drops every call.
pub fn apply_declared_tools(result: &mut ProviderResult, tools: &[ToolDefinition]) {
    let declared: HashMap<String, &ToolDefinition> = tools
        .iter()
        .map(|tool| (names::canonical(&tool.name), tool))
        .collect();

    result.tool_calls.retain_mut(|call| {
        let Some(tool) = declared.get(&names::canonical(&call.name)) else {
            return false;
        };
        call.name = tool.name.clone();
        call.arguments = canonicalize_argument_keys(&call.arguments, tool.parameters.as_ref());
        true
    });

    if result.tool_calls.is_empty() && result.finish_reason == FinishReason::ToolCalls {
        result.finish_reason = FinishReason::Stop;
    }
}

fn canonicalize_argument_keys(arguments: &str, parameters: Option<&Value>) -> String {
    let Ok(Value::Object(args)) = serde_json::from_str::<Value>(arguments) else {
        return arguments.to_string();
    };

    let declared_properties: HashMap<String, String> = parameters
        .and_then(|p| p.get("properties"))
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .keys()
                .map(|key| (names::canonical(key), key.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut rewritten = Map::new();
    for (key, value) in args {
        let out_key = declared_properties
            .get(&names::canonical(&key))
            .cloned()
            .unwrap_or(key);
        rewritten.insert(out_key, value);
    }
    Value::Object(rewritten).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, properties: &[&str]) -> ToolDefinition {
        let props: Map<String, Value> = properties
            .iter()
            .map(|p| (p.to_string(), json!({})))
            .collect();
        ToolDefinition {
            name: name.to_string(),
            description: None,
            parameters: Some(json!({ "type": "object", "properties": props })),
        }
    }

    #[test]
    fn recognizes_the_standard_contract() {
        let value = json!({
            "output_text": "",
            "tool_calls": [{"id": "c1", "name": "search", "arguments": "{\"q\":\"x\"}"}],
            "finish_reason": "tool_calls"
        });
        let contract = Contract::from_value(&value).unwrap();

        assert!(contract.has_contract_field());
        assert_eq!(contract.finish_reason, FinishReason::ToolCalls);
        assert_eq!(contract.tool_calls.len(), 1);
        assert_eq!(contract.tool_calls[0].id, "c1");
        assert_eq!(contract.tool_calls[0].arguments, "{\"q\":\"x\"}");
    }

    #[test]
    fn text_field_precedence_is_output_text_first() {
        let value = json!({"output_text": "a", "text": "b", "content": "c"});
        assert_eq!(Contract::from_value(&value).unwrap().output_text, "a");

        let value = json!({"text": "b", "content": "c"});
        assert_eq!(Contract::from_value(&value).unwrap().output_text, "b");

        let value = json!({"content": "c"});
        assert_eq!(Contract::from_value(&value).unwrap().output_text, "c");
    }

    #[test]
    fn non_contract_objects_are_flagged() {
        let contract = Contract::from_value(&json!({"foo": 1})).unwrap();
        assert!(!contract.has_contract_field());
        assert!(Contract::from_value(&json!([1, 2])).is_none());
    }

    #[test]
    fn finish_reason_defaults_follow_tool_calls() {
        let with_calls = json!({
            "tool_calls": [{"name": "search"}]
        });
        assert_eq!(
            Contract::from_value(&with_calls).unwrap().finish_reason,
            FinishReason::ToolCalls
        );

        let without = json!({"output_text": "hi"});
        assert_eq!(
            Contract::from_value(&without).unwrap().finish_reason,
            FinishReason::Stop
        );
    }

    #[test]
    fn id_and_name_aliases_are_recognized() {
        for entry in [
            json!({"call_id": "c9", "tool_name": "search", "args": {"q": "x"}}),
            json!({"toolId": "c9", "toolName": "search", "parameters": {"q": "x"}}),
            json!({"id": "c9", "function": {"name": "search", "arguments": {"q": "x"}}}),
        ] {
            let call = normalize_tool_call(&entry, 0).unwrap();
            assert_eq!(call.id, "c9");
            assert_eq!(call.name, "search");
            assert_eq!(call.arguments, "{\"q\":\"x\"}");
        }
    }

    #[test]
    fn missing_id_is_synthesized_from_position() {
        let entry = json!({"name": "search"});
        let call = normalize_tool_call(&entry, 2).unwrap();
        assert_eq!(call.id, "call_3");
        assert_eq!(call.arguments, "{}");
    }

    #[test]
    fn nameless_entries_are_dropped() {
        assert!(normalize_tool_call(&json!({"id": "c1"}), 0).is_none());
        assert!(normalize_tool_call(&json!("not an object"), 0).is_none());
    }

    #[test]
    fn json_looking_argument_strings_are_reserialized() {
        let entry = json!({"name": "search", "arguments": "{ \"q\" : \"x\" }"});
        let call = normalize_tool_call(&entry, 0).unwrap();
        assert_eq!(call.arguments, "{\"q\":\"x\"}");
    }

    #[test]
    fn non_json_argument_strings_pass_through_verbatim() {
        let entry = json!({"name": "search", "arguments": "just words"});
        let call = normalize_tool_call(&entry, 0).unwrap();
        assert_eq!(call.arguments, "just words");
    }

    #[test]
    fn malformed_json_argument_strings_pass_through_verbatim() {
        let entry = json!({"name": "search", "arguments": "{broken"});
        let call = normalize_tool_call(&entry, 0).unwrap();
        assert_eq!(call.arguments, "{broken");
    }

    #[test]
    fn declared_tools_rename_and_filter() {
        let mut result = ProviderResult {
            output_text: String::new(),
            tool_calls: vec![
                ToolCall {
                    id: "c1".to_string(),
                    name: "Search-Docs".to_string(),
                    arguments: "{\"Query\":\"x\"}".to_string(),
                },
                ToolCall {
                    id: "c2".to_string(),
                    name: "unknown_tool".to_string(),
                    arguments: "{}".to_string(),
                },
            ],
            finish_reason: FinishReason::ToolCalls,
            raw: None,
        };
        apply_declared_tools(&mut result, &[tool("searchDocs", &["query"])]);

        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].name, "searchDocs");
        assert_eq!(result.tool_calls[0].arguments, "{\"query\":\"x\"}");
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn dropping_every_call_downgrades_finish_reason() {
        let mut result = ProviderResult {
            output_text: String::new(),
            tool_calls: vec![ToolCall {
                id: "c1".to_string(),
                name: "unknown".to_string(),
                arguments: "{}".to_string(),
            }],
            finish_reason: FinishReason::ToolCalls,
            raw: None,
        };
        apply_declared_tools(&mut result, &[tool("searchDocs", &[])]);

        assert!(result.tool_calls.is_empty());
        assert_eq!(result.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn empty_declared_set_drops_everything() {
        let mut result = ProviderResult {
            output_text: "hi".to_string(),
            tool_calls: vec![ToolCall {
                id: "c1".to_string(),
                name: "search".to_string(),
                arguments: "{}".to_string(),
            }],
            finish_reason: FinishReason::ToolCalls,
            raw: None,
        };
        apply_declared_tools(&mut result, &[]);

        assert!(result.tool_calls.is_empty());
        assert_eq!(result.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn undeclared_argument_keys_are_kept_as_is() {
        let mut result = ProviderResult {
            output_text: String::new(),
            tool_calls: vec![ToolCall {
                id: "c1".to_string(),
                name: "search".to_string(),
                arguments: "{\"q\":\"x\",\"extra\":1}".to_string(),
            }],
            finish_reason: FinishReason::ToolCalls,
            raw: None,
        };
        apply_declared_tools(&mut result, &[tool("search", &["q"])]);

        let args: Value = serde_json::from_str(&result.tool_calls[0].arguments).unwrap();
        assert_eq!(args["q"], "x");
        assert_eq!(args["extra"], 1);
    }
}
