//! Bounded recovery of tool calls nested inside string payloads.
//!
//! Some providers double-encode their replies: a tool call's `arguments`
//! field turns out to be a whole assistant message, JSON inside a string,
//! sometimes wrapped in a fenced code block. The walk below digs such calls
//! out without trusting the input: explicit worklist, visited set on string
//! values, fixed node budget.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use crate::parser::contract;

/// Hard cap on visited nodes.
const MAX_VISITED: usize = 80;

/// String fields expanded before other children.
const PRIORITY_KEYS: &[&str] = &["response", "output_text", "text", "content"];

/// An inner tool call recovered from a nested payload.
#[derive(Debug)]
pub struct InnerToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Option<Value>,
}

/// Search `text` for a tool call hidden in nested, fenced or doubly-encoded
/// JSON. Breadth-first; returns the first hit.
pub fn find_inner_tool_call(text: &str) -> Option<InnerToolCall> {
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut visited = 0usize;
    enqueue(&mut queue, &mut seen, text);

    while let Some(candidate) = queue.pop_front() {
        if visited >= MAX_VISITED {
            return None;
        }
        visited += 1;
        for value in parsed_candidates(&candidate) {
            if let Some(found) = inspect(&value, &mut queue, &mut seen) {
                return Some(found);
            }
        }
    }
    None
}

fn enqueue(queue: &mut VecDeque<String>, seen: &mut HashSet<String>, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if seen.insert(trimmed.to_string()) {
        queue.push_back(trimmed.to_string());
    }
}

/// Parsed JSON values hiding in one string: the string itself, each fenced
/// code block, and the slice between the first `{` and the last `}`.
fn parsed_candidates(text: &str) -> Vec<Value> {
    let mut texts: Vec<String> = vec![text.to_string()];
    texts.extend(fenced_blocks(text));
    if let Some(slice) = brace_slice(text) {
        texts.push(slice);
    }

    texts
        .into_iter()
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate.trim()).ok())
        .collect()
}

fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        // an opening-fence language tag only exists when a newline precedes
        // the closing fence
        let body_start = match (after.find('\n'), after.find("```")) {
            (Some(newline), Some(close)) if newline < close => newline + 1,
            _ => 0,
        };
        let Some(end) = after[body_start..].find("```") else {
            break;
        };
        blocks.push(after[body_start..body_start + end].to_string());
        rest = &after[body_start + end + 3..];
    }
    blocks
}

fn brace_slice(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

fn inspect(
    value: &Value,
    queue: &mut VecDeque<String>,
    seen: &mut HashSet<String>,
) -> Option<InnerToolCall> {
    match value {
        Value::Array(items) => {
            for item in items {
                if let Some(found) = inspect(item, queue, seen) {
                    return Some(found);
                }
            }
            None
        }
        Value::Object(obj) => {
            if let Some(entries) = obj.get("tool_calls").and_then(Value::as_array) {
                for entry in entries {
                    let (id, name, arguments) = contract::tool_call_parts(entry);
                    if let Some(name) = name {
                        return Some(InnerToolCall {
                            id,
                            name,
                            arguments,
                        });
                    }
                }
            }

            if let Some(text) = obj.get("response").and_then(Value::as_str) {
                enqueue(queue, seen, text);
            }
            if let Some(content) = obj
                .get("message")
                .and_then(|message| message.get("content"))
                .and_then(Value::as_str)
            {
                enqueue(queue, seen, content);
            }
            for key in ["output_text", "text", "content"] {
                if let Some(text) = obj.get(key).and_then(Value::as_str) {
                    enqueue(queue, seen, text);
                }
            }

            for (key, child) in obj {
                if key == "message" || PRIORITY_KEYS.contains(&key.as_str()) {
                    continue;
                }
                collect_strings(child, queue, seen);
            }
            None
        }
        _ => None,
    }
}

fn collect_strings(value: &Value, queue: &mut VecDeque<String>, seen: &mut HashSet<String>) {
    match value {
        Value::String(text) => enqueue(queue, seen, text),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, queue, seen);
            }
        }
        Value::Object(obj) => {
            for child in obj.values() {
                collect_strings(child, queue, seen);
            }
        }
        _ => {}
    }
}
