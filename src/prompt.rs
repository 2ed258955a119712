//! Prompt assembly for prompt-stdin providers.
//!
//! Transcripts are flattened into role-labelled text blocks. When a request
//! declares tools, the prompt ends with an advertisement block describing
//! the JSON contract the model must emit.

use handlebars::Handlebars;
use serde_json::json;

use crate::error::{GatewayError, Result};
use crate::types::{ChatMessage, ToolDefinition};

/// Instruction block appended for tool-capable requests. The shape shown to
/// the model is exactly the contract the output parser recognizes.
const TOOL_ADVERTISEMENT_TEMPLATE: &str = r#"The following tools are available to you:

{{json tools}}

To call a tool, respond with a single JSON object and nothing else:
{"output_text": "", "tool_calls": [{"id": "call_1", "name": "<tool_name>", "arguments": "{\"<param>\": \"<value>\"}"}], "finish_reason": "tool_calls"}

To answer directly, respond with:
{"output_text": "<your answer>", "finish_reason": "stop"}"#;

/// Renders prompts for CLI providers.
pub struct PromptBuilder {
    handlebars: Handlebars<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("json", Box::new(json_helper));
        handlebars
            .register_template_string("tool_advertisement", TOOL_ADVERTISEMENT_TEMPLATE)
            .map_err(|e| GatewayError::Config(format!("prompt template registration: {e}")))?;
        Ok(Self { handlebars })
    }

    /// Render the chat transcript as plain prompt text: one
    /// `"<ROLE>:\n<content>"` block per message, blank-line separated.
    pub fn flatten_messages(&self, messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .map(|message| format!("{}:\n{}", message.role.as_upper(), message.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Render the tool-advertisement block for the given tool set.
    pub fn tool_advertisement(&self, tools: &[ToolDefinition]) -> Result<String> {
        self.handlebars
            .render("tool_advertisement", &json!({ "tools": tools }))
            .map_err(|e| GatewayError::Config(format!("tool advertisement rendering: {e}")))
    }

    /// Full prompt: transcript plus, when tools are declared, the contract
    /// the model must emit.
    pub fn build_prompt(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<String> {
        let mut prompt = self.flatten_messages(messages);
        if !tools.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.tool_advertisement(tools)?);
        }
        Ok(prompt)
    }
}

fn json_helper(
    h: &handlebars::Helper,
    _: &handlebars::Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let param = h.param(0).ok_or_else(|| {
        handlebars::RenderErrorReason::Other("json helper requires a parameter".to_string())
    })?;

    let json_string = serde_json::to_string(param.value()).map_err(|e| {
        handlebars::RenderErrorReason::Other(format!("JSON serialization failed: {e}"))
    })?;

    out.write(&json_string)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn message(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_string(),
            name: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn flattens_transcript_with_role_labels() {
        let builder = PromptBuilder::new().unwrap();
        let messages = vec![
            message(Role::System, "be terse"),
            message(Role::User, "hi"),
        ];

        assert_eq!(
            builder.flatten_messages(&messages),
            "SYSTEM:\nbe terse\n\nUSER:\nhi"
        );
    }

    #[test]
    fn advertisement_embeds_the_tool_array() {
        let builder = PromptBuilder::new().unwrap();
        let tools = vec![ToolDefinition {
            name: "search".to_string(),
            description: Some("look things up".to_string()),
            parameters: Some(serde_json::json!({"properties": {"q": {}}})),
        }];

        let block = builder.tool_advertisement(&tools).unwrap();
        assert!(block.contains("\"name\":\"search\""));
        assert!(block.contains("\"tool_calls\""));
        assert!(block.contains("\"finish_reason\": \"tool_calls\""));
    }

    #[test]
    fn prompt_without_tools_has_no_advertisement() {
        let builder = PromptBuilder::new().unwrap();
        let prompt = builder
            .build_prompt(&[message(Role::User, "hi")], &[])
            .unwrap();

        assert_eq!(prompt, "USER:\nhi");
    }

    #[test]
    fn prompt_with_tools_ends_with_the_contract() {
        let builder = PromptBuilder::new().unwrap();
        let tools = vec![ToolDefinition {
            name: "search".to_string(),
            description: None,
            parameters: None,
        }];
        let prompt = builder
            .build_prompt(&[message(Role::User, "hi")], &tools)
            .unwrap();

        assert!(prompt.starts_with("USER:\nhi\n\n"));
        assert!(prompt.contains("The following tools are available"));
    }
}
