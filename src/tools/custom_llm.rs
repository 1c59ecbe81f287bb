//! Format C: custom-LLM socket messages
//!
//! Invocations and results travel as `response_type`-tagged events with
//! string `arguments` and `content`. Declarations reuse the flat function
//! shape tagged `custom`.

use super::{
    arguments_from_value, str_field, ToolDefinition, ToolFormat, ToolFormatAdapter,
    ToolInvocation, ToolResult,
};
use serde_json::{json, Value};

pub const TOOL_CALL_INVOCATION: &str = "tool_call_invocation";
pub const TOOL_CALL_RESULT: &str = "tool_call_result";

pub struct CustomLlm;

impl ToolFormatAdapter for CustomLlm {
    fn format(&self) -> ToolFormat {
        ToolFormat::CustomLlm
    }

    fn definition(&self, tool: &ToolDefinition) -> Value {
        json!({
            "type": "custom",
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameter_schema,
        })
    }

    fn parse_invocation(&self, message: &Value) -> Option<ToolInvocation> {
        if str_field(message, "response_type") != Some(TOOL_CALL_INVOCATION) {
            return None;
        }
        let invocation_id = str_field(message, "tool_call_id").filter(|id| !id.is_empty())?;
        let tool_name = str_field(message, "name").filter(|n| !n.is_empty())?;

        Some(ToolInvocation {
            invocation_id: invocation_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments: arguments_from_value(message.get("arguments")),
        })
    }

    fn invocation(&self, invocation: &ToolInvocation) -> Value {
        json!({
            "response_type": TOOL_CALL_INVOCATION,
            "tool_call_id": invocation.invocation_id,
            "name": invocation.tool_name,
            "arguments": Value::Object(invocation.arguments.clone()).to_string(),
        })
    }

    fn result(&self, result: &ToolResult) -> Value {
        json!({
            "response_type": TOOL_CALL_RESULT,
            "tool_call_id": result.invocation_id,
            "content": result.content_string(),
        })
    }
}
