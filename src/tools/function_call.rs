//! Format A: function calling
//!
//! Declarations are `{type:"function", name, description, parameters}`.
//! Calls arrive as `{id, type:"function", function:{name, arguments}}` with
//! `arguments` a JSON-encoded string; results go back as tool-role messages.

use super::{
    arguments_from_value, str_field, ToolDefinition, ToolFormat, ToolFormatAdapter,
    ToolInvocation, ToolResult,
};
use serde_json::{json, Value};

pub struct FunctionCall;

impl ToolFormatAdapter for FunctionCall {
    fn format(&self) -> ToolFormat {
        ToolFormat::FunctionCall
    }

    fn definition(&self, tool: &ToolDefinition) -> Value {
        json!({
            "type": "function",
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameter_schema,
        })
    }

    fn parse_invocation(&self, message: &Value) -> Option<ToolInvocation> {
        if let Some(kind) = str_field(message, "type") {
            if kind != "function" {
                return None;
            }
        }
        let function = message.get("function").filter(|f| f.is_object())?;
        let tool_name = str_field(function, "name").filter(|n| !n.is_empty())?;
        let invocation_id = str_field(message, "id").filter(|id| !id.is_empty())?;

        Some(ToolInvocation {
            invocation_id: invocation_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments: arguments_from_value(function.get("arguments")),
        })
    }

    fn invocation(&self, invocation: &ToolInvocation) -> Value {
        json!({
            "id": invocation.invocation_id,
            "type": "function",
            "function": {
                "name": invocation.tool_name,
                "arguments": Value::Object(invocation.arguments.clone()).to_string(),
            }
        })
    }

    fn result(&self, result: &ToolResult) -> Value {
        json!({
            "role": "tool",
            "tool_call_id": result.invocation_id,
            "content": result.content_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invocation() {
        let call = json!({
            "id": "call_abc",
            "type": "function",
            "function": {"name": "search_customer", "arguments": "{\"q\":\"acme\"}"}
        });
        let invocation = FunctionCall.parse_invocation(&call).unwrap();
        assert_eq!(invocation.invocation_id, "call_abc");
        assert_eq!(invocation.tool_name, "search_customer");
        assert_eq!(invocation.arguments["q"], "acme");
    }

    #[test]
    fn test_bad_arguments_yield_empty_map() {
        let call = json!({
            "id": "call_abc",
            "type": "function",
            "function": {"name": "search_customer", "arguments": "{not json"}
        });
        let invocation = FunctionCall.parse_invocation(&call).unwrap();
        assert!(invocation.arguments.is_empty());
    }

    #[test]
    fn test_non_calls_are_not_invocations() {
        assert!(FunctionCall.parse_invocation(&json!({"role": "assistant", "content": "hi"})).is_none());
        assert!(FunctionCall
            .parse_invocation(&json!({"id": "x", "type": "web_search", "function": {"name": "f"}}))
            .is_none());
        assert!(FunctionCall.parse_invocation(&json!(null)).is_none());
    }

    #[test]
    fn test_invocation_round_trip() {
        let call = json!({
            "id": "call_1",
            "type": "function",
            "function": {"name": "f", "arguments": "{\"n\":2}"}
        });
        let invocation = FunctionCall.parse_invocation(&call).unwrap();
        assert_eq!(FunctionCall.invocation(&invocation), call);
    }

    #[test]
    fn test_result_message() {
        let result = ToolResult::ok("call_1", json!({"count": 3}));
        assert_eq!(
            FunctionCall.result(&result),
            json!({"role": "tool", "tool_call_id": "call_1", "content": "{\"count\":3}"})
        );
    }
}
