//! Format B: tool blocks
//!
//! Declarations are `{name, description, input_schema}`. Calls are content
//! blocks tagged `tool_use`; results are `tool_result` blocks whose content
//! must be a string.

use super::{
    str_field, ToolDefinition, ToolFormat, ToolFormatAdapter, ToolInvocation, ToolResult,
};
use serde_json::{json, Map, Value};

/// Discriminator of a tool-call content block.
pub const TOOL_USE: &str = "tool_use";
pub const TOOL_RESULT: &str = "tool_result";

pub struct ToolBlock;

impl ToolBlock {
    /// A declaration that already carries `input_schema` is forwarded as is,
    /// keeping vendor-only keys such as `cache_control`.
    pub fn passthrough(tool: &Value) -> Value {
        tool.clone()
    }
}

impl ToolFormatAdapter for ToolBlock {
    fn format(&self) -> ToolFormat {
        ToolFormat::ToolBlock
    }

    fn definition(&self, tool: &ToolDefinition) -> Value {
        json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.parameter_schema,
        })
    }

    fn parse_invocation(&self, message: &Value) -> Option<ToolInvocation> {
        if str_field(message, "type") != Some(TOOL_USE) {
            return None;
        }
        let invocation_id = str_field(message, "id").filter(|id| !id.is_empty())?;
        let tool_name = str_field(message, "name").filter(|n| !n.is_empty())?;
        let arguments = match message.get("input") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        Some(ToolInvocation {
            invocation_id: invocation_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments,
        })
    }

    fn invocation(&self, invocation: &ToolInvocation) -> Value {
        json!({
            "type": TOOL_USE,
            "id": invocation.invocation_id,
            "name": invocation.tool_name,
            "input": invocation.arguments,
        })
    }

    fn result(&self, result: &ToolResult) -> Value {
        json!({
            "type": TOOL_RESULT,
            "tool_use_id": result.invocation_id,
            "content": result.content_string(),
            "is_error": result.is_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_use_block_is_invocation() {
        let block = json!({"type": "tool_use", "id": "toolu_01", "name": "lookup", "input": {"q": "acme"}});
        let invocation = ToolBlock.parse_invocation(&block).unwrap();
        assert_eq!(invocation.invocation_id, "toolu_01");
        assert_eq!(invocation.tool_name, "lookup");
        assert_eq!(invocation.arguments["q"], "acme");
        assert_eq!(ToolBlock.invocation(&invocation), block);
    }

    #[test]
    fn test_other_blocks_are_not_tool_calls() {
        assert!(ToolBlock.parse_invocation(&json!({"type": "text", "text": "hello"})).is_none());
        assert!(ToolBlock
            .parse_invocation(&json!({"type": "tool_result", "tool_use_id": "x"}))
            .is_none());
        assert!(ToolBlock.parse_invocation(&json!({"type": "tool_use"})).is_none());
    }

    #[test]
    fn test_structured_result_is_stringified() {
        let result = ToolResult::ok("toolu_01", json!({"slots": ["09:00", "10:00"]}));
        assert_eq!(
            ToolBlock.result(&result),
            json!({
                "type": "tool_result",
                "tool_use_id": "toolu_01",
                "content": "{\"slots\":[\"09:00\",\"10:00\"]}",
                "is_error": false
            })
        );
    }

    #[test]
    fn test_error_result() {
        let result = ToolResult::error("toolu_02", "calendar unavailable");
        let out = ToolBlock.result(&result);
        assert_eq!(out["content"], "calendar unavailable");
        assert_eq!(out["is_error"], true);
    }
}
