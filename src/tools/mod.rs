//! Tool-calling protocol bridge
//!
//! Every vendor wire format is a projection of one canonical representation:
//!
//! - A: function calling (`{type:"function", name, description, parameters}`)
//! - B: tool blocks (`{name, description, input_schema}`, `tool_use` / `tool_result`)
//! - C: custom-LLM socket messages (`tool_call_invocation` / `tool_call_result`)
//!
//! Conversions are total. Unexpected shapes degrade to a minimal valid value
//! instead of failing the call.

pub mod bridge;
pub mod custom_llm;
pub mod executor;
pub mod function_call;
pub mod tool_block;

pub use bridge::*;
pub use custom_llm::CustomLlm;
pub use executor::*;
pub use function_call::FunctionCall;
pub use tool_block::ToolBlock;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while executing a tool
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("no tool executor configured")]
    NotConfigured,

    #[error("tool executor rejected {tool}: HTTP {status}: {body}")]
    Rejected {
        tool: String,
        status: u16,
        body: String,
    },

    #[error("tool {0} timed out after {1}s")]
    Timeout(String, u64),

    #[error("tool executor unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unknown tool format: {0}")]
    UnknownFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tool operations
pub type Result<T> = std::result::Result<T, ToolError>;

/// Canonical tool declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameter_schema: Value,
}

/// Canonical request to run one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub invocation_id: String,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
}

/// Canonical outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub invocation_id: String,
    pub payload: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(invocation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            payload,
            is_error: false,
        }
    }

    pub fn error(invocation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            payload: Value::String(message.into()),
            is_error: true,
        }
    }

    /// Payload as transport text; strings pass through, anything else is
    /// serialized.
    pub fn content_string(&self) -> String {
        payload_to_string(&self.payload)
    }
}

/// `{type:"object", properties:{}}`
pub fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

pub(crate) fn payload_to_string(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse an arguments string into an object. Anything that is not a JSON
/// object yields an empty map.
pub(crate) fn arguments_from_value(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema: schema,
        }
    }

    /// Decode a tool declaration in any accepted shape:
    ///
    /// - nested A: `{type:"function", function:{name, description, parameters}}`
    /// - flat A or C: `{type, name, description, parameters}`
    /// - B: `{name, description, input_schema}`
    ///
    /// Anything else falls back to `name = "unknown"`, empty description and
    /// an empty object schema. Never fails.
    pub fn from_any(value: &Value) -> Self {
        let inner = match value.get("function") {
            Some(function) if function.is_object() => function,
            _ => value,
        };

        let name = str_field(inner, "name")
            .filter(|n| !n.is_empty())
            .unwrap_or("unknown");
        let description = str_field(inner, "description").unwrap_or_default();
        let schema = ["parameters", "input_schema"]
            .iter()
            .find_map(|key| inner.get(*key).filter(|s| s.is_object()))
            .cloned()
            .unwrap_or_else(empty_schema);

        Self::new(name, description, schema)
    }
}

/// Vendor wire format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFormat {
    /// A
    FunctionCall,
    /// B
    ToolBlock,
    /// C
    CustomLlm,
}

impl ToolFormat {
    pub const ALL: [ToolFormat; 3] = [
        ToolFormat::FunctionCall,
        ToolFormat::ToolBlock,
        ToolFormat::CustomLlm,
    ];

    /// Parse a route or CLI tag. Accepts the short letter and vendor aliases.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "a" | "function_call" | "openai" => Some(ToolFormat::FunctionCall),
            "b" | "tool_block" | "anthropic" => Some(ToolFormat::ToolBlock),
            "c" | "custom_llm" | "retell" => Some(ToolFormat::CustomLlm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolFormat::FunctionCall => "function_call",
            ToolFormat::ToolBlock => "tool_block",
            ToolFormat::CustomLlm => "custom_llm",
        }
    }

    pub fn adapter(&self) -> &'static dyn ToolFormatAdapter {
        match self {
            ToolFormat::FunctionCall => &FunctionCall,
            ToolFormat::ToolBlock => &ToolBlock,
            ToolFormat::CustomLlm => &CustomLlm,
        }
    }
}

impl fmt::Display for ToolFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolFormat {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_tag(s).ok_or_else(|| ToolError::UnknownFormat(s.to_string()))
    }
}

/// One vendor's projection of the canonical types.
///
/// Adding a vendor means one new implementation of this trait and one
/// [`ToolFormat`] variant.
pub trait ToolFormatAdapter: Send + Sync {
    fn format(&self) -> ToolFormat;

    /// Canonical declaration to vendor JSON.
    fn definition(&self, tool: &ToolDefinition) -> Value;

    /// Vendor tool-call message to canonical, or `None` when the message is
    /// not a tool call.
    fn parse_invocation(&self, message: &Value) -> Option<ToolInvocation>;

    /// Canonical invocation to vendor JSON.
    fn invocation(&self, invocation: &ToolInvocation) -> Value;

    /// Canonical result to vendor JSON.
    fn result(&self, result: &ToolResult) -> Value;

    /// Vendor declaration to canonical. Accepts every shape
    /// [`ToolDefinition::from_any`] does.
    fn parse_definition(&self, value: &Value) -> ToolDefinition {
        ToolDefinition::from_any(value)
    }
}

/// Convert a list of declarations in any accepted shape into `to`.
pub fn convert_definitions(tools: &[Value], to: ToolFormat) -> Vec<Value> {
    let adapter = to.adapter();
    tools
        .iter()
        .map(|tool| {
            if to == ToolFormat::ToolBlock && tool.get("input_schema").is_some() {
                return ToolBlock::passthrough(tool);
            }
            adapter.definition(&adapter.parse_definition(tool))
        })
        .collect()
}

/// Declarations carried by a document: an array of declarations, a
/// `{tools: [...]}` wrapper or a single declaration. Scalars carry none.
pub fn declarations_from_document(document: &Value) -> Vec<Value> {
    match document {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match map.get("tools") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![document.clone()],
        },
        _ => Vec::new(),
    }
}

/// Pull every tool call out of a vendor message.
///
/// Accepts a single call, an array of calls or blocks, an assistant message
/// carrying `tool_calls`, or a message carrying a `content` block array.
/// Entries that are not tool calls are skipped.
pub fn decode_invocations(format: ToolFormat, message: &Value) -> Vec<ToolInvocation> {
    let adapter = format.adapter();
    let items: Vec<&Value> = match message {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match (map.get("tool_calls"), map.get("content")) {
            (Some(Value::Array(calls)), _) => calls.iter().collect(),
            (_, Some(Value::Array(blocks))) => blocks.iter().collect(),
            _ => vec![message],
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| adapter.parse_invocation(item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_customer_a() -> Value {
        json!({
            "type": "function",
            "name": "search_customer",
            "description": "Search",
            "parameters": {"type": "object", "properties": {"q": {"type": "string"}}}
        })
    }

    #[test]
    fn test_flat_a_to_b() {
        let out = convert_definitions(&[search_customer_a()], ToolFormat::ToolBlock);
        assert_eq!(
            out[0],
            json!({
                "name": "search_customer",
                "description": "Search",
                "input_schema": {"type": "object", "properties": {"q": {"type": "string"}}}
            })
        );
    }

    #[test]
    fn test_nested_a_to_b() {
        let nested = json!({
            "type": "function",
            "function": {
                "name": "book_slot",
                "description": "Book a calendar slot",
                "parameters": {"type": "object", "properties": {"at": {"type": "string"}}, "required": ["at"]}
            }
        });
        let out = convert_definitions(&[nested], ToolFormat::ToolBlock);
        assert_eq!(out[0]["name"], "book_slot");
        assert_eq!(out[0]["input_schema"]["required"], json!(["at"]));
    }

    #[test]
    fn test_b_shaped_passes_through() {
        let b = json!({
            "name": "lookup",
            "description": "Lookup",
            "input_schema": {"type": "object", "properties": {}},
            "cache_control": {"type": "ephemeral"}
        });
        let out = convert_definitions(&[b.clone()], ToolFormat::ToolBlock);
        assert_eq!(out[0], b);
    }

    #[test]
    fn test_malformed_tool_falls_back() {
        let out = convert_definitions(&[json!({"foo": "bar"})], ToolFormat::ToolBlock);
        assert_eq!(
            out[0],
            json!({"name": "unknown", "description": "", "input_schema": {"type": "object", "properties": {}}})
        );

        for odd in [json!(null), json!(42), json!("tool"), json!([]), json!({"name": 7})] {
            let def = ToolDefinition::from_any(&odd);
            assert_eq!(def.name, "unknown");
            assert_eq!(def.parameter_schema, empty_schema());
        }
    }

    #[test]
    fn test_non_object_schema_falls_back() {
        let def = ToolDefinition::from_any(&json!({"name": "x", "parameters": "oops"}));
        assert_eq!(def.parameter_schema, empty_schema());
    }

    #[test]
    fn test_a_b_a_round_trip() {
        let original = search_customer_a();
        let b = convert_definitions(&[original.clone()], ToolFormat::ToolBlock);
        let a = convert_definitions(&b, ToolFormat::FunctionCall);

        assert_eq!(a[0]["name"], original["name"]);
        assert_eq!(a[0]["description"], original["description"]);
        assert_eq!(a[0]["parameters"], original["parameters"]);
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(ToolFormat::from_tag("A"), Some(ToolFormat::FunctionCall));
        assert_eq!(ToolFormat::from_tag("anthropic"), Some(ToolFormat::ToolBlock));
        assert_eq!(ToolFormat::from_tag("retell"), Some(ToolFormat::CustomLlm));
        assert_eq!(ToolFormat::from_tag("d"), None);
        assert!("zzz".parse::<ToolFormat>().is_err());
        for format in ToolFormat::ALL {
            assert_eq!(format.adapter().format(), format);
            assert_eq!(ToolFormat::from_tag(format.as_str()), Some(format));
        }
    }

    #[test]
    fn test_decode_invocation_containers() {
        let assistant = json!({
            "role": "assistant",
            "tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "a", "arguments": "{}"}},
                {"id": "call_2", "type": "function", "function": {"name": "b", "arguments": "{\"x\":1}"}}
            ]
        });
        let calls = decode_invocations(ToolFormat::FunctionCall, &assistant);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].arguments["x"], 1);

        let blocks = json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "acme"}}
            ]
        });
        let calls = decode_invocations(ToolFormat::ToolBlock, &blocks);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].invocation_id, "toolu_1");

        assert!(decode_invocations(ToolFormat::CustomLlm, &json!("nope")).is_empty());
    }

    #[test]
    fn test_result_content_string() {
        assert_eq!(ToolResult::ok("1", json!("plain")).content_string(), "plain");
        assert_eq!(
            ToolResult::ok("1", json!({"found": true})).content_string(),
            "{\"found\":true}"
        );
    }

    #[test]
    fn test_declarations_from_document() {
        let tool = json!({"name": "end_call", "description": "", "input_schema": empty_schema()});
        assert_eq!(declarations_from_document(&json!([tool.clone()])), vec![tool.clone()]);
        assert_eq!(
            declarations_from_document(&json!({"tools": [tool.clone(), tool.clone()]})),
            vec![tool.clone(), tool.clone()]
        );
        assert_eq!(declarations_from_document(&tool), vec![tool.clone()]);
        assert!(declarations_from_document(&json!("end_call")).is_empty());
    }
}
