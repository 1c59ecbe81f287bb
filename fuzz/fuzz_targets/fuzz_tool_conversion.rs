#![no_main]

use libfuzzer_sys::fuzz_target;

use serde_json::Value;
use switchboard::tools::{convert_definitions, decode_invocations, ToolDefinition, ToolFormat};

// Declaration and call decoding are total: any JSON document must convert
// without panicking, and every converted declaration must decode back to a
// named tool with an object schema.
fuzz_target!(|data: &[u8]| {
    let value: Value = match serde_json::from_slice(data) {
        Ok(v) => v,
        Err(_) => return,
    };

    let tools = match &value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };

    for format in ToolFormat::ALL {
        for converted in convert_definitions(&tools, format) {
            let definition = ToolDefinition::from_any(&converted);
            assert!(!definition.name.is_empty());
            assert!(definition.parameter_schema.is_object());
        }

        for invocation in decode_invocations(format, &value) {
            assert!(!invocation.invocation_id.is_empty());
            assert!(!invocation.tool_name.is_empty());
            let _ = format.adapter().invocation(&invocation);
        }
    }
});
