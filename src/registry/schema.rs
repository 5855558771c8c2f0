//! MCP argument schema derivation from declared tool arguments.

use automcp_platform::ToolArgSpec;
use serde_json::{json, Map, Value};

/// Map a declared argument type onto its JSON schema type.
///
/// Unknown or empty types default to `string`.
pub fn map_arg_type(arg_type: &str) -> &'static str {
    match arg_type.to_ascii_lowercase().as_str() {
        "number" | "int" | "integer" | "float" => "number",
        "boolean" | "bool" => "boolean",
        "object" | "map" => "object",
        "array" | "list" => "array",
        _ => "string",
    }
}

/// Build the `input_schema` object for a tool from its argument specs.
pub fn argument_schema(args: &[ToolArgSpec]) -> Map<String, Value> {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for spec in args {
        let mut property = Map::new();
        property.insert("type".to_string(), json!(map_arg_type(&spec.arg_type)));
        if !spec.description.is_empty() {
            property.insert("description".to_string(), json!(spec.description));
        }
        if !spec.options.is_empty() {
            property.insert("enum".to_string(), json!(spec.options));
        }
        properties.insert(spec.name.clone(), Value::Object(property));
        if spec.required {
            required.push(spec.name.clone());
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    schema
}
