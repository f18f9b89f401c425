use crate::mcp::types::McpTool;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A tool as presented to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    /// Unique across every connected server
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Chat-completions `tools` entry
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

impl From<McpTool> for ToolDescriptor {
    fn from(tool: McpTool) -> Self {
        let input_schema = if tool.input_schema.is_object() {
            tool.input_schema
        } else {
            json!({"type": "object", "properties": {}})
        };
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema,
        }
    }
}
