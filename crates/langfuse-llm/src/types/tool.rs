use serde::{Deserialize, Serialize};

/// Tool bound to a completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Always "function"
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function specification
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    /// Wrap a function declaration as a `{type: "function", function}` tool
    pub fn function(function: FunctionDefinition) -> Self {
        Self {
            tool_type: "function".to_owned(),
            function,
        }
    }
}

/// Callable function declared by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Description shown to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// How the model should select tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides
    Auto,
    /// Model must call the named function
    Function(String),
}
