//! Gemini `generateContent` wire format, shared by AI Studio and Vertex AI

use serde::{Deserialize, Serialize};

// -- Request types --

/// `generateContent` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleRequest {
    /// Conversation contents
    pub contents: Vec<GoogleContent>,
    /// System instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GoogleContent>,
    /// Generation configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GoogleGenerationConfig>,
    /// Tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GoogleTool>>,
    /// Tool configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<GoogleToolConfig>,
}

/// Role plus parts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleContent {
    /// "user" or "model"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default)]
    pub parts: Vec<GooglePart>,
}

/// Part within a content object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GooglePart {
    /// Text
    Text(String),
    /// Function call from the model
    FunctionCall(GoogleFunctionCall),
    /// Function response from the user
    FunctionResponse(GoogleFunctionResponse),
}

/// Function call from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleFunctionCall {
    /// Function name
    pub name: String,
    /// Arguments
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Function response from the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleFunctionResponse {
    /// Function name
    pub name: String,
    /// Response payload
    pub response: serde_json::Value,
}

/// Generation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleGenerationConfig {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum output tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// "application/json" for structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    /// OpenAPI-subset schema for structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

/// Tool wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleTool {
    /// Function declarations
    pub function_declarations: Vec<GoogleFunctionDeclaration>,
}

/// Function declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleFunctionDeclaration {
    /// Function name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parameter schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleToolConfig {
    /// Function calling config
    pub function_calling_config: GoogleFunctionCallingConfig,
}

/// Function calling mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleFunctionCallingConfig {
    /// "AUTO", "ANY" or "NONE"
    pub mode: String,
    /// Allowed function names when mode is "ANY"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

// -- Response types --

/// `generateContent` response; streaming sends one of these per SSE event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleResponse {
    /// Candidates
    #[serde(default)]
    pub candidates: Vec<GoogleCandidate>,
    /// Token usage
    #[serde(default)]
    pub usage_metadata: Option<GoogleUsageMetadata>,
    /// Model version that answered
    #[serde(default)]
    pub model_version: Option<String>,
    /// Response identifier
    #[serde(default)]
    pub response_id: Option<String>,
}

/// Candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCandidate {
    /// Generated content
    #[serde(default)]
    pub content: Option<GoogleContent>,
    /// Finish reason
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Candidate index
    #[serde(default)]
    pub index: Option<u32>,
}

/// Token usage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleUsageMetadata {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_token_count: u32,
    /// Candidate tokens
    #[serde(default)]
    pub candidates_token_count: u32,
    /// Total tokens
    #[serde(default)]
    pub total_token_count: u32,
}
