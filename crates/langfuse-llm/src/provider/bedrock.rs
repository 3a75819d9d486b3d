//! AWS Bedrock provider implementation using the Converse API

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::types::{
    AutoToolChoice, ContentBlock, ContentBlockDelta, ConversationRole, ConverseOutput, ConverseStreamOutput,
    InferenceConfiguration, Message as BedrockMessage, SpecificToolChoice, StopReason, SystemContentBlock, Tool,
    ToolChoice as BedrockToolChoice, ToolConfiguration, ToolInputSchema, ToolResultBlock, ToolResultContentBlock,
    ToolSpecification, ToolUseBlock,
};
use aws_smithy_types::Document;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{EventStream, HttpTransport, Provider, ProviderCapabilities, ProviderSettings};
use crate::error::LlmError;
use crate::types::{
    ChoiceMessage, CompletionRequest, CompletionResponse, FinishReason, Message, Role, StreamDelta, StreamEvent,
    ToolCall, ToolChoice, Usage,
};

/// API key value that selects the default AWS credential chain (self-hosted only)
pub const BEDROCK_USE_DEFAULT_CREDENTIALS: &str = "__BEDROCK_DEFAULT_CREDENTIALS__";

/// Adapter config blob for Bedrock
#[derive(Debug, Default, Deserialize)]
struct BedrockConfig {
    #[serde(default)]
    region: Option<String>,
}

/// Static credentials carried in the API key
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BedrockCredentials {
    access_key_id: String,
    secret_access_key: SecretString,
    #[serde(default)]
    session_token: Option<SecretString>,
}

/// AWS Bedrock provider using the Converse API
pub struct BedrockProvider {
    client: BedrockClient,
}

impl BedrockProvider {
    /// Build a Bedrock runtime client
    ///
    /// Retries and timeouts are handled by the SDK.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidCredentials` if the API key is not a
    /// credentials JSON object, or if default credentials are requested on a
    /// cloud deployment.
    pub async fn new(
        transport: &HttpTransport,
        config: Option<&Map<String, Value>>,
        settings: ProviderSettings,
        is_cloud: bool,
    ) -> Result<Self, LlmError> {
        let bedrock_config: BedrockConfig = config
            .map(|c| serde_json::from_value(Value::Object(c.clone())))
            .transpose()
            .map_err(|e| LlmError::InvalidRequest(format!("invalid Bedrock config: {e}")))?
            .unwrap_or_default();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .retry_config(RetryConfig::standard().with_max_attempts(max_attempts(settings.max_retries)))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(transport.timeout())
                    .build(),
            );

        if let Some(region) = bedrock_config.region {
            loader = loader.region(aws_config::Region::new(region));
        }

        if settings.api_key.expose_secret() == BEDROCK_USE_DEFAULT_CREDENTIALS && !is_cloud {
            tracing::debug!("using default AWS credential chain for Bedrock");
        } else {
            let credentials = parse_credentials(&settings.api_key)?;
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                credentials.access_key_id,
                credentials.secret_access_key.expose_secret(),
                credentials.session_token.map(|t| t.expose_secret().to_owned()),
                None,
                "langfuse-llm-api-key",
            ));
        }

        let aws_config = loader.load().await;

        Ok(Self {
            client: BedrockClient::new(&aws_config),
        })
    }
}

fn parse_credentials(api_key: &SecretString) -> Result<BedrockCredentials, LlmError> {
    serde_json::from_str(api_key.expose_secret())
        .map_err(|_| LlmError::InvalidCredentials("Bedrock API key must be a credentials JSON object".to_owned()))
}

#[async_trait]
impl Provider for BedrockProvider {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (system_blocks, messages) = build_converse_input(request)?;

        let mut converse = self
            .client
            .converse()
            .model_id(&request.model)
            .set_system(Some(system_blocks))
            .set_messages(Some(messages))
            .inference_config(build_inference_config(request));

        if let Some(tool_config) = build_tool_config(request)? {
            converse = converse.tool_config(tool_config);
        }
        if !request.provider_options.is_empty() {
            converse =
                converse.additional_model_request_fields(value_to_document(&Value::Object(request.provider_options.clone())));
        }

        let output = converse.send().await.map_err(|e| {
            let error = sdk_error(&e);
            tracing::warn!(provider = "bedrock", error = %error, "bedrock converse failed");
            error
        })?;

        let (content, tool_calls) = match output.output() {
            Some(ConverseOutput::Message(msg)) => extract_bedrock_response(msg),
            _ => (Some(String::new()), None),
        };

        let usage = output.usage().map(|u| {
            Usage::new(
                u32::try_from(u.input_tokens()).unwrap_or_default(),
                u32::try_from(u.output_tokens()).unwrap_or_default(),
            )
        });

        let mut response = CompletionResponse::single(
            format!("bedrock-{}", uuid::Uuid::new_v4()),
            request.model.clone(),
            ChoiceMessage { content, tool_calls },
            usage,
        );
        if let Some(choice) = response.choices.first_mut() {
            choice.finish_reason = Some(finish_reason(output.stop_reason()));
        }

        Ok(response)
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<EventStream, LlmError> {
        let (system_blocks, messages) = build_converse_input(request)?;

        let mut converse = self
            .client
            .converse_stream()
            .model_id(&request.model)
            .set_system(Some(system_blocks))
            .set_messages(Some(messages))
            .inference_config(build_inference_config(request));

        if let Some(tool_config) = build_tool_config(request)? {
            converse = converse.tool_config(tool_config);
        }
        if !request.provider_options.is_empty() {
            converse =
                converse.additional_model_request_fields(value_to_document(&Value::Object(request.provider_options.clone())));
        }

        let output = converse.send().await.map_err(|e| {
            let error = sdk_error(&e);
            tracing::warn!(provider = "bedrock", error = %error, "bedrock converse_stream failed");
            error
        })?;

        // The receiver is dropped after the first error
        let stream = futures_util::stream::unfold(Some(output.stream), |state| async move {
            let mut receiver = state?;
            match receiver.recv().await {
                Ok(Some(event)) => Some((Ok(convert_stream_output(&event)), Some(receiver))),
                Ok(None) => None,
                Err(e) => Some((
                    Err(LlmError::Streaming(DisplayErrorContext(&e).to_string())),
                    None,
                )),
            }
        })
        .flat_map(|item: Result<Vec<StreamEvent>, LlmError>| {
            let items: Vec<Result<StreamEvent, LlmError>> = match item {
                Ok(events) => events.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            futures_util::stream::iter(items)
        });

        Ok(Box::pin(stream))
    }
}

fn convert_stream_output(event: &ConverseStreamOutput) -> Vec<StreamEvent> {
    match event {
        ConverseStreamOutput::ContentBlockDelta(delta) => match delta.delta() {
            Some(ContentBlockDelta::Text(text)) => vec![StreamEvent::text(text.clone())],
            _ => Vec::new(),
        },
        ConverseStreamOutput::MessageStop(stop) => vec![StreamEvent::Delta(StreamDelta {
            index: 0,
            content: None,
            finish_reason: Some(finish_reason(stop.stop_reason())),
        })],
        ConverseStreamOutput::Metadata(meta) => meta
            .usage()
            .map(|u| {
                StreamEvent::Usage(Usage::new(
                    u32::try_from(u.input_tokens()).unwrap_or_default(),
                    u32::try_from(u.output_tokens()).unwrap_or_default(),
                ))
            })
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

const fn finish_reason(reason: &StopReason) -> FinishReason {
    match reason {
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::ContentFiltered | StopReason::GuardrailIntervened => FinishReason::ContentFilter,
        // EndTurn and unknown variants default to Stop
        _ => FinishReason::Stop,
    }
}

/// Map an SDK error to an upstream error, deriving a status from the error code
fn sdk_error<E, R>(error: &SdkError<E, R>) -> LlmError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let status = match error.code() {
        Some("ThrottlingException" | "ServiceQuotaExceededException") => Some(429),
        Some("ValidationException") => Some(400),
        Some("AccessDeniedException") => Some(403),
        Some("ResourceNotFoundException") => Some(404),
        Some("ModelTimeoutException") => Some(408),
        Some("ServiceUnavailableException" | "ModelNotReadyException") => Some(503),
        Some("InternalServerException") => Some(500),
        _ => None,
    };

    LlmError::Upstream {
        status,
        message: DisplayErrorContext(error).to_string(),
    }
}

/// Build inference configuration from the request params
fn build_inference_config(request: &CompletionRequest) -> InferenceConfiguration {
    let mut config = InferenceConfiguration::builder();

    if let Some(temp) = request.params.temperature {
        #[allow(clippy::cast_possible_truncation)]
        {
            config = config.temperature(temp as f32);
        }
    }
    if let Some(top_p) = request.params.top_p {
        #[allow(clippy::cast_possible_truncation)]
        {
            config = config.top_p(top_p as f32);
        }
    }
    if let Some(max_tokens) = request.params.max_tokens {
        config = config.max_tokens(i32::try_from(max_tokens).unwrap_or(i32::MAX));
    }

    config.build()
}

fn tool_spec(name: &str, description: Option<&str>, schema: Option<&Value>) -> Result<Tool, LlmError> {
    let input_schema = ToolInputSchema::Json(
        schema.map_or_else(|| Document::Object(HashMap::new()), value_to_document),
    );

    let spec = ToolSpecification::builder()
        .name(name)
        .set_description(description.map(ToOwned::to_owned))
        .input_schema(input_schema)
        .build()
        .map_err(|e| LlmError::InvalidRequest(format!("invalid tool specification: {e}")))?;

    Ok(Tool::ToolSpec(spec))
}

/// Build tool configuration, including the forced tool used for structured output
fn build_tool_config(request: &CompletionRequest) -> Result<Option<ToolConfiguration>, LlmError> {
    let mut tools = Vec::new();
    for tool in request.tools.iter().flatten() {
        tools.push(tool_spec(
            &tool.function.name,
            tool.function.description.as_deref(),
            tool.function.parameters.as_ref(),
        )?);
    }

    let mut choice = match &request.tool_choice {
        Some(ToolChoice::Function(name)) => Some(specific_tool_choice(name)?),
        Some(ToolChoice::Auto) => Some(BedrockToolChoice::Auto(AutoToolChoice::builder().build())),
        None => None,
    };

    if let Some(output) = &request.structured_output {
        tools.push(tool_spec(
            &output.name,
            Some("Respond with structured output matching the input schema"),
            Some(&output.schema),
        )?);
        choice = Some(specific_tool_choice(&output.name)?);
    }

    if tools.is_empty() {
        return Ok(None);
    }

    ToolConfiguration::builder()
        .set_tools(Some(tools))
        .set_tool_choice(choice)
        .build()
        .map(Some)
        .map_err(|e| LlmError::InvalidRequest(format!("invalid tool configuration: {e}")))
}

fn specific_tool_choice(name: &str) -> Result<BedrockToolChoice, LlmError> {
    SpecificToolChoice::builder()
        .name(name)
        .build()
        .map(BedrockToolChoice::Tool)
        .map_err(|e| LlmError::InvalidRequest(format!("invalid tool choice: {e}")))
}

/// Build Bedrock Converse API input from internal request
fn build_converse_input(
    request: &CompletionRequest,
) -> Result<(Vec<SystemContentBlock>, Vec<BedrockMessage>), LlmError> {
    let mut system_blocks = Vec::new();
    let mut messages = Vec::new();

    for msg in &request.messages {
        let (role, content) = match msg.role {
            Role::System => {
                system_blocks.push(SystemContentBlock::Text(msg.content.clone()));
                continue;
            }
            Role::User => (ConversationRole::User, build_content_blocks(msg)),
            Role::Assistant => (ConversationRole::Assistant, build_content_blocks(msg)),
            Role::Tool => {
                // Tool results go as user messages with tool result blocks
                let tool_result = ToolResultBlock::builder()
                    .tool_use_id(msg.tool_call_id.clone().unwrap_or_default())
                    .content(ToolResultContentBlock::Text(msg.content.clone()))
                    .build()
                    .map_err(|e| LlmError::InvalidRequest(format!("invalid tool result: {e}")))?;
                (ConversationRole::User, vec![ContentBlock::ToolResult(tool_result)])
            }
        };

        let message = BedrockMessage::builder()
            .role(role)
            .set_content(Some(content))
            .build()
            .map_err(|e| LlmError::InvalidRequest(format!("invalid message: {e}")))?;
        messages.push(message);
    }

    Ok((system_blocks, messages))
}

/// Build Bedrock content blocks from an internal message
fn build_content_blocks(msg: &Message) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if !msg.content.is_empty() {
        blocks.push(ContentBlock::Text(msg.content.clone()));
    }

    for tc in msg.tool_calls.iter().flatten() {
        if let Ok(tool_use) = ToolUseBlock::builder()
            .tool_use_id(&tc.id)
            .name(&tc.function.name)
            .input(value_to_document(&tc.arguments_value()))
            .build()
        {
            blocks.push(ContentBlock::ToolUse(tool_use));
        }
    }

    if blocks.is_empty() {
        blocks.push(ContentBlock::Text(String::new()));
    }

    blocks
}

/// Extract text content and tool calls from a Bedrock response message
fn extract_bedrock_response(msg: &BedrockMessage) -> (Option<String>, Option<Vec<ToolCall>>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in msg.content() {
        match block {
            ContentBlock::Text(t) => text.push_str(t),
            ContentBlock::ToolUse(tu) => {
                tool_calls.push(ToolCall::new(
                    tu.tool_use_id(),
                    tu.name(),
                    document_to_value(tu.input()).to_string(),
                ));
            }
            _ => {}
        }
    }

    let content = (!text.is_empty() || tool_calls.is_empty()).then_some(text);
    let calls = (!tool_calls.is_empty()).then_some(tool_calls);

    (content, calls)
}

/// Convert a `serde_json::Value` to an AWS `Document`
fn value_to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(aws_smithy_types::Number::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(aws_smithy_types::Number::NegInt(i))
            } else {
                n.as_f64()
                    .map_or(Document::Null, |f| Document::Number(aws_smithy_types::Number::Float(f)))
            }
        }
        Value::String(s) => Document::String(s.clone()),
        Value::Array(arr) => Document::Array(arr.iter().map(value_to_document).collect()),
        Value::Object(map) => Document::Object(map.iter().map(|(k, v)| (k.clone(), value_to_document(v))).collect()),
    }
}

/// Convert an AWS `Document` to a `serde_json::Value`
fn document_to_value(doc: &Document) -> Value {
    match doc {
        Document::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), document_to_value(v))).collect()),
        Document::Array(arr) => Value::Array(arr.iter().map(document_to_value).collect()),
        Document::Number(aws_smithy_types::Number::PosInt(u)) => Value::from(*u),
        Document::Number(aws_smithy_types::Number::NegInt(i)) => Value::from(*i),
        Document::Number(aws_smithy_types::Number::Float(f)) => {
            serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)
        }
        Document::String(s) => Value::String(s.clone()),
        Document::Bool(b) => Value::Bool(*b),
        Document::Null => Value::Null,
    }
}

/// SDK attempt count for a retry budget; the first try counts as an attempt
const fn max_attempts(max_retries: u32) -> u32 {
    max_retries.saturating_add(1)
}
