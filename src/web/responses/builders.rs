//! Response object model and builder patterns
//!
//! Owns gateway identifier generation, request-parameter echoing and the
//! response status state machine.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::warn;

use super::constants::*;
use super::types::{ReasoningParam, ResponseRequest, ToolCall};

/// Generate a gateway-owned identifier: prefix + 16 random bytes, hex-encoded
pub fn generate_id(prefix: &str) -> String {
    random_id(prefix, 16)
}

/// Shorter identifier used for per-exchange log correlation
pub fn generate_request_id() -> String {
    random_id(ID_PREFIX_REQUEST, 8)
}

fn random_id(prefix: &str, len: usize) -> String {
    let mut bytes = vec![0u8; len];
    if let Err(e) = getrandom::getrandom(&mut bytes) {
        warn!("OS randomness unavailable ({}), falling back to uuid", e);
        let fallback = uuid::Uuid::new_v4();
        let source = fallback.as_bytes();
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = source[i % source.len()];
        }
    }
    format!("{}{}", prefix, hex::encode(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Failed,
    Incomplete,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::InProgress => STATUS_IN_PROGRESS,
            ResponseStatus::Completed => STATUS_COMPLETED,
            ResponseStatus::Failed => "failed",
            ResponseStatus::Incomplete => STATUS_INCOMPLETE,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseStatus::InProgress)
    }
}

/// Typed error attached to a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteDetails {
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputTokenDetails {
    pub cached_tokens: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputTokenDetails {
    pub reasoning_tokens: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseUsage {
    pub input_tokens: i64,
    pub input_tokens_details: InputTokenDetails,
    pub output_tokens: i64,
    pub output_tokens_details: OutputTokenDetails,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub id: String,
}

/// Content within an output message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText {
        text: String,
        #[serde(default)]
        annotations: Vec<Value>,
        #[serde(default)]
        logprobs: Vec<Value>,
    },
    Refusal {
        refusal: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningText {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// One entry of a response's `output` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        id: String,
        role: String,
        status: String,
        content: Vec<OutputContent>,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
        status: String,
    },
    FunctionCallOutput {
        id: String,
        call_id: String,
        output: String,
        status: String,
    },
    Reasoning {
        id: String,
        #[serde(default)]
        summary: Vec<Value>,
        content: Vec<ReasoningText>,
        status: String,
    },
}

impl OutputItem {
    pub fn id(&self) -> &str {
        match self {
            OutputItem::Message { id, .. }
            | OutputItem::FunctionCall { id, .. }
            | OutputItem::FunctionCallOutput { id, .. }
            | OutputItem::Reasoning { id, .. } => id,
        }
    }

    /// A completed function_call item with a fresh gateway id
    pub fn function_call(call: &ToolCall) -> Self {
        OutputItem::FunctionCall {
            id: generate_id(ID_PREFIX_FUNCTION_CALL),
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            status: STATUS_COMPLETED.to_string(),
        }
    }

    pub fn function_call_output(call_id: &str, output: String) -> Self {
        OutputItem::FunctionCallOutput {
            id: generate_id(ID_PREFIX_FUNCTION_CALL_OUTPUT),
            call_id: call_id.to_string(),
            output,
            status: STATUS_COMPLETED.to_string(),
        }
    }

    pub fn reasoning(id: String, text: String, status: &str) -> Self {
        OutputItem::Reasoning {
            id,
            summary: vec![],
            content: vec![ReasoningText {
                content_type: "reasoning_text".to_string(),
                text,
            }],
            status: status.to_string(),
        }
    }
}

/// The gateway's canonical response object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub object: String,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub model: String,
    pub status: ResponseStatus,
    pub output: Vec<OutputItem>,
    pub usage: Option<ResponseUsage>,
    pub error: Option<ResponseError>,
    pub incomplete_details: Option<IncompleteDetails>,
    pub metadata: BTreeMap<String, String>,
    pub previous_response_id: Option<String>,
    pub conversation: Option<ConversationRef>,
    pub instructions: Option<String>,
    pub tools: Vec<Value>,
    pub tool_choice: Value,
    pub reasoning: Option<ReasoningParam>,
    pub temperature: f64,
    pub top_p: f64,
    pub max_output_tokens: Option<i64>,
    pub max_tool_calls: Option<i64>,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub truncation: String,
    pub parallel_tool_calls: bool,
    pub text: Value,
    pub top_logprobs: i64,
    pub service_tier: Option<String>,
    pub background: bool,
    pub prompt_cache_key: Option<String>,
    pub safety_identifier: Option<String>,
    pub store: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("response {id} is already {status}")]
pub struct TransitionError {
    pub id: String,
    pub status: &'static str,
}

impl Response {
    fn ensure_in_progress(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                id: self.id.clone(),
                status: self.status.as_str(),
            });
        }
        Ok(())
    }

    /// Move to `completed` and stamp the completion time
    pub fn mark_completed(&mut self) -> Result<(), TransitionError> {
        self.ensure_in_progress()?;
        self.status = ResponseStatus::Completed;
        self.completed_at = Some(Utc::now().timestamp());
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        error_type: &str,
        code: &str,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.ensure_in_progress()?;
        self.status = ResponseStatus::Failed;
        self.error = Some(ResponseError {
            error_type: error_type.to_string(),
            code: Some(code.to_string()),
            message: message.into(),
            param: None,
        });
        Ok(())
    }

    pub fn mark_incomplete(&mut self, reason: &str) -> Result<(), TransitionError> {
        self.ensure_in_progress()?;
        self.status = ResponseStatus::Incomplete;
        self.incomplete_details = Some(IncompleteDetails {
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Concatenated text of every output message
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message { content, .. } => Some(content),
                _ => None,
            })
            .flatten()
            .filter_map(|c| match c {
                OutputContent::OutputText { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Builder for Response with documented defaults
///
/// # Example
/// ```ignore
/// let response = ResponseBuilder::new(generate_id(ID_PREFIX_RESPONSE), "gpt-4o")
///     .echo_request(&request)
///     .conversation(Some(conversation_id))
///     .build();
/// ```
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    /// Create a new in-progress response with every echo field defaulted
    pub fn new(id: String, model: impl Into<String>) -> Self {
        Self {
            response: Response {
                id,
                object: OBJECT_TYPE_RESPONSE.to_string(),
                created_at: Utc::now().timestamp(),
                completed_at: None,
                model: model.into(),
                status: ResponseStatus::InProgress,
                output: vec![],
                usage: None,
                error: None,
                incomplete_details: None,
                metadata: BTreeMap::new(),
                previous_response_id: None,
                conversation: None,
                instructions: None,
                tools: vec![],
                tool_choice: json!(TOOL_CHOICE_NONE),
                reasoning: None,
                temperature: 0.0,
                top_p: 0.0,
                max_output_tokens: None,
                max_tool_calls: None,
                frequency_penalty: 0.0,
                presence_penalty: 0.0,
                truncation: TRUNCATION_DISABLED.to_string(),
                parallel_tool_calls: true,
                text: json!({"format": {"type": TEXT_FORMAT_TYPE}}),
                top_logprobs: 0,
                service_tier: None,
                background: false,
                prompt_cache_key: None,
                safety_identifier: None,
                store: true,
            },
        }
    }

    /// Copy every request field the caller actually supplied
    ///
    /// Absent fields keep their defaults; explicit values, falsy ones
    /// included, always win.
    pub fn echo_request(mut self, req: &ResponseRequest) -> Self {
        let r = &mut self.response;
        if let Some(v) = &req.previous_response_id {
            r.previous_response_id = Some(v.clone());
        }
        if let Some(v) = &req.instructions {
            r.instructions = Some(v.clone());
        }
        if let Some(tools) = &req.tools {
            r.tools = tools.iter().map(|t| t.to_value()).collect();
            if !tools.is_empty() {
                r.tool_choice = json!(TOOL_CHOICE_AUTO);
            }
        }
        if let Some(v) = &req.tool_choice {
            r.tool_choice = v.clone();
        }
        if let Some(v) = &req.reasoning {
            r.reasoning = Some(v.clone());
        }
        if let Some(v) = req.temperature {
            r.temperature = v;
        }
        if let Some(v) = req.top_p {
            r.top_p = v;
        }
        if let Some(v) = req.max_output_tokens {
            r.max_output_tokens = Some(v);
        }
        if let Some(v) = req.max_tool_calls {
            r.max_tool_calls = Some(v);
        }
        if let Some(v) = req.frequency_penalty {
            r.frequency_penalty = v;
        }
        if let Some(v) = req.presence_penalty {
            r.presence_penalty = v;
        }
        if let Some(v) = &req.truncation {
            r.truncation = v.clone();
        }
        if let Some(v) = req.parallel_tool_calls {
            r.parallel_tool_calls = v;
        }
        if let Some(v) = &req.text {
            r.text = v.clone();
        }
        if let Some(v) = req.top_logprobs {
            r.top_logprobs = v;
        }
        if let Some(v) = &req.service_tier {
            r.service_tier = Some(v.clone());
        }
        if let Some(v) = req.background {
            r.background = v;
        }
        if let Some(v) = &req.prompt_cache_key {
            r.prompt_cache_key = Some(v.clone());
        }
        if let Some(v) = &req.safety_identifier {
            r.safety_identifier = Some(v.clone());
        }
        if let Some(v) = req.store {
            r.store = v;
        }
        if let Some(v) = &req.metadata {
            r.metadata = v.clone();
        }
        self
    }

    pub fn conversation(mut self, conversation_id: Option<String>) -> Self {
        self.response.conversation = conversation_id.map(|id| ConversationRef { id });
        self
    }

    pub fn created_at(mut self, created_at: i64) -> Self {
        self.response.created_at = created_at;
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}

/// Builder for assistant message output items
pub struct OutputItemBuilder {
    item_id: String,
    status: String,
    content: Vec<OutputContent>,
}

impl OutputItemBuilder {
    /// Create a new in-progress message output item
    pub fn new_message(message_id: String) -> Self {
        Self {
            item_id: message_id,
            status: STATUS_IN_PROGRESS.to_string(),
            content: vec![],
        }
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn content(mut self, content: Vec<OutputContent>) -> Self {
        self.content = content;
        self
    }

    pub fn build(self) -> OutputItem {
        OutputItem::Message {
            id: self.item_id,
            role: ROLE_ASSISTANT.to_string(),
            status: self.status,
            content: self.content,
        }
    }
}

/// Builder for output text content parts
pub struct ContentPartBuilder {
    part: OutputContent,
}

impl ContentPartBuilder {
    pub fn new_output_text(text: String) -> Self {
        Self {
            part: OutputContent::OutputText {
                text,
                annotations: vec![],
                logprobs: vec![],
            },
        }
    }

    pub fn new_refusal(refusal: String) -> Self {
        Self {
            part: OutputContent::Refusal { refusal },
        }
    }

    pub fn build(self) -> OutputContent {
        self.part
    }
}

/// Helper function to build ResponseUsage from token counts
///
/// # Arguments
/// * `input_tokens` - Number of prompt tokens
/// * `output_tokens` - Number of generated tokens
pub fn build_usage(input_tokens: i64, output_tokens: i64) -> ResponseUsage {
    ResponseUsage {
        input_tokens,
        input_tokens_details: InputTokenDetails { cached_tokens: 0 },
        output_tokens,
        output_tokens_details: OutputTokenDetails {
            reasoning_tokens: 0,
        },
        total_tokens: input_tokens + output_tokens,
    }
}
