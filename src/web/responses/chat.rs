//! Chat-completions wire format
//!
//! Lowers a `BackendRequest` onto `/v1/chat/completions` and lifts a chat
//! completion back into a `BackendResponse`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::adapter::{
    BackendContentPart, BackendInputItem, BackendOutputContent, BackendOutputItem,
    BackendRequest, BackendResponse, BackendUsage,
};
use super::constants::*;
use super::types::ToolParam;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ChatImageUrl },
    File { file: ChatFile },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: ChatFunctionCall,
}

fn function_type() -> String {
    TOOL_TYPE_FUNCTION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(ChatContent::Text(text)),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ChatFunctionDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: ChatResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
    /// Set instead of `choices` when the backend reports a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// A failure reported inside an otherwise parseable completion body
#[derive(Debug, Clone, PartialEq)]
pub struct ChatFailure {
    pub code: String,
    pub message: String,
}

impl ChatCompletionResponse {
    /// `Some` for an `error` object or a body without any choices
    pub fn failure(&self) -> Option<ChatFailure> {
        if let Some(err) = &self.error {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| err.as_str())
                .unwrap_or("backend returned an error");
            let code = err
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(ERROR_CODE_BACKEND);
            return Some(ChatFailure {
                code: code.to_string(),
                message: message.to_string(),
            });
        }
        if self.choices.is_empty() {
            return Some(ChatFailure {
                code: ERROR_CODE_NO_OUTPUT.to_string(),
                message: "backend returned no choices".to_string(),
            });
        }
        None
    }
}

fn chat_part(part: &BackendContentPart) -> Option<ChatContentPart> {
    match part {
        BackendContentPart::InputText { text } => Some(ChatContentPart::Text { text: text.clone() }),
        BackendContentPart::InputImage {
            image_url, detail, ..
        } => image_url.as_ref().map(|url| ChatContentPart::ImageUrl {
            image_url: ChatImageUrl {
                url: url.clone(),
                detail: detail.clone(),
            },
        }),
        BackendContentPart::InputFile {
            file_id,
            file_data,
            filename,
        } => Some(ChatContentPart::File {
            file: ChatFile {
                file_data: file_data.clone(),
                file_id: file_id.clone(),
                filename: filename.clone(),
            },
        }),
    }
}

/// Text-only content collapses into a single string
fn chat_content(parts: &[BackendContentPart]) -> ChatContent {
    let all_text = parts
        .iter()
        .all(|p| matches!(p, BackendContentPart::InputText { .. }));
    if all_text {
        let text = parts
            .iter()
            .filter_map(|p| match p {
                BackendContentPart::InputText { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ");
        ChatContent::Text(text)
    } else {
        ChatContent::Parts(parts.iter().filter_map(chat_part).collect())
    }
}

/// `{type: function, name}` becomes `{type: function, function: {name}}`
fn chat_tool_choice(choice: &Value) -> Value {
    match choice {
        Value::Object(obj)
            if obj.get("type").and_then(Value::as_str) == Some(TOOL_TYPE_FUNCTION)
                && obj.get("function").is_none() =>
        {
            match obj.get("name") {
                Some(name) => json!({"type": TOOL_TYPE_FUNCTION, "function": {"name": name}}),
                None => choice.clone(),
            }
        }
        _ => choice.clone(),
    }
}

/// Lower a backend request onto the chat-completions format
pub fn to_chat_request(req: &BackendRequest) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(req.input.len() + 1);
    if let Some(instructions) = &req.instructions {
        messages.push(ChatMessage::text(ROLE_SYSTEM, instructions.clone()));
    }

    let mut pending_calls: Vec<ChatToolCall> = Vec::new();
    for item in &req.input {
        match item {
            BackendInputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                pending_calls.push(ChatToolCall {
                    id: call_id.clone(),
                    call_type: function_type(),
                    function: ChatFunctionCall {
                        name: name.clone(),
                        arguments: arguments.clone(),
                    },
                });
                continue;
            }
            BackendInputItem::Message { role, content } if role == ROLE_ASSISTANT => {
                // Text following a run of calls belongs to the same assistant turn
                let calls = std::mem::take(&mut pending_calls);
                messages.push(ChatMessage {
                    role: role.clone(),
                    content: Some(chat_content(content)),
                    tool_calls: (!calls.is_empty()).then_some(calls),
                    tool_call_id: None,
                });
            }
            BackendInputItem::Message { role, content } => {
                flush_calls(&mut messages, &mut pending_calls);
                messages.push(ChatMessage {
                    role: role.clone(),
                    content: Some(chat_content(content)),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            BackendInputItem::FunctionCallOutput { call_id, output } => {
                flush_calls(&mut messages, &mut pending_calls);
                messages.push(ChatMessage {
                    role: ROLE_TOOL.to_string(),
                    content: Some(ChatContent::Text(output.clone())),
                    tool_calls: None,
                    tool_call_id: Some(call_id.clone()),
                });
            }
        }
    }
    flush_calls(&mut messages, &mut pending_calls);

    let tools: Vec<ChatTool> = req
        .tools
        .iter()
        .filter_map(|tool| match tool {
            ToolParam::Function(f) => Some(ChatTool {
                tool_type: TOOL_TYPE_FUNCTION.to_string(),
                function: ChatFunctionDef {
                    name: f.name.clone(),
                    description: f.description.clone(),
                    parameters: f.parameters.clone(),
                    strict: f.strict,
                },
            }),
            _ => None,
        })
        .collect();
    let has_tools = !tools.is_empty();
    let top_logprobs = req.top_logprobs.filter(|n| *n > 0);

    ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        tool_choice: req
            .tool_choice
            .as_ref()
            .filter(|_| has_tools)
            .map(chat_tool_choice),
        parallel_tool_calls: req.parallel_tool_calls.filter(|_| has_tools),
        tools: has_tools.then_some(tools),
        temperature: req.temperature,
        top_p: req.top_p,
        frequency_penalty: req.frequency_penalty,
        presence_penalty: req.presence_penalty,
        max_tokens: req.max_output_tokens,
        logprobs: top_logprobs.map(|_| true),
        top_logprobs,
        seed: req.seed,
        stop: req.stop.clone(),
        reasoning_effort: req.reasoning.as_ref().and_then(|r| r.effort.clone()),
        stream: req.stream.then_some(true),
        stream_options: req.stream.then_some(StreamOptions {
            include_usage: true,
        }),
    }
}

fn flush_calls(messages: &mut Vec<ChatMessage>, pending: &mut Vec<ChatToolCall>) {
    if pending.is_empty() {
        return;
    }
    messages.push(ChatMessage {
        role: ROLE_ASSISTANT.to_string(),
        content: None,
        tool_calls: Some(std::mem::take(pending)),
        tool_call_id: None,
    });
}

/// Lift a chat completion into the backend response shape
pub fn from_chat_response(resp: &ChatCompletionResponse) -> BackendResponse {
    let mut output = Vec::new();
    let choice = resp.choices.first();

    if let Some(choice) = choice {
        let msg = &choice.message;
        if let Some(reasoning) = msg.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
            output.push(BackendOutputItem::Reasoning {
                content: vec![BackendOutputContent::ReasoningText {
                    text: reasoning.clone(),
                }],
            });
        }

        let mut content = Vec::new();
        if let Some(text) = msg.content.as_ref().filter(|t| !t.is_empty()) {
            content.push(BackendOutputContent::OutputText { text: text.clone() });
        }
        if let Some(refusal) = msg.refusal.as_ref().filter(|r| !r.is_empty()) {
            content.push(BackendOutputContent::Refusal {
                refusal: refusal.clone(),
            });
        }
        if !content.is_empty() {
            output.push(BackendOutputItem::Message { id: None, content });
        }

        for call in msg.tool_calls.iter().flatten() {
            output.push(BackendOutputItem::FunctionCall {
                id: None,
                call_id: call.id.clone(),
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            });
        }
    }

    let status = match choice.and_then(|c| c.finish_reason.as_deref()) {
        Some(FINISH_REASON_LENGTH) => STATUS_INCOMPLETE,
        _ => STATUS_COMPLETED,
    };

    BackendResponse {
        id: resp.id.clone(),
        status: Some(status.to_string()),
        output,
        usage: resp.usage.as_ref().map(|u| BackendUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}
