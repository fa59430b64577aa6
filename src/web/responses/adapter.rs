//! Backend adapter
//!
//! Builds the backend request from canonical messages, the expanded tool
//! list and the caller's sampling parameters, and parses backend output
//! back into text plus tool calls. The request shape here is Responses-like;
//! `chat.rs` lowers it onto the chat-completions wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::constants::*;
use super::tools::ExpandedTools;
use super::types::{
    ContentPart, Message, MessageContent, ReasoningParam, ResponseRequest, Role, ToolCall,
    ToolParam,
};

/// One content part of a backend input message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendContentPart {
    InputText {
        text: String,
    },
    InputImage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    InputFile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl From<&ContentPart> for BackendContentPart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => BackendContentPart::InputText { text: text.clone() },
            ContentPart::Image {
                image_url,
                file_id,
                detail,
            } => BackendContentPart::InputImage {
                image_url: image_url.clone(),
                file_id: file_id.clone(),
                detail: detail.clone(),
            },
            ContentPart::File {
                file_id,
                file_data,
                filename,
            } => BackendContentPart::InputFile {
                file_id: file_id.clone(),
                file_data: file_data.clone(),
                filename: filename.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendInputItem {
    Message {
        role: String,
        content: Vec<BackendContentPart>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

/// Backend-shaped request for one round of the tool-call loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub model: String,
    pub input: Vec<BackendInputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendUsage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendOutputContent {
    OutputText {
        text: String,
    },
    Refusal {
        refusal: String,
    },
    ReasoningText {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendOutputItem {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        content: Vec<BackendOutputContent>,
    },
    FunctionCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    Reasoning {
        #[serde(default)]
        content: Vec<BackendOutputContent>,
    },
    #[serde(other)]
    Other,
}

/// Result of one backend round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<BackendOutputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<BackendUsage>,
}

impl BackendResponse {
    /// True when the backend stopped on its token limit
    pub fn is_incomplete(&self) -> bool {
        self.status.as_deref() == Some(STATUS_INCOMPLETE)
    }
}

/// Canonical view of a backend round's output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub text: String,
    pub refusal: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    pub has_tool_calls: bool,
}

impl ParsedOutput {
    /// Nothing for history: no text, refusal or tool calls
    pub fn is_empty(&self) -> bool {
        !self.has_tool_calls && self.text.is_empty() && self.refusal.is_empty()
    }

    /// The assistant turn to append to history for this round
    ///
    /// A refusal stands in for the text when the round produced none.
    pub fn to_message(&self) -> Message {
        let text = if self.text.is_empty() {
            &self.refusal
        } else {
            &self.text
        };
        if self.has_tool_calls {
            Message::assistant_tool_calls(Some(text.clone()), self.tool_calls.clone())
        } else {
            Message::assistant_text(text.clone())
        }
    }
}

fn content_to_parts(content: &MessageContent) -> Vec<BackendContentPart> {
    match content {
        MessageContent::Text(text) => vec![BackendContentPart::InputText { text: text.clone() }],
        MessageContent::Parts(parts) => parts.iter().map(BackendContentPart::from).collect(),
    }
}

/// Lower canonical messages into backend input items
///
/// System messages are dropped; their text travels through `instructions`.
pub fn build_backend_input(messages: &[Message]) -> Vec<BackendInputItem> {
    let mut items = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            Role::System => continue,
            Role::Tool => items.push(BackendInputItem::FunctionCallOutput {
                call_id: msg.tool_call_id.clone().unwrap_or_default(),
                output: msg.text(),
            }),
            Role::User | Role::Assistant => {
                // Calls go first so their outputs can follow directly
                for call in &msg.tool_calls {
                    items.push(BackendInputItem::FunctionCall {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                }
                if let Some(content) = &msg.content {
                    let parts = content_to_parts(content);
                    if !parts.is_empty() {
                        items.push(BackendInputItem::Message {
                            role: msg.role.as_str().to_string(),
                            content: parts,
                        });
                    }
                }
            }
        }
    }
    items
}

/// Request instructions first, then the text of any system turns
fn merged_instructions(req: &ResponseRequest, messages: &[Message]) -> Option<String> {
    let mut sections: Vec<String> = req.instructions.iter().cloned().collect();
    sections.extend(
        messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(Message::text)
            .filter(|t| !t.is_empty()),
    );
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// Build the backend request for one round
pub fn build_backend_request(
    req: &ResponseRequest,
    messages: &[Message],
    tools: &ExpandedTools,
    stream: bool,
) -> BackendRequest {
    let function_tools: Vec<ToolParam> = tools
        .function_tools()
        .into_iter()
        .map(ToolParam::Function)
        .collect();
    let tool_choice = if function_tools.is_empty() {
        None
    } else {
        req.tool_choice.clone()
    };

    let request = BackendRequest {
        model: req.model().to_string(),
        input: build_backend_input(messages),
        instructions: merged_instructions(req, messages),
        tools: function_tools,
        tool_choice,
        temperature: req.temperature,
        top_p: req.top_p,
        frequency_penalty: req.frequency_penalty,
        presence_penalty: req.presence_penalty,
        max_output_tokens: req.max_output_tokens,
        parallel_tool_calls: req.parallel_tool_calls,
        reasoning: req.reasoning.clone(),
        truncation: req.truncation.clone(),
        text: req.text.clone(),
        top_logprobs: req.top_logprobs,
        seed: req.seed,
        stop: req.stop.clone(),
        store: req.store,
        stream,
    };
    trace!(
        "Built backend request with {} input items and {} tools",
        request.input.len(),
        request.tools.len()
    );
    request
}

/// Split backend output into text, refusal, reasoning and tool calls
pub fn parse_backend_output(output: &[BackendOutputItem]) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();
    for item in output {
        match item {
            BackendOutputItem::Message { content, .. } => {
                for part in content {
                    match part {
                        BackendOutputContent::OutputText { text } => parsed.text.push_str(text),
                        BackendOutputContent::Refusal { refusal } => {
                            parsed.refusal.push_str(refusal)
                        }
                        _ => {}
                    }
                }
            }
            BackendOutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => parsed.tool_calls.push(ToolCall {
                id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            BackendOutputItem::Reasoning { content } => {
                for part in content {
                    if let BackendOutputContent::ReasoningText { text } = part {
                        parsed.reasoning.push_str(text);
                    }
                }
            }
            BackendOutputItem::Other => {}
        }
    }
    parsed.has_tool_calls = !parsed.tool_calls.is_empty();
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::responses::conversions::InputNormalizer;
    use crate::web::responses::types::FunctionTool;
    use serde_json::json;

    #[test]
    fn test_hello_builds_one_user_message() {
        let messages = InputNormalizer::normalize(&json!("hello"));
        let input = build_backend_input(&messages);
        assert_eq!(
            input,
            vec![BackendInputItem::Message {
                role: "user".to_string(),
                content: vec![BackendContentPart::InputText {
                    text: "hello".to_string()
                }],
            }]
        );
    }

    #[test]
    fn test_system_messages_fold_into_instructions() {
        let req = ResponseRequest {
            model: Some("m".to_string()),
            instructions: Some("Be brief.".to_string()),
            ..Default::default()
        };
        let messages = vec![Message::system("Answer in French."), Message::user_text("hi")];
        let built = build_backend_request(&req, &messages, &ExpandedTools::default(), false);

        assert_eq!(built.input.len(), 1);
        assert_eq!(
            built.instructions.as_deref(),
            Some("Be brief.\n\nAnswer in French.")
        );
    }

    #[test]
    fn test_tool_calls_precede_text_and_outputs_follow() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "get_weather".to_string(),
            arguments: "{\"city\":\"Paris\"}".to_string(),
        };
        let messages = vec![
            Message::user_text("weather?"),
            Message::assistant_tool_calls(Some("Checking".to_string()), vec![call]),
            Message::tool_result("call_1", "sunny"),
        ];
        let input = build_backend_input(&messages);

        assert!(matches!(&input[1], BackendInputItem::FunctionCall { call_id, .. } if call_id == "call_1"));
        assert!(matches!(&input[2], BackendInputItem::Message { role, .. } if role == "assistant"));
        assert!(matches!(
            &input[3],
            BackendInputItem::FunctionCallOutput { call_id, output } if call_id == "call_1" && output == "sunny"
        ));
    }

    #[test]
    fn test_multimodal_parts_keep_order() {
        let messages = InputNormalizer::normalize(&json!([{
            "type": "message",
            "role": "user",
            "content": [
                {"type": "input_text", "text": "what is this"},
                {"type": "input_image", "image_url": "https://example.com/cat.png"},
                {"type": "input_file", "file_id": "file_1"}
            ]
        }]));
        let input = build_backend_input(&messages);
        let BackendInputItem::Message { content, .. } = &input[0] else {
            panic!("Expected message");
        };
        assert!(matches!(content[0], BackendContentPart::InputText { .. }));
        assert!(matches!(content[1], BackendContentPart::InputImage { .. }));
        assert!(matches!(content[2], BackendContentPart::InputFile { .. }));
    }

    #[test]
    fn test_tool_choice_dropped_without_function_tools() {
        let req = ResponseRequest {
            model: Some("m".to_string()),
            tool_choice: Some(json!("required")),
            ..Default::default()
        };
        let built = build_backend_request(&req, &[], &ExpandedTools::default(), false);
        assert!(built.tool_choice.is_none());

        let tools = ExpandedTools {
            expanded_tools: vec![ToolParam::Function(FunctionTool {
                name: "f".to_string(),
                description: None,
                parameters: None,
                strict: None,
            })],
            ..Default::default()
        };
        let built = build_backend_request(&req, &[], &tools, false);
        assert_eq!(built.tool_choice, Some(json!("required")));
        assert_eq!(built.tools.len(), 1);
    }

    #[test]
    fn test_parse_mixed_output_preserves_order() {
        let output: Vec<BackendOutputItem> = serde_json::from_value(json!([
            {"type": "reasoning", "content": [{"type": "reasoning_text", "text": "think"}]},
            {"type": "message", "content": [{"type": "output_text", "text": "Let me check. "}]},
            {"type": "function_call", "call_id": "c1", "name": "a", "arguments": "{}"},
            {"type": "function_call", "call_id": "c2", "name": "b", "arguments": "{\"x\":1}"},
            {"type": "web_search_call", "status": "completed"}
        ]))
        .unwrap();
        let parsed = parse_backend_output(&output);

        assert_eq!(parsed.text, "Let me check. ");
        assert_eq!(parsed.reasoning, "think");
        assert!(parsed.has_tool_calls);
        let names: Vec<&str> = parsed.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_text_only() {
        let output = vec![BackendOutputItem::Message {
            id: None,
            content: vec![BackendOutputContent::OutputText {
                text: "Hi".to_string(),
            }],
        }];
        let parsed = parse_backend_output(&output);
        assert!(!parsed.has_tool_calls);
        assert_eq!(parsed.to_message(), Message::assistant_text("Hi"));
    }

    #[test]
    fn test_refusal_only_output_becomes_assistant_turn() {
        let output = vec![BackendOutputItem::Message {
            id: None,
            content: vec![BackendOutputContent::Refusal {
                refusal: "No".to_string(),
            }],
        }];
        let parsed = parse_backend_output(&output);
        assert!(!parsed.is_empty());
        assert_eq!(parsed.to_message(), Message::assistant_text("No"));
        assert!(parse_backend_output(&[]).is_empty());
    }
}
