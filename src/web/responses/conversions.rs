//! Input normalization
//!
//! Turns the client's `input` field, either a plain string or an ordered
//! array of typed items, into the canonical message list the rest of the
//! gateway works on.

use serde_json::Value;
use tracing::trace;

use super::constants::*;
use super::types::{ContentPart, Message, MessageContent, Role, ToolCall};

/// Centralized input conversion utilities
pub struct InputNormalizer;

impl InputNormalizer {
    /// Normalize any input shape into canonical messages
    ///
    /// Never fails: a shape that yields no messages is rendered as JSON and
    /// wrapped into a single user text message.
    ///
    /// # Arguments
    /// * `input` - The raw `input` value from the request
    ///
    /// # Returns
    /// Messages in input order
    pub fn normalize(input: &Value) -> Vec<Message> {
        match input {
            Value::String(text) => vec![Message::user_text(text.clone())],
            Value::Array(items) => {
                let messages: Vec<Message> =
                    items.iter().filter_map(Self::item_to_message).collect();
                if messages.is_empty() {
                    trace!("Input array produced no messages, falling back to text");
                    vec![Message::user_text(input.to_string())]
                } else {
                    messages
                }
            }
            other => vec![Message::user_text(other.to_string())],
        }
    }

    /// Convert one input item; items that carry nothing usable are skipped
    fn item_to_message(item: &Value) -> Option<Message> {
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or_else(|| {
            if item.get("role").is_some() {
                ITEM_TYPE_MESSAGE
            } else {
                ""
            }
        });

        match item_type {
            ITEM_TYPE_MESSAGE => {
                let role = Role::parse(item.get("role")?.as_str()?)?;
                let content = Self::parse_content(item.get("content")?)?;
                Some(Message::new(role, content))
            }
            ITEM_TYPE_FUNCTION_CALL => {
                let call_id = item
                    .get("call_id")
                    .or_else(|| item.get("id"))
                    .and_then(Value::as_str)?
                    .to_string();
                let name = item.get("name")?.as_str()?.to_string();
                Some(Message::assistant_tool_calls(
                    None,
                    vec![ToolCall {
                        id: call_id,
                        name,
                        arguments: Self::raw_string(item.get("arguments")),
                    }],
                ))
            }
            ITEM_TYPE_FUNCTION_CALL_OUTPUT => {
                let call_id = item.get("call_id")?.as_str()?;
                Some(Message::tool_result(
                    call_id,
                    Self::raw_string(item.get("output")),
                ))
            }
            _ => {
                let text = item.get("content")?.as_str()?;
                let role = item
                    .get("role")
                    .and_then(Value::as_str)
                    .and_then(Role::parse)
                    .unwrap_or(Role::User);
                Some(Message::new(role, MessageContent::Text(text.to_string())))
            }
        }
    }

    /// Strings pass through untouched; anything else is rendered as JSON
    fn raw_string(value: Option<&Value>) -> String {
        match value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    fn parse_content(content: &Value) -> Option<MessageContent> {
        match content {
            Value::String(text) => Some(MessageContent::Text(text.clone())),
            Value::Array(parts) => Some(MessageContent::Parts(
                parts.iter().filter_map(Self::parse_content_part).collect(),
            )),
            _ => None,
        }
    }

    /// Parse one content part, preserving order within the message
    pub fn parse_content_part(part: &Value) -> Option<ContentPart> {
        let part_type = part.get("type").and_then(Value::as_str)?;
        match part_type {
            "input_text" | "text" | "output_text" => Some(ContentPart::Text {
                text: part.get("text")?.as_str()?.to_string(),
            }),
            "input_image" | "image_url" => {
                // image_url may be a string or a {url, detail} object
                let image = part.get("image_url");
                let image_url = image
                    .and_then(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(o) => o.get("url").and_then(Value::as_str).map(str::to_string),
                        _ => None,
                    })
                    .or_else(|| part.get("url").and_then(Value::as_str).map(str::to_string));
                let detail = part
                    .get("detail")
                    .or_else(|| image.and_then(|v| v.get("detail")))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(ContentPart::Image {
                    image_url,
                    file_id: part.get("file_id").and_then(Value::as_str).map(str::to_string),
                    detail,
                })
            }
            "input_file" | "file" => {
                let nested = part.get("file");
                let field = |key: &str| {
                    part.get(key)
                        .or_else(|| nested.and_then(|n| n.get(key)))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                Some(ContentPart::File {
                    file_id: field("file_id"),
                    file_data: field("file_data"),
                    filename: field("filename"),
                })
            }
            _ => None,
        }
    }
}
