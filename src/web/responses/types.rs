//! Request and canonical conversation types
//!
//! The request side mirrors the client-facing Responses API. The canonical
//! side (`Message`, `ContentPart`, `ToolCall`) is what every other stage of
//! the gateway works on once input has been normalized.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::constants::*;

// ============================================================================
// Canonical conversation types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    /// Map a client-supplied role onto a canonical role
    ///
    /// `developer` is folded into `system`; unknown roles yield `None`.
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            ROLE_USER => Some(Role::User),
            ROLE_ASSISTANT => Some(Role::Assistant),
            ROLE_SYSTEM | ROLE_DEVELOPER => Some(Role::System),
            ROLE_TOOL => Some(Role::Tool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => ROLE_USER,
            Role::Assistant => ROLE_ASSISTANT,
            Role::System => ROLE_SYSTEM,
            Role::Tool => ROLE_TOOL,
        }
    }
}

/// One multimodal fragment of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>, // "low" | "high" | "auto"
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

/// Content that can be either a string or array of content parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenate the text fragments, ignoring images and files
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// A backend-requested function invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, exactly as produced by the model
    pub arguments: String,
}

/// One canonical conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    /// A user turn holding a single text part
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(
            Role::User,
            MessageContent::Parts(vec![ContentPart::Text { text: text.into() }]),
        )
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// An assistant turn that requested tool calls, optionally with preceding text
    pub fn assistant_tool_calls(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.filter(|t| !t.is_empty()).map(MessageContent::Text),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(MessageContent::Text(output.into())),
            tool_calls: vec![],
            tool_call_id: Some(call_id.into()),
        }
    }

    pub fn text(&self) -> String {
        self.content.as_ref().map(|c| c.text()).unwrap_or_default()
    }
}

// ============================================================================
// Request schema
// ============================================================================

/// Conversation parameter - either a bare id or an object with an id field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConversationParam {
    Id(String),
    Object { id: String },
}

impl ConversationParam {
    pub fn id(&self) -> &str {
        match self {
            ConversationParam::Id(id) => id,
            ConversationParam::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Request payload for creating a new response
///
/// Every field is optional at the type level so that presence can be
/// distinguished from defaults when echoing; `validate` enforces the
/// required ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Plain string or heterogeneous item array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationParam>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolParam>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParam>,

    /// System instructions for this response only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,

    /// Upper bound on tool-call rounds; non-positive values fall back to the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,

    /// Echoed only; every response runs in the foreground
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("model field is required")]
    MissingModel,
    #[error("input field is required")]
    MissingInput,
    #[error("conversation and previous_response_id cannot both be set")]
    ConflictingHistory,
}

impl ResponseRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.model.as_deref().map_or(true, str::is_empty) {
            return Err(ValidationError::MissingModel);
        }
        if self.input.as_ref().map_or(true, Value::is_null) {
            return Err(ValidationError::MissingInput);
        }
        if self.conversation.is_some() && self.previous_response_id.is_some() {
            return Err(ValidationError::ConflictingHistory);
        }
        Ok(())
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or_default()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn tools(&self) -> &[ToolParam] {
        self.tools.as_deref().unwrap_or(&[])
    }
}

// ============================================================================
// Tool declarations
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<Value>,
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileSearchTool {
    pub vector_store_ids: Vec<String>,
    pub max_num_results: Option<u32>,
    pub filters: Option<Value>,
    pub ranking_options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebSearchTool {
    /// `web_search` or `web_search_preview`, kept for echoing
    pub tool_type: String,
    pub search_context_size: Option<String>,
    pub user_location: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct McpTool {
    pub server_label: String,
    pub server_url: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub require_approval: Option<Value>,
}

/// A client-declared tool
///
/// The tag is resolved once, at deserialization time. File search and web
/// search accept both the flat form and the form nested under a key named
/// after the type; flat fields win when both are present. Unknown tool
/// types are carried opaquely.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolParam {
    Function(FunctionTool),
    FileSearch(FileSearchTool),
    WebSearch(WebSearchTool),
    Mcp(McpTool),
    Other(Value),
}

/// Look up a field on the flat object first, then on the nested one
fn layered<'a>(
    flat: &'a Map<String, Value>,
    nested: Option<&'a Value>,
    key: &str,
) -> Option<&'a Value> {
    flat.get(key)
        .filter(|v| !v.is_null())
        .or_else(|| nested.and_then(|n| n.get(key)).filter(|v| !v.is_null()))
}

fn string_field(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

impl ToolParam {
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(obj) = value else {
            return Err("tool declaration must be an object".to_string());
        };
        let tool_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "tool declaration is missing a type".to_string())?
            .to_string();

        match tool_type.as_str() {
            TOOL_TYPE_FUNCTION => {
                // Chat-style declarations nest the definition under "function"
                let nested = obj.get("function");
                let name = string_field(layered(&obj, nested, "name"))
                    .ok_or_else(|| "function tool is missing a name".to_string())?;
                Ok(ToolParam::Function(FunctionTool {
                    name,
                    description: string_field(layered(&obj, nested, "description")),
                    parameters: layered(&obj, nested, "parameters").cloned(),
                    strict: layered(&obj, nested, "strict").and_then(Value::as_bool),
                }))
            }
            TOOL_TYPE_FILE_SEARCH => {
                let nested = obj.get(TOOL_TYPE_FILE_SEARCH);
                Ok(ToolParam::FileSearch(FileSearchTool {
                    vector_store_ids: string_list(layered(&obj, nested, "vector_store_ids"))
                        .unwrap_or_default(),
                    max_num_results: layered(&obj, nested, "max_num_results")
                        .and_then(Value::as_u64)
                        .map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
                    filters: layered(&obj, nested, "filters").cloned(),
                    ranking_options: layered(&obj, nested, "ranking_options").cloned(),
                }))
            }
            TOOL_TYPE_WEB_SEARCH | TOOL_TYPE_WEB_SEARCH_PREVIEW => {
                let nested = obj.get(tool_type.as_str());
                Ok(ToolParam::WebSearch(WebSearchTool {
                    search_context_size: string_field(layered(
                        &obj,
                        nested,
                        "search_context_size",
                    )),
                    user_location: layered(&obj, nested, "user_location").cloned(),
                    tool_type: tool_type.clone(),
                }))
            }
            TOOL_TYPE_MCP => {
                let server_label = string_field(obj.get("server_label"))
                    .ok_or_else(|| "mcp tool is missing server_label".to_string())?;
                Ok(ToolParam::Mcp(McpTool {
                    server_label,
                    server_url: string_field(obj.get("server_url")),
                    allowed_tools: string_list(obj.get("allowed_tools")),
                    require_approval: obj.get("require_approval").cloned(),
                }))
            }
            _ => Ok(ToolParam::Other(Value::Object(obj))),
        }
    }

    /// Render the declaration in its flat form
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        match self {
            ToolParam::Function(f) => {
                obj.insert("type".into(), json!(TOOL_TYPE_FUNCTION));
                obj.insert("name".into(), json!(f.name));
                if let Some(description) = &f.description {
                    obj.insert("description".into(), json!(description));
                }
                if let Some(parameters) = &f.parameters {
                    obj.insert("parameters".into(), parameters.clone());
                }
                if let Some(strict) = f.strict {
                    obj.insert("strict".into(), json!(strict));
                }
            }
            ToolParam::FileSearch(fs) => {
                obj.insert("type".into(), json!(TOOL_TYPE_FILE_SEARCH));
                obj.insert("vector_store_ids".into(), json!(fs.vector_store_ids));
                if let Some(max) = fs.max_num_results {
                    obj.insert("max_num_results".into(), json!(max));
                }
                if let Some(filters) = &fs.filters {
                    obj.insert("filters".into(), filters.clone());
                }
                if let Some(ranking) = &fs.ranking_options {
                    obj.insert("ranking_options".into(), ranking.clone());
                }
            }
            ToolParam::WebSearch(ws) => {
                obj.insert("type".into(), json!(ws.tool_type));
                if let Some(size) = &ws.search_context_size {
                    obj.insert("search_context_size".into(), json!(size));
                }
                if let Some(location) = &ws.user_location {
                    obj.insert("user_location".into(), location.clone());
                }
            }
            ToolParam::Mcp(mcp) => {
                obj.insert("type".into(), json!(TOOL_TYPE_MCP));
                obj.insert("server_label".into(), json!(mcp.server_label));
                if let Some(url) = &mcp.server_url {
                    obj.insert("server_url".into(), json!(url));
                }
                if let Some(allowed) = &mcp.allowed_tools {
                    obj.insert("allowed_tools".into(), json!(allowed));
                }
                if let Some(approval) = &mcp.require_approval {
                    obj.insert("require_approval".into(), approval.clone());
                }
            }
            ToolParam::Other(value) => return value.clone(),
        }
        Value::Object(obj)
    }

    pub fn tool_type(&self) -> &str {
        match self {
            ToolParam::Function(_) => TOOL_TYPE_FUNCTION,
            ToolParam::FileSearch(_) => TOOL_TYPE_FILE_SEARCH,
            ToolParam::WebSearch(ws) => &ws.tool_type,
            ToolParam::Mcp(_) => TOOL_TYPE_MCP,
            ToolParam::Other(value) => value.get("type").and_then(Value::as_str).unwrap_or(""),
        }
    }
}

impl Serialize for ToolParam {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ToolParam {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ToolParam::from_value(value).map_err(de::Error::custom)
    }
}
