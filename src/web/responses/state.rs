//! Conversation state and its wire codecs
//!
//! When the gateway runs as a proxy filter, the request phase and the
//! response phase of one exchange share no memory. Everything needed to
//! finish the response travels inside `ConversationState`, encoded either
//! in a header or in an extra body field.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::trace;

use super::adapter::BackendRequest;
use super::tools::ExpandedTools;
use super::types::{Message, ResponseRequest};

pub const STATE_HEADER: &str = "x-openresponses-state";
pub const STATE_BODY_FIELD: &str = "_openresponses_state";
pub const STATE_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

/// The engine's complete mid-flight working state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub conversation_id: String,
    pub response_id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub tools: ExpandedTools,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_request: Option<ResponseRequest>,
}

impl ConversationState {
    /// Model name from the original request
    pub fn model(&self) -> &str {
        self.original_request
            .as_ref()
            .map(ResponseRequest::model)
            .unwrap_or_default()
    }

    pub fn is_streaming(&self) -> bool {
        self.original_request
            .as_ref()
            .map_or(false, ResponseRequest::is_streaming)
    }
}

/// Bundle handed from the request phase to the response phase
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub state: ConversationState,
    pub backend_request: BackendRequest,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state header {0} not found")]
    MissingHeader(&'static str),
    #[error("state field {0} not found in body")]
    MissingField(&'static str),
    #[error("failed to parse body: {0}")]
    BodyNotJson(serde_json::Error),
    #[error("body is not a JSON object")]
    BodyNotObject,
    #[error("failed to decode state: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("failed to unmarshal state: {0}")]
    InvalidJson(serde_json::Error),
    #[error("unsupported state schema version {0}")]
    UnsupportedVersion(u64),
    #[error("failed to marshal state: {0}")]
    Encode(serde_json::Error),
}

/// base64(JSON(state))
pub fn encode_state(state: &ConversationState) -> Result<String, StateError> {
    let json = serde_json::to_vec(state).map_err(StateError::Encode)?;
    Ok(STANDARD.encode(json))
}

pub fn decode_state(encoded: &str) -> Result<ConversationState, StateError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    let value: Value = serde_json::from_slice(&bytes).map_err(StateError::InvalidJson)?;

    // Check the version before the shape, a newer writer may have changed it
    let version = match value.get("schema_version") {
        None | Some(Value::Null) => u64::from(STATE_SCHEMA_VERSION),
        Some(v) => v.as_u64().unwrap_or(0),
    };
    if version != u64::from(STATE_SCHEMA_VERSION) {
        return Err(StateError::UnsupportedVersion(version));
    }
    serde_json::from_value(value).map_err(StateError::InvalidJson)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    Header,
    Body,
}

impl FromStr for CodecMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(CodecMode::Header),
            "body" => Ok(CodecMode::Body),
            other => Err(format!("unknown state codec: {}", other)),
        }
    }
}

/// Carries `ConversationState` across the request/response boundary
pub trait StateCodec: Send + Sync {
    /// Headers to attach to the outgoing request
    fn inject_into_headers(
        &self,
        state: &ConversationState,
    ) -> Result<Vec<(String, String)>, StateError>;

    /// The outgoing body, with state added if this codec uses the body
    fn inject_into_body(&self, body: &[u8], state: &ConversationState)
        -> Result<Vec<u8>, StateError>;

    fn extract(
        &self,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<ConversationState, StateError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderStateCodec;

impl StateCodec for HeaderStateCodec {
    fn inject_into_headers(
        &self,
        state: &ConversationState,
    ) -> Result<Vec<(String, String)>, StateError> {
        Ok(vec![(STATE_HEADER.to_string(), encode_state(state)?)])
    }

    fn inject_into_body(
        &self,
        body: &[u8],
        _state: &ConversationState,
    ) -> Result<Vec<u8>, StateError> {
        Ok(body.to_vec())
    }

    fn extract(
        &self,
        headers: &HashMap<String, String>,
        _body: &[u8],
    ) -> Result<ConversationState, StateError> {
        let encoded = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(STATE_HEADER))
            .map(|(_, value)| value)
            .ok_or(StateError::MissingHeader(STATE_HEADER))?;
        trace!("Extracting state from header ({} bytes)", encoded.len());
        decode_state(encoded)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BodyStateCodec;

impl StateCodec for BodyStateCodec {
    fn inject_into_headers(
        &self,
        _state: &ConversationState,
    ) -> Result<Vec<(String, String)>, StateError> {
        Ok(vec![])
    }

    fn inject_into_body(
        &self,
        body: &[u8],
        state: &ConversationState,
    ) -> Result<Vec<u8>, StateError> {
        let value: Value = serde_json::from_slice(body).map_err(StateError::BodyNotJson)?;
        let Value::Object(mut obj) = value else {
            return Err(StateError::BodyNotObject);
        };
        obj.insert(STATE_BODY_FIELD.to_string(), Value::String(encode_state(state)?));
        serde_json::to_vec(&obj).map_err(StateError::Encode)
    }

    fn extract(
        &self,
        _headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<ConversationState, StateError> {
        let value: Value = serde_json::from_slice(body).map_err(StateError::BodyNotJson)?;
        let Value::Object(obj) = value else {
            return Err(StateError::BodyNotObject);
        };
        let encoded = obj
            .get(STATE_BODY_FIELD)
            .and_then(Value::as_str)
            .ok_or(StateError::MissingField(STATE_BODY_FIELD))?;
        decode_state(encoded)
    }
}

pub fn codec_for(mode: CodecMode) -> Box<dyn StateCodec> {
    match mode {
        CodecMode::Header => Box::new(HeaderStateCodec),
        CodecMode::Body => Box::new(BodyStateCodec),
    }
}
