//! Engine errors and their mapping onto the user-visible error shapes

use serde_json::{json, Value};
use tracing::error;

use super::state::StateError;
use super::types::ValidationError;
use crate::mcp::McpError;
use crate::web::openai::BackendError;

/// Prefix that marks a preparation failure as the caller's fault
const INVALID_REQUEST_PREFIX: &str = "invalid request:";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("invalid request: previous response {0} not found")]
    PreviousResponseNotFound(String),
    #[error("failed to call backend: {0}")]
    Backend(#[from] BackendError),
    #[error("failed to expand MCP tools: {0}")]
    Mcp(#[from] McpError),
    #[error("conversation state error: {0}")]
    State(#[from] StateError),
    #[error("failed to serialize {context}: {source}")]
    Serialization {
        context: &'static str,
        source: serde_json::Error,
    },
}

impl GatewayError {
    /// True when the request itself is at fault
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            GatewayError::Validation(_) | GatewayError::PreviousResponseNotFound(_)
        )
    }

    /// Message without the invalid-request prefix
    pub fn reason(&self) -> String {
        let message = self.to_string();
        match message.strip_prefix(INVALID_REQUEST_PREFIX) {
            Some(reason) => reason.trim_start().to_string(),
            None => message,
        }
    }
}

/// Centralized error mapping utilities
///
/// Engine failures surface in three shapes: an HTTP error for the
/// monolithic server, a typed error on a failed `Response`, and the
/// immediate error body of the proxy filter.
pub mod error_mapping {
    use super::*;
    use crate::web::responses::constants::{
        ERROR_CODE_BACKEND, ERROR_CODE_MCP, ERROR_TYPE_API,
    };
    use crate::ApiError;

    /// Map an engine error to an API error
    ///
    /// # Arguments
    /// * `e` - The engine error to map
    ///
    /// # Returns
    /// `BadRequest` for caller mistakes, `InternalServerError` otherwise
    pub fn map_gateway_error(e: GatewayError) -> ApiError {
        if e.is_invalid_request() {
            return ApiError::BadRequest(e.to_string());
        }
        error!("Gateway error: {}", e);
        ApiError::InternalServerError
    }

    /// Error `(type, code)` attached to a failed response
    pub fn response_error_code(e: &GatewayError) -> (&'static str, &'static str) {
        match e {
            GatewayError::Mcp(_) => (ERROR_TYPE_API, ERROR_CODE_MCP),
            _ => (ERROR_TYPE_API, ERROR_CODE_BACKEND),
        }
    }

    /// Body of an immediate error returned by the proxy filter
    pub fn filter_error_body(error_type: &str, code: &str, message: &str) -> Value {
        json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": code,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::error_mapping::*;
    use super::*;
    use crate::ApiError;

    #[test]
    fn test_invalid_request_detection() {
        let missing = GatewayError::PreviousResponseNotFound("resp_x".to_string());
        assert!(missing.is_invalid_request());
        assert!(GatewayError::Validation(ValidationError::MissingModel).is_invalid_request());

        let backend = GatewayError::Backend(BackendError::Timeout(5));
        assert!(!backend.is_invalid_request());
    }

    #[test]
    fn test_reason_drops_prefix() {
        let missing = GatewayError::PreviousResponseNotFound("resp_x".to_string());
        assert_eq!(missing.reason(), "previous response resp_x not found");

        let backend = GatewayError::Backend(BackendError::Timeout(5));
        assert_eq!(backend.reason(), "failed to call backend: backend request timed out after 5s");
    }

    #[test]
    fn test_map_gateway_error() {
        let api = map_gateway_error(GatewayError::Validation(ValidationError::ConflictingHistory));
        assert!(matches!(api, ApiError::BadRequest(msg) if msg.starts_with("invalid request:")));

        let api = map_gateway_error(GatewayError::Backend(BackendError::Transport(
            "refused".to_string(),
        )));
        assert!(matches!(api, ApiError::InternalServerError));
    }

    #[test]
    fn test_response_error_code() {
        let mcp = GatewayError::Mcp(McpError::UnknownServer("docs".to_string()));
        assert_eq!(response_error_code(&mcp), ("api_error", "mcp_error"));
    }

    #[test]
    fn test_filter_error_body_shape() {
        let body = filter_error_body("bad_request", "bad_request", "Invalid request body: eof");
        assert_eq!(body["error"]["type"], "bad_request");
        assert_eq!(body["error"]["message"], "Invalid request body: eof");
    }
}
