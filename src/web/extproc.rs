//! Proxy filter processor
//!
//! Intercepts one proxied exchange in four phases. The request body is
//! rewritten into a backend chat-completions request and the conversation
//! state rides along through the configured codec; the response body is
//! rebuilt into a gateway `Response` (or a gateway SSE body) from that state.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::web::responses::builders::generate_request_id;
use crate::web::responses::chat::{from_chat_response, to_chat_request, ChatCompletionResponse};
use crate::web::responses::errors::error_mapping::filter_error_body;
use crate::web::responses::orchestrator::Engine;
use crate::web::responses::state::{ConversationState, StateCodec};
use crate::web::responses::types::{ResponseRequest, ValidationError};
use crate::AppState;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const ERROR_TYPE_BAD_REQUEST: &str = "bad_request";
const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
const ERROR_TYPE_INTERNAL: &str = "internal_server_error";

/// One phase message from the proxy; bodies are UTF-8 text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProcessingRequest {
    RequestHeaders {
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    RequestBody {
        body: String,
    },
    ResponseHeaders {
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// The original request's headers and body are echoed so a stateless
    /// sidecar can recover the conversation state
    ResponseBody {
        body: String,
        #[serde(default)]
        request_headers: HashMap<String, String>,
        #[serde(default)]
        request_body: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderValue {
    pub key: String,
    pub value: String,
}

impl HeaderValue {
    fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderMutation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_headers: Vec<HeaderValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_headers: Vec<String>,
}

/// An empty `CommonResponse` means "continue unmodified"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_mutation: Option<HeaderMutation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_mutation: Option<String>,
}

/// Ends the exchange without contacting the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImmediateResponse {
    pub status: u16,
    pub headers: Vec<HeaderValue>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum ProcessingResponse {
    RequestHeaders(CommonResponse),
    RequestBody(CommonResponse),
    ResponseHeaders(CommonResponse),
    ResponseBody(CommonResponse),
    Immediate(ImmediateResponse),
}

impl ProcessingResponse {
    fn error(status: u16, error_type: &str, message: &str) -> Self {
        let body = filter_error_body(error_type, &status.to_string(), message);
        ProcessingResponse::Immediate(ImmediateResponse {
            status,
            headers: vec![HeaderValue::new("content-type", "application/json")],
            body: body.to_string(),
        })
    }

    fn bad_request(message: &str) -> Self {
        Self::error(400, ERROR_TYPE_BAD_REQUEST, message)
    }

    fn unprocessable(message: &str) -> Self {
        Self::error(422, ERROR_TYPE_INVALID_REQUEST, message)
    }

    fn internal(message: &str) -> Self {
        Self::error(500, ERROR_TYPE_INTERNAL, message)
    }

    fn pass_through_body() -> Self {
        ProcessingResponse::ResponseBody(CommonResponse::default())
    }
}

/// Per-exchange memory of the in-process driver
#[derive(Debug)]
pub struct ExchangeContext {
    pub request_id: String,
    state: Option<ConversationState>,
}

impl Default for ExchangeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeContext {
    pub fn new() -> Self {
        Self {
            request_id: generate_request_id(),
            state: None,
        }
    }
}

pub struct FilterProcessor {
    engine: Engine,
    codec: Box<dyn StateCodec>,
}

impl FilterProcessor {
    pub fn new(engine: Engine, codec: Box<dyn StateCodec>) -> Self {
        Self { engine, codec }
    }

    pub async fn process(
        &self,
        ctx: &mut ExchangeContext,
        request: ProcessingRequest,
    ) -> ProcessingResponse {
        match request {
            ProcessingRequest::RequestHeaders { .. } => {
                debug!("processing request headers for {}", ctx.request_id);
                Self::request_headers()
            }
            ProcessingRequest::RequestBody { body } => {
                debug!("processing request body for {}", ctx.request_id);
                self.request_body(ctx, &body).await
            }
            ProcessingRequest::ResponseHeaders { .. } => {
                debug!("processing response headers for {}", ctx.request_id);
                ProcessingResponse::ResponseHeaders(CommonResponse::default())
            }
            ProcessingRequest::ResponseBody {
                body,
                request_headers,
                request_body,
            } => {
                debug!("processing response body for {}", ctx.request_id);
                self.response_body(ctx, &body, &request_headers, request_body.as_deref())
                    .await
            }
        }
    }

    /// The body is replaced later, so drop the stale length and reroute
    fn request_headers() -> ProcessingResponse {
        ProcessingResponse::RequestHeaders(CommonResponse {
            header_mutation: Some(HeaderMutation {
                set_headers: vec![HeaderValue::new(":path", CHAT_COMPLETIONS_PATH)],
                remove_headers: vec!["content-length".to_string()],
            }),
            body_mutation: None,
        })
    }

    async fn request_body(&self, ctx: &mut ExchangeContext, body: &str) -> ProcessingResponse {
        let request: ResponseRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(e) => {
                warn!("failed to parse request body for {}: {}", ctx.request_id, e);
                return ProcessingResponse::bad_request(&format!("Invalid request body: {}", e));
            }
        };
        match request.validate() {
            Err(e @ (ValidationError::MissingModel | ValidationError::MissingInput)) => {
                return ProcessingResponse::unprocessable(&e.to_string());
            }
            // Conflicting history is reported by preparation
            _ => {}
        }

        info!(
            "preparing request {} for model {}",
            ctx.request_id,
            request.model()
        );
        let prepared = match self.engine.prepare_request(&request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("failed to prepare request {}: {}", ctx.request_id, e);
                if e.is_invalid_request() {
                    return ProcessingResponse::bad_request(&e.reason());
                }
                return ProcessingResponse::internal(&format!("Failed to prepare request: {}", e));
            }
        };

        let chat = to_chat_request(&prepared.backend_request);
        let chat_body = match serde_json::to_vec(&chat) {
            Ok(body) => body,
            Err(e) => {
                error!("failed to serialize request {}: {}", ctx.request_id, e);
                return ProcessingResponse::internal("Failed to serialize request");
            }
        };
        let injected = self
            .codec
            .inject_into_headers(&prepared.state)
            .and_then(|headers| {
                let body = self.codec.inject_into_body(&chat_body, &prepared.state)?;
                Ok((headers, body))
            });
        let (state_headers, body) = match injected {
            Ok(injected) => injected,
            Err(e) => {
                error!("failed to encode state for {}: {}", ctx.request_id, e);
                return ProcessingResponse::internal("Failed to serialize request");
            }
        };

        info!(
            "request {} prepared as response {} in conversation {}",
            ctx.request_id, prepared.state.response_id, prepared.state.conversation_id
        );
        ctx.state = Some(prepared.state);

        ProcessingResponse::RequestBody(CommonResponse {
            header_mutation: Some(HeaderMutation {
                set_headers: state_headers
                    .iter()
                    .map(|(key, value)| HeaderValue::new(key, value.clone()))
                    .collect(),
                remove_headers: vec![],
            }),
            body_mutation: Some(String::from_utf8_lossy(&body).into_owned()),
        })
    }

    /// State from this exchange's own request phase, else from the codec
    fn recover_state(
        &self,
        ctx: &mut ExchangeContext,
        request_headers: &HashMap<String, String>,
        request_body: Option<&str>,
    ) -> Option<ConversationState> {
        if let Some(state) = ctx.state.take() {
            return Some(state);
        }
        let body = request_body.unwrap_or_default().as_bytes();
        match self.codec.extract(request_headers, body) {
            Ok(state) => Some(state),
            Err(e) => {
                debug!("no conversation state for {}: {}", ctx.request_id, e);
                None
            }
        }
    }

    async fn response_body(
        &self,
        ctx: &mut ExchangeContext,
        body: &str,
        request_headers: &HashMap<String, String>,
        request_body: Option<&str>,
    ) -> ProcessingResponse {
        let Some(state) = self.recover_state(ctx, request_headers, request_body) else {
            debug!("passing response through for {}", ctx.request_id);
            return ProcessingResponse::pass_through_body();
        };

        debug!(
            "rebuilding {} response for {} (model {})",
            if state.is_streaming() { "streamed" } else { "buffered" },
            ctx.request_id,
            state.model()
        );
        if state.is_streaming() {
            let sse = self.engine.translate_stream_body(state, body.as_bytes()).await;
            return Self::rewritten_body(sse, "text/event-stream");
        }

        let completion: ChatCompletionResponse = match serde_json::from_str(body) {
            Ok(completion) => completion,
            Err(e) => {
                error!(
                    "failed to parse backend response for {}: {}",
                    ctx.request_id, e
                );
                return ProcessingResponse::pass_through_body();
            }
        };
        let response = match completion.failure() {
            Some(failure) => {
                warn!(
                    "backend reported {} for {}: {}",
                    failure.code, ctx.request_id, failure.message
                );
                self.engine
                    .process_failure(state, &failure.code, &failure.message)
                    .await
            }
            None => {
                let backend = from_chat_response(&completion);
                self.engine.process_response(state, &backend).await
            }
        };
        info!(
            "response {} processed for {} with status {}",
            response.id,
            ctx.request_id,
            response.status.as_str()
        );

        match serde_json::to_string(&response) {
            Ok(json) => Self::rewritten_body(json, "application/json"),
            Err(e) => {
                error!("failed to marshal final response for {}: {}", ctx.request_id, e);
                ProcessingResponse::pass_through_body()
            }
        }
    }

    fn rewritten_body(body: String, content_type: &str) -> ProcessingResponse {
        ProcessingResponse::ResponseBody(CommonResponse {
            header_mutation: Some(HeaderMutation {
                set_headers: vec![HeaderValue::new("content-type", content_type)],
                remove_headers: vec!["content-length".to_string()],
            }),
            body_mutation: Some(body),
        })
    }

    /// Drive one exchange from a stream of phase messages
    ///
    /// Ends when the proxy closes its side or stops reading.
    pub async fn run_exchange(
        &self,
        mut rx: mpsc::Receiver<ProcessingRequest>,
        tx: mpsc::Sender<ProcessingResponse>,
    ) {
        let mut ctx = ExchangeContext::new();
        debug!("new filter exchange {}", ctx.request_id);
        while let Some(request) = rx.recv().await {
            let response = self.process(&mut ctx, request).await;
            if tx.send(response).await.is_err() {
                warn!("proxy stopped reading exchange {}", ctx.request_id);
                return;
            }
        }
        debug!("filter exchange {} closed", ctx.request_id);
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/extproc", post(process_phase))
        .with_state(state)
}

/// Stateless sidecar: one phase message per call
async fn process_phase(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProcessingRequest>,
) -> Json<ProcessingResponse> {
    let mut ctx = ExchangeContext::new();
    Json(state.filter.process(&mut ctx, request).await)
}
