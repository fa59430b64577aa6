//! Chat-completions backend transport
//!
//! The orchestrator only sees `CompletionBackend`; this module lowers each
//! round to a chat-completions call over hyper and lifts the reply (or the
//! SSE body, chunk by chunk) back into backend types.

use async_trait::async_trait;
use futures::StreamExt;
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::{Body as HyperBody, Client, Request};
use hyper_tls::HttpsConnector;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::web::responses::adapter::{BackendRequest, BackendResponse};
use crate::web::responses::chat::{from_chat_response, to_chat_request, ChatCompletionResponse};
use crate::web::responses::constants::BACKEND_CHANNEL_BUFFER;
use crate::web::responses::stream_processor::{BackendStreamEvent, UpstreamStreamProcessor};

/// Default timeout for a backend request and for each streamed chunk
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to build backend request: {0}")]
    Request(String),
    #[error("failed to connect to backend: {0}")]
    Transport(String),
    #[error("backend request timed out after {0}s")]
    Timeout(u64),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse backend response: {0}")]
    InvalidResponse(String),
    #[error("backend reported {code}: {message}")]
    Reported { code: String, message: String },
}

/// The inference service one tool-call round talks to
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn create_response(&self, request: &BackendRequest)
        -> Result<BackendResponse, BackendError>;

    /// Dropping the receiver aborts the upstream request
    async fn create_response_stream(
        &self,
        request: &BackendRequest,
    ) -> Result<mpsc::Receiver<BackendStreamEvent>, BackendError>;
}

pub struct ChatCompletionsBackend {
    client: Client<HttpsConnector<HttpConnector>, HyperBody>,
    completions_url: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl ChatCompletionsBackend {
    /// `base_url` already includes the API version, e.g. `https://host/v1`
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Self {
        let https = HttpsConnector::new();
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build::<_, HyperBody>(https);

        Self {
            client,
            completions_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout_secs,
        }
    }

    /// Send one request; non-success statuses are turned into errors here
    async fn send(&self, body_json: String) -> Result<hyper::Response<HyperBody>, BackendError> {
        let mut req = Request::builder()
            .method("POST")
            .uri(self.completions_url.as_str())
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        trace!(
            "Sending to backend url={} body_len={}",
            self.completions_url,
            body_json.len()
        );
        let req = req
            .body(HyperBody::from(body_json))
            .map_err(|e| BackendError::Request(e.to_string()))?;

        match timeout(Duration::from_secs(self.timeout_secs), self.client.request(req)).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(response),
            Ok(Ok(response)) => {
                let status = response.status();
                error!("Backend returned non-success status: {}", status);
                let body = match to_bytes(response.into_body()).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                    Err(_) => String::new(),
                };
                Err(BackendError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
            Ok(Err(e)) => {
                error!("Failed to send request to backend: {:?}", e);
                Err(BackendError::Transport(e.to_string()))
            }
            Err(_) => {
                error!("Backend request timed out after {}s", self.timeout_secs);
                Err(BackendError::Timeout(self.timeout_secs))
            }
        }
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionsBackend {
    async fn create_response(
        &self,
        request: &BackendRequest,
    ) -> Result<BackendResponse, BackendError> {
        let mut chat = to_chat_request(request);
        chat.stream = None;
        chat.stream_options = None;
        let body_json =
            serde_json::to_string(&chat).map_err(|e| BackendError::Request(e.to_string()))?;

        let response = self.send(body_json).await?;
        let bytes = timeout(
            Duration::from_secs(self.timeout_secs),
            to_bytes(response.into_body()),
        )
        .await
        .map_err(|_| BackendError::Timeout(self.timeout_secs))?
        .map_err(|e| BackendError::Transport(e.to_string()))?;

        let completion: ChatCompletionResponse = serde_json::from_slice(&bytes).map_err(|e| {
            error!("Failed to parse backend response: {:?}", e);
            BackendError::InvalidResponse(e.to_string())
        })?;
        debug!(
            "Backend completion {} returned {} choices",
            completion.id,
            completion.choices.len()
        );
        if let Some(failure) = completion.failure() {
            warn!("Backend completion carried an error: {}", failure.message);
            return Err(BackendError::Reported {
                code: failure.code,
                message: failure.message,
            });
        }
        Ok(from_chat_response(&completion))
    }

    async fn create_response_stream(
        &self,
        request: &BackendRequest,
    ) -> Result<mpsc::Receiver<BackendStreamEvent>, BackendError> {
        let mut stream_request = request.clone();
        stream_request.stream = true;
        let chat = to_chat_request(&stream_request);
        let body_json =
            serde_json::to_string(&chat).map_err(|e| BackendError::Request(e.to_string()))?;

        let response = self.send(body_json).await?;
        let (tx, rx) = mpsc::channel(BACKEND_CHANNEL_BUFFER);
        let chunk_timeout = self.timeout_secs;

        tokio::spawn(async move {
            let mut body = response.into_body();
            let mut processor = UpstreamStreamProcessor::new();

            loop {
                let events = match timeout(Duration::from_secs(chunk_timeout), body.next()).await {
                    Ok(Some(Ok(bytes))) => processor.process_chunk(&bytes),
                    Ok(Some(Err(e))) => {
                        error!("Stream error: {:?}", e);
                        let _ = tx.send(BackendStreamEvent::Error(e.to_string())).await;
                        return;
                    }
                    // Stream ended, possibly without [DONE]
                    Ok(None) => processor.finish(),
                    Err(_) => {
                        error!("Stream chunk timeout after {}s", chunk_timeout);
                        let _ = tx
                            .send(BackendStreamEvent::Error("Stream timeout".to_string()))
                            .await;
                        return;
                    }
                };

                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("Dropping backend stream: {}", e);
                        let _ = tx.send(BackendStreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                for event in events {
                    let done = matches!(event, BackendStreamEvent::Done);
                    if tx.send(event).await.is_err() {
                        // Receiver dropped; dropping the body closes the connection
                        debug!("Backend stream receiver dropped");
                        return;
                    }
                    if done {
                        return;
                    }
                }
                if processor.is_done() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::responses::adapter::{build_backend_input, BackendOutputItem};
    use crate::web::responses::types::Message;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn request(stream: bool) -> BackendRequest {
        BackendRequest {
            model: "m".to_string(),
            input: build_backend_input(&[Message::user_text("hello")]),
            stream,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_response_round_trip() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["messages"][0]["content"], "hello");
                assert!(body.get("stream").is_none());
                Json(json!({
                    "id": "chatcmpl-1",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "hi there"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
                }))
            }),
        );
        let base = serve(router).await;
        let backend = ChatCompletionsBackend::new(&base, Some("sk-test".to_string()), 5);

        let response = backend.create_response(&request(false)).await.unwrap();
        assert!(matches!(&response.output[0], BackendOutputItem::Message { .. }));
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let base = serve(router).await;
        let backend = ChatCompletionsBackend::new(&base, None, 5);

        let err = backend.create_response(&request(false)).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 503, ref body } if body == "overloaded"));
    }

    #[tokio::test]
    async fn test_stream_yields_typed_events() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], true);
                assert_eq!(body["stream_options"]["include_usage"], true);
                concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                    "data: [DONE]\n\n"
                )
            }),
        );
        let base = serve(router).await;
        let backend = ChatCompletionsBackend::new(&base, None, 5);

        let mut rx = backend.create_response_stream(&request(false)).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                BackendStreamEvent::TextDelta("Hi".to_string()),
                BackendStreamEvent::Finished {
                    finish_reason: "stop".to_string()
                },
                BackendStreamEvent::Done,
            ]
        );
    }
}
