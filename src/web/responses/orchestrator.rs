//! Tool-call orchestration
//!
//! `Engine` owns the collaborators (backend, store, tool executor) and runs
//! the bounded request/execute/resend loop. The streaming and non-streaming
//! paths share one loop; they differ only in how a round is fetched from the
//! backend and in whether the translator's events reach a client.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::adapter::{build_backend_input, build_backend_request, BackendRequest, BackendResponse};
use super::builders::{generate_id, Response, ResponseBuilder, ResponseUsage};
use super::constants::*;
use super::conversions::InputNormalizer;
use super::errors::{error_mapping::response_error_code, GatewayError};
use super::events::{format_sse_events, GatewayEvent};
use super::state::{ConversationState, PreparedRequest, STATE_SCHEMA_VERSION};
use super::storage::{ResponseStore, StoredResponse};
use super::stream_processor::{BackendStreamEvent, UpstreamStreamProcessor};
use super::tools::{
    expand_file_search_tools, expand_mcp_tools, expand_web_search_tools, ExpandedTools,
    ToolExecutor,
};
use super::translator::{accumulate_usage, RoundResult, StreamTranslator};
use super::types::{Message, ResponseRequest, ToolParam};
use crate::web::openai::{BackendError, CompletionBackend};

/// The client went away; nothing more may be emitted
#[derive(Debug)]
struct Cancelled;

enum RoundError {
    Cancelled,
    Backend(BackendError),
}

impl From<Cancelled> for RoundError {
    fn from(_: Cancelled) -> Self {
        RoundError::Cancelled
    }
}

/// Where translator events go: a client channel, or nowhere
#[derive(Clone, Copy)]
struct EventSink<'a> {
    tx: Option<&'a mpsc::Sender<GatewayEvent>>,
}

impl<'a> EventSink<'a> {
    fn discard() -> Self {
        Self { tx: None }
    }

    fn channel(tx: &'a mpsc::Sender<GatewayEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    fn is_streaming(&self) -> bool {
        self.tx.is_some()
    }

    async fn send_all(&self, events: Vec<GatewayEvent>) -> Result<(), Cancelled> {
        let Some(tx) = self.tx else {
            return Ok(());
        };
        for event in events {
            trace!("Emitting {} #{}", event.event_type(), event.sequence_number());
            tx.send(event).await.map_err(|_| Cancelled)?;
        }
        Ok(())
    }

    /// Run `fut` unless the client disconnects first
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        match self.tx {
            None => Ok(fut.await),
            Some(tx) => tokio::select! {
                _ = tx.closed() => Err(Cancelled),
                out = fut => Ok(out),
            },
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    backend: Arc<dyn CompletionBackend>,
    store: Arc<dyn ResponseStore>,
    tools: ToolExecutor,
    max_tool_calls: u32,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        store: Arc<dyn ResponseStore>,
        tools: ToolExecutor,
        max_tool_calls: u32,
    ) -> Self {
        Self {
            backend,
            store,
            tools,
            max_tool_calls: if max_tool_calls == 0 {
                DEFAULT_MAX_TOOL_CALLS
            } else {
                max_tool_calls
            },
        }
    }

    pub fn store(&self) -> &Arc<dyn ResponseStore> {
        &self.store
    }

    /// Validate, load history, normalize input, expand tools and build the
    /// first backend request
    pub async fn prepare_request(
        &self,
        req: &ResponseRequest,
    ) -> Result<PreparedRequest, GatewayError> {
        req.validate()?;

        let (conversation_id, mut messages) = self.load_history(req).await?;
        if let Some(input) = &req.input {
            messages.extend(InputNormalizer::normalize(input));
        }

        let tools = self.expand_tools(req.tools()).await?;
        let backend_request = build_backend_request(req, &messages, &tools, req.is_streaming());

        let state = ConversationState {
            schema_version: STATE_SCHEMA_VERSION,
            conversation_id,
            response_id: generate_id(ID_PREFIX_RESPONSE),
            created_at: Utc::now().timestamp(),
            messages,
            tools,
            original_request: Some(req.clone()),
        };
        info!(
            "Prepared response {} for model {} ({} messages, {} tools)",
            state.response_id,
            req.model(),
            state.messages.len(),
            backend_request.tools.len()
        );
        Ok(PreparedRequest {
            state,
            backend_request,
        })
    }

    /// Conversation id and prior messages for this request
    async fn load_history(
        &self,
        req: &ResponseRequest,
    ) -> Result<(String, Vec<Message>), GatewayError> {
        if let Some(previous_id) = &req.previous_response_id {
            let stored = self
                .store
                .get(previous_id)
                .await
                .ok_or_else(|| GatewayError::PreviousResponseNotFound(previous_id.clone()))?;
            debug!(
                "Continuing from response {} ({} messages)",
                previous_id,
                stored.messages.len()
            );
            return Ok((stored.conversation_id, stored.messages));
        }

        if let Some(conversation) = &req.conversation {
            let id = conversation.id().to_string();
            let messages = match self.store.latest_in_conversation(&id).await {
                Some(latest) => latest.messages,
                None => {
                    debug!("Conversation {} has no stored responses yet", id);
                    vec![]
                }
            };
            return Ok((id, messages));
        }

        Ok((generate_id(ID_PREFIX_CONVERSATION), vec![]))
    }

    /// MCP first (it may fail), then the in-place search substitutions
    async fn expand_tools(&self, declared: &[ToolParam]) -> Result<ExpandedTools, GatewayError> {
        if declared.is_empty() {
            return Ok(ExpandedTools::default());
        }
        let mut expanded = ExpandedTools::default();
        let mut tools = declared.to_vec();

        if let Some(mcp) = &self.tools.mcp {
            let (listed, names) = expand_mcp_tools(tools, mcp.as_ref()).await?;
            tools = listed;
            expanded.mcp_tool_names = names;
        }
        let (tools, file_search) =
            expand_file_search_tools(tools, self.tools.vector_search.is_some());
        let (tools, web_search) = expand_web_search_tools(tools, self.tools.web_search.is_some());

        expanded.expanded_tools = tools;
        expanded.file_search_configs = file_search;
        expanded.web_search_configs = web_search;
        Ok(expanded)
    }

    fn initial_response(state: &ConversationState) -> Response {
        let req = state.original_request.clone().unwrap_or_default();
        ResponseBuilder::new(state.response_id.clone(), req.model())
            .echo_request(&req)
            .conversation(Some(state.conversation_id.clone()))
            .created_at(state.created_at)
            .build()
    }

    /// Response for a request whose preparation failed after validation
    fn failed_translator(
        req: &ResponseRequest,
        err: &GatewayError,
    ) -> (StreamTranslator, Vec<GatewayEvent>) {
        let response = ResponseBuilder::new(generate_id(ID_PREFIX_RESPONSE), req.model())
            .echo_request(req)
            .build();
        let mut translator = StreamTranslator::new(response);
        let mut events = translator.start();
        let (error_type, code) = response_error_code(err);
        events.extend(translator.fail(error_type, code, &err.to_string()));
        (translator, events)
    }

    /// Non-streaming entry point: prepare then run the loop
    ///
    /// Only invalid requests are returned as errors; everything else is a
    /// well-formed response describing the failure.
    pub async fn create_response(&self, req: &ResponseRequest) -> Result<Response, GatewayError> {
        match self.prepare_request(req).await {
            Ok(prepared) => Ok(self.process_request(prepared).await),
            Err(e) if e.is_invalid_request() => Err(e),
            Err(e) => {
                error!("Failed to prepare response: {}", e);
                Ok(Self::failed_translator(req, &e).0.into_response())
            }
        }
    }

    /// Streaming entry point
    pub async fn create_response_stream(
        &self,
        req: &ResponseRequest,
    ) -> Result<mpsc::Receiver<GatewayEvent>, GatewayError> {
        match self.prepare_request(req).await {
            Ok(prepared) => Ok(self.process_request_stream(prepared)),
            Err(e) if e.is_invalid_request() => Err(e),
            Err(e) => {
                error!("Failed to prepare streaming response: {}", e);
                let (_, events) = Self::failed_translator(req, &e);
                let (tx, rx) = mpsc::channel(events.len().max(1));
                for event in events {
                    // Capacity covers every event
                    let _ = tx.try_send(event);
                }
                Ok(rx)
            }
        }
    }

    /// Run the tool-call loop to completion
    pub async fn process_request(&self, prepared: PreparedRequest) -> Response {
        let PreparedRequest {
            mut state,
            mut backend_request,
        } = prepared;
        let mut translator = StreamTranslator::new(Self::initial_response(&state));

        // A discarding sink never cancels
        if self
            .run_loop(&mut state, &mut backend_request, &mut translator, EventSink::discard())
            .await
            .is_err()
        {
            warn!("Non-streaming loop reported a cancellation");
        }

        let response = translator.into_response();
        self.save(&state, &response).await;
        response
    }

    /// Run the tool-call loop in a task, streaming events as they happen
    ///
    /// Dropping the receiver cancels the backend call and any running tool
    /// execution.
    pub fn process_request_stream(&self, prepared: PreparedRequest) -> mpsc::Receiver<GatewayEvent> {
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_BUFFER);
        let engine = self.clone();

        tokio::spawn(async move {
            let PreparedRequest {
                mut state,
                mut backend_request,
            } = prepared;
            let mut translator = StreamTranslator::new(Self::initial_response(&state));

            let outcome = engine
                .run_loop(
                    &mut state,
                    &mut backend_request,
                    &mut translator,
                    EventSink::channel(&tx),
                )
                .await;
            match outcome {
                Ok(()) => {
                    let response = translator.into_response();
                    engine.save(&state, &response).await;
                }
                Err(Cancelled) => {
                    debug!("Client disconnected from response {}", state.response_id);
                }
            }
        });

        rx
    }

    async fn run_loop(
        &self,
        state: &mut ConversationState,
        backend_request: &mut BackendRequest,
        translator: &mut StreamTranslator,
        sink: EventSink<'_>,
    ) -> Result<(), Cancelled> {
        let req = state.original_request.clone().unwrap_or_default();
        let max_rounds = req
            .max_tool_calls
            .filter(|n| *n > 0)
            .map_or(self.max_tool_calls, |n| u32::try_from(n).unwrap_or(u32::MAX));
        let output_budget = req.max_output_tokens;

        let mut usage: Option<ResponseUsage> = None;
        let mut output_tokens_used = 0i64;
        let mut rounds = 0u32;

        sink.send_all(translator.start()).await?;

        loop {
            if rounds >= max_rounds {
                info!(
                    "Response {} reached the tool-call bound of {}",
                    state.response_id, max_rounds
                );
                sink.send_all(translator.incomplete(INCOMPLETE_MAX_TOOL_CALLS, usage))
                    .await?;
                return Ok(());
            }
            if let Some(budget) = output_budget {
                let remaining = budget - output_tokens_used;
                if remaining <= 0 {
                    sink.send_all(translator.incomplete(INCOMPLETE_MAX_OUTPUT_TOKENS, usage))
                        .await?;
                    return Ok(());
                }
                backend_request.max_output_tokens = Some(remaining);
            }

            rounds += 1;
            debug!("Response {} backend round {}", state.response_id, rounds);
            let round = match self.run_round(backend_request, translator, sink).await {
                Ok(round) => round,
                Err(RoundError::Cancelled) => return Err(Cancelled),
                Err(RoundError::Backend(e)) => {
                    error!("Backend call failed for {}: {}", state.response_id, e);
                    let message = format!("failed to call backend: {}", e);
                    sink.send_all(translator.fail(ERROR_TYPE_API, ERROR_CODE_BACKEND, &message))
                        .await?;
                    return Ok(());
                }
            };

            usage = accumulate_usage(usage, round.usage.as_ref());
            if let Some(round_usage) = &round.usage {
                output_tokens_used += round_usage.output_tokens;
            }
            if let Some(message) = &round.error {
                sink.send_all(translator.fail(ERROR_TYPE_API, ERROR_CODE_BACKEND, message))
                    .await?;
                return Ok(());
            }

            let output = &round.output;
            if !output.is_empty() {
                state.messages.push(output.to_message());
            }
            if round.hit_length_limit() {
                sink.send_all(translator.incomplete(INCOMPLETE_MAX_OUTPUT_TOKENS, usage))
                    .await?;
                return Ok(());
            }
            if !output.has_tool_calls {
                info!("Response {} completed after {} rounds", state.response_id, rounds);
                sink.send_all(translator.complete(usage)).await?;
                return Ok(());
            }

            let (server_calls, client_calls): (Vec<_>, Vec<_>) = output
                .tool_calls
                .iter()
                .map(|call| (state.tools.resolve(&call.name), call))
                .partition(|(dispatch, _)| dispatch.is_some());
            let server_calls: Vec<_> = server_calls
                .into_iter()
                .filter_map(|(dispatch, call)| dispatch.map(|d| (d, call)))
                .collect();

            let results = sink.cancellable(self.tools.execute_all(&server_calls)).await?;
            let mut tool_messages = Vec::with_capacity(results.len());
            for ((_, call), result) in server_calls.iter().zip(results) {
                sink.send_all(translator.tool_output(&call.id, result.clone()))
                    .await?;
                tool_messages.push(Message::tool_result(call.id.clone(), result));
            }
            state.messages.extend(tool_messages);

            if !client_calls.is_empty() {
                debug!(
                    "Surfacing {} client-side tool calls for {}",
                    client_calls.len(),
                    state.response_id
                );
                sink.send_all(translator.complete(usage)).await?;
                return Ok(());
            }
            backend_request.input = build_backend_input(&state.messages);
        }
    }

    /// One backend call, translated through the response's translator
    async fn run_round(
        &self,
        request: &BackendRequest,
        translator: &mut StreamTranslator,
        sink: EventSink<'_>,
    ) -> Result<RoundResult, RoundError> {
        translator.begin_round();

        if sink.is_streaming() {
            let mut rx = sink
                .cancellable(self.backend.create_response_stream(request))
                .await?
                .map_err(RoundError::Backend)?;
            loop {
                let Some(event) = sink.cancellable(rx.recv()).await? else {
                    break;
                };
                let done = matches!(event, BackendStreamEvent::Done);
                sink.send_all(translator.on_backend_event(event)).await?;
                if done {
                    break;
                }
            }
        } else {
            let response = self
                .backend
                .create_response(request)
                .await
                .map_err(RoundError::Backend)?;
            translator.replay_backend_response(&response);
        }

        let (events, result) = translator.finish_round();
        sink.send_all(events).await?;
        Ok(result)
    }

    async fn save(&self, state: &ConversationState, response: &Response) {
        let store_enabled = state
            .original_request
            .as_ref()
            .and_then(|r| r.store)
            .unwrap_or(true);
        if !store_enabled {
            trace!("Not storing response {} (store=false)", response.id);
            return;
        }
        let input = state
            .original_request
            .as_ref()
            .and_then(|r| r.input.as_ref())
            .map(InputNormalizer::normalize)
            .unwrap_or_default();
        self.store
            .save(StoredResponse {
                response: response.clone(),
                conversation_id: state.conversation_id.clone(),
                input,
                messages: state.messages.clone(),
            })
            .await;
    }

    /// Finish a proxied exchange from one complete backend response
    ///
    /// The proxy cannot issue further backend calls, so every tool call is
    /// surfaced to the client rather than executed.
    pub async fn process_response(
        &self,
        mut state: ConversationState,
        backend: &BackendResponse,
    ) -> Response {
        let mut translator = StreamTranslator::new(Self::initial_response(&state));
        translator.begin_round();
        translator.replay_backend_response(backend);
        let (_, round) = translator.finish_round();
        let _ = Self::finish_single_round(&mut state, &mut translator, round);

        let response = translator.into_response();
        self.save(&state, &response).await;
        response
    }

    /// Finish a proxied exchange whose backend reported an error
    pub async fn process_failure(
        &self,
        state: ConversationState,
        code: &str,
        message: &str,
    ) -> Response {
        let mut translator = StreamTranslator::new(Self::initial_response(&state));
        translator.start();
        translator.fail(ERROR_TYPE_API, code, message);

        let response = translator.into_response();
        self.save(&state, &response).await;
        response
    }

    /// Translate a buffered chat SSE body into a complete gateway SSE body
    pub async fn translate_stream_body(&self, mut state: ConversationState, body: &[u8]) -> String {
        let mut translator = StreamTranslator::new(Self::initial_response(&state));
        let mut events = translator.start();
        translator.begin_round();

        let mut processor = UpstreamStreamProcessor::new();
        let decoded = processor
            .process_chunk(body)
            .and_then(|mut deltas| {
                deltas.extend(processor.finish()?);
                Ok(deltas)
            });
        match decoded {
            Ok(deltas) => {
                for delta in deltas {
                    events.extend(translator.on_backend_event(delta));
                }
            }
            Err(e) => {
                warn!("Backend stream body could not be decoded: {}", e);
                events.extend(translator.on_backend_event(BackendStreamEvent::Error(e.to_string())));
            }
        }

        let (closing, round) = translator.finish_round();
        events.extend(closing);
        events.extend(Self::finish_single_round(&mut state, &mut translator, round));

        let response = translator.into_response();
        self.save(&state, &response).await;
        format_sse_events(&events)
    }

    /// Terminal transition for a single-round exchange
    fn finish_single_round(
        state: &mut ConversationState,
        translator: &mut StreamTranslator,
        round: RoundResult,
    ) -> Vec<GatewayEvent> {
        let usage = accumulate_usage(None, round.usage.as_ref());
        if let Some(message) = &round.error {
            return translator.fail(ERROR_TYPE_API, ERROR_CODE_BACKEND, message);
        }
        if !round.output.is_empty() {
            state.messages.push(round.output.to_message());
        }
        if round.hit_length_limit() {
            return translator.incomplete(INCOMPLETE_MAX_OUTPUT_TOKENS, usage);
        }
        translator.complete(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchError, VectorSearchResult, VectorSearcher};
    use crate::web::responses::adapter::{
        BackendContentPart, BackendInputItem, BackendOutputContent, BackendOutputItem,
        BackendUsage,
    };
    use crate::web::responses::builders::{OutputItem, ResponseStatus};
    use crate::web::responses::storage::InMemoryResponseStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted backend responses and records every request
    struct FakeBackend {
        responses: Mutex<VecDeque<Result<BackendResponse, BackendError>>>,
        requests: Mutex<Vec<BackendRequest>>,
    }

    impl FakeBackend {
        fn new(responses: Vec<BackendResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(Ok).collect()),
                requests: Mutex::new(vec![]),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::from(vec![Err(BackendError::Status {
                    status: 503,
                    body: "overloaded".to_string(),
                })])),
                requests: Mutex::new(vec![]),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, index: usize) -> BackendRequest {
            self.requests.lock().unwrap()[index].clone()
        }

        fn next(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(text_response("fallback")))
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeBackend {
        async fn create_response(
            &self,
            request: &BackendRequest,
        ) -> Result<BackendResponse, BackendError> {
            self.next(request)
        }

        async fn create_response_stream(
            &self,
            request: &BackendRequest,
        ) -> Result<mpsc::Receiver<BackendStreamEvent>, BackendError> {
            let response = self.next(request)?;
            let (tx, rx) = mpsc::channel(64);
            for (index, item) in response.output.iter().enumerate() {
                match item {
                    BackendOutputItem::Message { content, .. } => {
                        for part in content {
                            if let BackendOutputContent::OutputText { text } = part {
                                // Split to exercise delta accumulation
                                let (head, tail) = text.split_at(text.len() / 2);
                                for piece in [head, tail] {
                                    tx.try_send(BackendStreamEvent::TextDelta(piece.to_string()))
                                        .unwrap();
                                }
                            }
                        }
                    }
                    BackendOutputItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                        ..
                    } => {
                        tx.try_send(BackendStreamEvent::ToolCallDelta {
                            index,
                            id: Some(call_id.clone()),
                            name: Some(name.clone()),
                            arguments: arguments.clone(),
                        })
                        .unwrap();
                    }
                    _ => {}
                }
            }
            if let Some(usage) = response.usage {
                tx.try_send(BackendStreamEvent::Usage {
                    prompt_tokens: usage.input_tokens,
                    completion_tokens: usage.output_tokens,
                })
                .unwrap();
            }
            tx.try_send(BackendStreamEvent::Done).unwrap();
            Ok(rx)
        }
    }

    struct FakeSearcher {
        queries: Mutex<Vec<(String, String, u32)>>,
    }

    #[async_trait]
    impl VectorSearcher for FakeSearcher {
        async fn search(
            &self,
            vector_store_id: &str,
            query: &str,
            top_k: u32,
        ) -> Result<Vec<VectorSearchResult>, SearchError> {
            self.queries.lock().unwrap().push((
                vector_store_id.to_string(),
                query.to_string(),
                top_k,
            ));
            Ok(vec![VectorSearchResult {
                file_id: "file_1".to_string(),
                score: 0.9,
                content: "the answer".to_string(),
            }])
        }
    }

    fn text_response(text: &str) -> BackendResponse {
        BackendResponse {
            id: "backend_resp".to_string(),
            status: Some("completed".to_string()),
            output: vec![BackendOutputItem::Message {
                id: None,
                content: vec![BackendOutputContent::OutputText {
                    text: text.to_string(),
                }],
            }],
            usage: Some(BackendUsage {
                input_tokens: 4,
                output_tokens: 2,
                total_tokens: 6,
            }),
        }
    }

    fn call_response(call_id: &str, name: &str, arguments: &str) -> BackendResponse {
        BackendResponse {
            id: "backend_resp".to_string(),
            status: Some("completed".to_string()),
            output: vec![BackendOutputItem::FunctionCall {
                id: None,
                call_id: call_id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
            usage: Some(BackendUsage {
                input_tokens: 4,
                output_tokens: 3,
                total_tokens: 7,
            }),
        }
    }

    fn engine(backend: Arc<FakeBackend>, searcher: Option<Arc<FakeSearcher>>) -> Engine {
        let tools = ToolExecutor {
            vector_search: searcher.map(|s| s as Arc<dyn VectorSearcher>),
            ..Default::default()
        };
        Engine::new(backend, Arc::new(InMemoryResponseStore::new()), tools, 10)
    }

    fn request(body: Value) -> ResponseRequest {
        serde_json::from_value(body).unwrap()
    }

    fn searcher() -> Arc<FakeSearcher> {
        Arc::new(FakeSearcher {
            queries: Mutex::new(vec![]),
        })
    }

    #[tokio::test]
    async fn test_hello_makes_one_backend_call() {
        let backend = FakeBackend::new(vec![text_response("hi there")]);
        let engine = engine(backend.clone(), None);

        let response = engine
            .create_response(&request(json!({"model": "m", "input": "hello"})))
            .await
            .unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(response.status, ResponseStatus::Completed);
        assert!(response.completed_at.is_some());
        assert_eq!(response.output_text(), "hi there");
        assert!(response.id.starts_with("resp_"));

        let sent = backend.request(0);
        assert_eq!(sent.input.len(), 1);
        assert!(matches!(
            &sent.input[0],
            BackendInputItem::Message { role, content } if role == "user" && content.len() == 1
        ));
        assert!(sent.tools.is_empty());
    }

    #[tokio::test]
    async fn test_file_search_round_trip() {
        let backend = FakeBackend::new(vec![
            call_response("call_1", "file_search", r#"{"query":"x"}"#),
            text_response("found it"),
        ]);
        let searcher = searcher();
        let engine = engine(backend.clone(), Some(searcher.clone()));

        let response = engine
            .create_response(&request(json!({
                "model": "m",
                "input": "look it up",
                "tools": [{"type": "file_search", "vector_store_ids": ["vs_1"]}]
            })))
            .await
            .unwrap();

        assert_eq!(backend.calls(), 2);
        assert_eq!(
            searcher.queries.lock().unwrap().as_slice(),
            &[("vs_1".to_string(), "x".to_string(), 10)]
        );

        // The synthetic function reached the backend, then the tool result
        let first = backend.request(0);
        assert_eq!(first.tools.len(), 1);
        let second = backend.request(1);
        assert!(second.input.iter().any(|item| matches!(
            item,
            BackendInputItem::FunctionCallOutput { call_id, output }
                if call_id == "call_1" && output.contains("the answer")
        )));

        assert_eq!(response.status, ResponseStatus::Completed);
        assert!(matches!(&response.output[0], OutputItem::FunctionCall { name, .. } if name == "file_search"));
        assert!(matches!(&response.output[1], OutputItem::FunctionCallOutput { call_id, .. } if call_id == "call_1"));
        assert_eq!(response.output_text(), "found it");
        // Latest input count, summed output count
        let usage = response.usage.unwrap();
        assert_eq!(usage.input_tokens, 4);
        assert_eq!(usage.output_tokens, 5);
    }

    #[tokio::test]
    async fn test_tool_call_bound_ends_incomplete() {
        let backend = FakeBackend::new(vec![
            call_response("call_1", "file_search", r#"{"query":"a"}"#),
            call_response("call_2", "file_search", r#"{"query":"b"}"#),
            call_response("call_3", "file_search", r#"{"query":"c"}"#),
        ]);
        let engine = engine(backend.clone(), Some(searcher()));

        let response = engine
            .create_response(&request(json!({
                "model": "m",
                "input": "loop",
                "max_tool_calls": 2,
                "tools": [{"type": "file_search", "vector_store_ids": ["vs_1"]}]
            })))
            .await
            .unwrap();

        assert_eq!(backend.calls(), 2);
        assert_eq!(response.status, ResponseStatus::Incomplete);
        assert_eq!(
            response.incomplete_details.unwrap().reason,
            "max tool calls reached"
        );
    }

    #[tokio::test]
    async fn test_client_function_call_is_surfaced() {
        let backend = FakeBackend::new(vec![call_response(
            "call_w",
            "get_weather",
            r#"{"city":"Paris"}"#,
        )]);
        let engine = engine(backend.clone(), None);

        let response = engine
            .create_response(&request(json!({
                "model": "m",
                "input": "weather?",
                "tools": [{"type": "function", "name": "get_weather", "parameters": {"type": "object"}}]
            })))
            .await
            .unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output.len(), 1);
        assert!(matches!(
            &response.output[0],
            OutputItem::FunctionCall { call_id, arguments, .. }
                if call_id == "call_w" && arguments == r#"{"city":"Paris"}"#
        ));
        assert_eq!(response.tool_choice, json!("auto"));
    }

    #[tokio::test]
    async fn test_backend_failure_marks_response_failed() {
        let backend = FakeBackend::failing();
        let engine = engine(backend, None);

        let response = engine
            .create_response(&request(json!({"model": "m", "input": "hello"})))
            .await
            .unwrap();

        assert_eq!(response.status, ResponseStatus::Failed);
        let error = response.error.unwrap();
        assert_eq!(error.error_type, "api_error");
        assert_eq!(error.code.as_deref(), Some("backend_error"));
        assert!(error.message.contains("overloaded"));
    }

    #[tokio::test]
    async fn test_output_token_budget_spans_rounds() {
        let backend = FakeBackend::new(vec![
            call_response("call_1", "file_search", r#"{"query":"a"}"#),
            text_response("unused"),
        ]);
        let engine = engine(backend.clone(), Some(searcher()));

        let response = engine
            .create_response(&request(json!({
                "model": "m",
                "input": "budget",
                "max_output_tokens": 3,
                "tools": [{"type": "file_search", "vector_store_ids": ["vs_1"]}]
            })))
            .await
            .unwrap();

        assert_eq!(backend.request(0).max_output_tokens, Some(3));
        assert_eq!(backend.calls(), 1);
        assert_eq!(response.status, ResponseStatus::Incomplete);
        assert_eq!(response.incomplete_details.unwrap().reason, "max_output_tokens");
    }

    #[tokio::test]
    async fn test_previous_response_history() {
        let backend = FakeBackend::new(vec![text_response("first"), text_response("second")]);
        let engine = engine(backend.clone(), None);

        let first = engine
            .create_response(&request(json!({"model": "m", "input": "one"})))
            .await
            .unwrap();
        let second = engine
            .create_response(&request(json!({
                "model": "m",
                "input": "two",
                "previous_response_id": first.id
            })))
            .await
            .unwrap();

        // user, assistant, user
        assert_eq!(backend.request(1).input.len(), 3);
        assert_eq!(second.conversation, first.conversation);
        assert_eq!(second.previous_response_id.as_deref(), Some(first.id.as_str()));
    }

    #[tokio::test]
    async fn test_refusal_round_is_kept_in_history() {
        let refusal = BackendResponse {
            id: "backend_resp".to_string(),
            status: Some("completed".to_string()),
            output: vec![BackendOutputItem::Message {
                id: None,
                content: vec![BackendOutputContent::Refusal {
                    refusal: "I can't help with that".to_string(),
                }],
            }],
            usage: None,
        };
        let backend = FakeBackend::new(vec![refusal, text_response("ok")]);
        let engine = engine(backend.clone(), None);

        let first = engine
            .create_response(&request(json!({"model": "m", "input": "one"})))
            .await
            .unwrap();
        assert_eq!(first.status, ResponseStatus::Completed);
        engine
            .create_response(&request(json!({
                "model": "m",
                "input": "two",
                "previous_response_id": first.id
            })))
            .await
            .unwrap();

        let input = backend.request(1).input;
        assert_eq!(input.len(), 3);
        let BackendInputItem::Message { role, content } = &input[1] else {
            panic!("expected the assistant turn");
        };
        assert_eq!(role, "assistant");
        assert!(matches!(
            &content[0],
            BackendContentPart::InputText { text } if text == "I can't help with that"
        ));
    }

    #[tokio::test]
    async fn test_unknown_previous_response_is_invalid() {
        let backend = FakeBackend::new(vec![]);
        let engine = engine(backend.clone(), None);

        let err = engine
            .create_response(&request(json!({
                "model": "m",
                "input": "two",
                "previous_response_id": "resp_missing"
            })))
            .await
            .unwrap_err();

        assert!(err.is_invalid_request());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_conversation_continues_from_latest() {
        let backend = FakeBackend::new(vec![text_response("a"), text_response("b")]);
        let engine = engine(backend.clone(), None);

        for input in ["one", "two"] {
            let response = engine
                .create_response(&request(json!({
                    "model": "m",
                    "input": input,
                    "conversation": "conv_fixed"
                })))
                .await
                .unwrap();
            assert_eq!(response.conversation.unwrap().id, "conv_fixed");
        }
        assert_eq!(backend.request(0).input.len(), 1);
        assert_eq!(backend.request(1).input.len(), 3);
    }

    #[tokio::test]
    async fn test_stream_event_order() {
        let backend = FakeBackend::new(vec![
            call_response("call_1", "file_search", r#"{"query":"x"}"#),
            text_response("done now"),
        ]);
        let engine = engine(backend, Some(searcher()));

        let mut rx = engine
            .create_response_stream(&request(json!({
                "model": "m",
                "input": "stream it",
                "stream": true,
                "tools": [{"type": "file_search", "vector_store_ids": ["vs_1"]}]
            })))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(events[0].event_type(), "response.created");
        assert_eq!(events[1].event_type(), "response.in_progress");
        assert_eq!(events.last().unwrap().event_type(), "response.completed");
        for (expected, event) in events.iter().enumerate() {
            assert_eq!(event.sequence_number(), expected as u64);
        }

        // function_call, function_call_output, message take indices 0, 1, 2
        let added: Vec<usize> = events
            .iter()
            .filter_map(|e| match e.payload() {
                Some(crate::web::responses::events::EventPayload::OutputItemAdded {
                    output_index,
                    ..
                }) => Some(*output_index),
                _ => None,
            })
            .collect();
        assert_eq!(added, vec![0, 1, 2]);

        let deltas: String = events
            .iter()
            .filter_map(|e| match e.payload() {
                Some(crate::web::responses::events::EventPayload::OutputTextDelta {
                    delta, ..
                }) => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, "done now");
    }

    #[tokio::test]
    async fn test_process_response_surfaces_calls() {
        let backend = FakeBackend::new(vec![]);
        let searcher = searcher();
        let engine = engine(backend.clone(), Some(searcher.clone()));
        let prepared = engine
            .prepare_request(&request(json!({
                "model": "m",
                "input": "proxy",
                "tools": [{"type": "file_search", "vector_store_ids": ["vs_1"]}]
            })))
            .await
            .unwrap();
        let response_id = prepared.state.response_id.clone();

        let response = engine
            .process_response(
                prepared.state,
                &call_response("call_1", "file_search", r#"{"query":"x"}"#),
            )
            .await;

        assert_eq!(response.id, response_id);
        assert_eq!(response.status, ResponseStatus::Completed);
        assert!(matches!(&response.output[0], OutputItem::FunctionCall { .. }));
        assert!(searcher.queries.lock().unwrap().is_empty());
        assert_eq!(backend.calls(), 0);
        assert!(engine.store().get(&response_id).await.is_some());
    }

    #[tokio::test]
    async fn test_translate_stream_body() {
        let engine = engine(FakeBackend::new(vec![]), None);
        let prepared = engine
            .prepare_request(&request(json!({"model": "m", "input": "hi", "stream": true})))
            .await
            .unwrap();
        let response_id = prepared.state.response_id.clone();

        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n"
        );
        let sse = engine
            .translate_stream_body(prepared.state, body.as_bytes())
            .await;

        assert!(sse.starts_with("event: response.created\n"));
        assert!(sse.contains("event: response.output_text.delta\n"));
        assert!(sse.contains(&response_id));
        assert!(sse.trim_end().ends_with('}'));
        assert!(sse.contains("event: response.completed\n"));
    }
}
