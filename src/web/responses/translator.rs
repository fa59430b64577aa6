//! Streaming translator
//!
//! Turns typed backend deltas into the gateway's event sequence. One
//! translator lives for the whole response: it owns the sequence counter,
//! the output-index allocator and the response snapshot that lifecycle
//! events carry, so indices keep increasing across tool-call rounds.

use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use super::adapter::{parse_backend_output, BackendResponse, BackendUsage, ParsedOutput};
use super::builders::{
    build_usage, generate_id, ContentPartBuilder, OutputContent, OutputItem, OutputItemBuilder,
    Response, ResponseUsage,
};
use super::constants::*;
use super::events::{EventPayload, GatewayEvent, SseEventEmitter};
use super::stream_processor::BackendStreamEvent;
use super::types::ToolCall;

#[derive(Debug)]
struct MessageState {
    item_id: String,
    output_index: usize,
    next_content_index: usize,
    text: Option<(usize, String)>,
    refusal: Option<(usize, String)>,
}

#[derive(Debug)]
struct ReasoningState {
    item_id: String,
    output_index: usize,
    text: String,
}

#[derive(Debug)]
struct ToolCallState {
    item_id: String,
    output_index: usize,
    call_id: String,
    name: String,
    arguments: String,
}

/// Items opened during the current backend round
#[derive(Debug, Default)]
struct RoundState {
    message: Option<MessageState>,
    reasoning: Option<ReasoningState>,
    /// Keyed by the backend's tool-call index
    tool_calls: BTreeMap<usize, ToolCallState>,
    finish_reason: Option<String>,
    usage: Option<BackendUsage>,
    error: Option<String>,
}

/// What one backend round produced once its items are closed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundResult {
    pub output: ParsedOutput,
    pub finish_reason: Option<String>,
    pub usage: Option<BackendUsage>,
    pub error: Option<String>,
}

impl RoundResult {
    /// True when the backend stopped on its token limit
    pub fn hit_length_limit(&self) -> bool {
        self.finish_reason.as_deref() == Some(FINISH_REASON_LENGTH)
    }
}

pub struct StreamTranslator {
    emitter: SseEventEmitter,
    response: Response,
    next_output_index: usize,
    round: RoundState,
}

impl StreamTranslator {
    /// `response` is the in-progress snapshot with echoed request fields
    pub fn new(response: Response) -> Self {
        Self {
            emitter: SseEventEmitter::new(),
            response,
            next_output_index: 0,
            round: RoundState::default(),
        }
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    fn snapshot(&self) -> Box<Response> {
        Box::new(self.response.clone())
    }

    fn allocate_output_index(&mut self) -> usize {
        let index = self.next_output_index;
        self.next_output_index += 1;
        index
    }

    /// `response.created` then `response.in_progress`
    pub fn start(&mut self) -> Vec<GatewayEvent> {
        let created = EventPayload::Created {
            response: self.snapshot(),
        };
        let in_progress = EventPayload::InProgress {
            response: self.snapshot(),
        };
        vec![self.emitter.emit(created), self.emitter.emit(in_progress)]
    }

    /// Reset per-round state before the next backend call
    pub fn begin_round(&mut self) {
        self.round = RoundState::default();
    }

    fn ensure_message(&mut self, events: &mut Vec<GatewayEvent>) {
        if self.round.message.is_some() {
            return;
        }
        let item_id = generate_id(ID_PREFIX_MESSAGE);
        let output_index = self.allocate_output_index();
        let item = OutputItemBuilder::new_message(item_id.clone()).build();
        events.push(self.emitter.emit(EventPayload::OutputItemAdded { output_index, item }));
        self.round.message = Some(MessageState {
            item_id,
            output_index,
            next_content_index: 0,
            text: None,
            refusal: None,
        });
    }

    fn on_text_delta(&mut self, delta: String, events: &mut Vec<GatewayEvent>) {
        self.ensure_message(events);
        let Some(msg) = self.round.message.as_mut() else {
            return;
        };
        let item_id = msg.item_id.clone();
        let output_index = msg.output_index;
        let content_index = match &mut msg.text {
            Some((index, text)) => {
                text.push_str(&delta);
                *index
            }
            None => {
                let index = msg.next_content_index;
                msg.next_content_index += 1;
                msg.text = Some((index, delta.clone()));
                let part = ContentPartBuilder::new_output_text(String::new()).build();
                events.push(self.emitter.emit(EventPayload::ContentPartAdded {
                    item_id: item_id.clone(),
                    output_index,
                    content_index: index,
                    part,
                }));
                index
            }
        };
        events.push(self.emitter.emit(EventPayload::OutputTextDelta {
            item_id,
            output_index,
            content_index,
            delta,
            logprobs: vec![],
        }));
    }

    fn on_refusal_delta(&mut self, delta: String, events: &mut Vec<GatewayEvent>) {
        self.ensure_message(events);
        let Some(msg) = self.round.message.as_mut() else {
            return;
        };
        let item_id = msg.item_id.clone();
        let output_index = msg.output_index;
        let content_index = match &mut msg.refusal {
            Some((index, refusal)) => {
                refusal.push_str(&delta);
                *index
            }
            None => {
                let index = msg.next_content_index;
                msg.next_content_index += 1;
                msg.refusal = Some((index, delta.clone()));
                let part = ContentPartBuilder::new_refusal(String::new()).build();
                events.push(self.emitter.emit(EventPayload::ContentPartAdded {
                    item_id: item_id.clone(),
                    output_index,
                    content_index: index,
                    part,
                }));
                index
            }
        };
        events.push(self.emitter.emit(EventPayload::RefusalDelta {
            item_id,
            output_index,
            content_index,
            delta,
        }));
    }

    fn on_reasoning_delta(&mut self, delta: String, events: &mut Vec<GatewayEvent>) {
        if self.round.reasoning.is_none() {
            let item_id = generate_id(ID_PREFIX_REASONING);
            let output_index = self.allocate_output_index();
            let item = OutputItem::reasoning(item_id.clone(), String::new(), STATUS_IN_PROGRESS);
            events.push(self.emitter.emit(EventPayload::OutputItemAdded { output_index, item }));
            self.round.reasoning = Some(ReasoningState {
                item_id,
                output_index,
                text: String::new(),
            });
        }
        let Some(reasoning) = self.round.reasoning.as_mut() else {
            return;
        };
        reasoning.text.push_str(&delta);
        let payload = EventPayload::ReasoningDelta {
            item_id: reasoning.item_id.clone(),
            output_index: reasoning.output_index,
            content_index: 0,
            delta,
        };
        events.push(self.emitter.emit(payload));
    }

    fn on_tool_call_delta(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
        events: &mut Vec<GatewayEvent>,
    ) {
        if !self.round.tool_calls.contains_key(&index) {
            let item_id = generate_id(ID_PREFIX_FUNCTION_CALL);
            let output_index = self.allocate_output_index();
            let state = ToolCallState {
                item_id: item_id.clone(),
                output_index,
                call_id: id.clone().unwrap_or_default(),
                name: name.clone().unwrap_or_default(),
                arguments: String::new(),
            };
            let item = OutputItem::FunctionCall {
                id: item_id,
                call_id: state.call_id.clone(),
                name: state.name.clone(),
                arguments: String::new(),
                status: STATUS_IN_PROGRESS.to_string(),
            };
            events.push(self.emitter.emit(EventPayload::OutputItemAdded { output_index, item }));
            self.round.tool_calls.insert(index, state);
        }

        let Some(state) = self.round.tool_calls.get_mut(&index) else {
            return;
        };
        // Some backends send id or name after the first fragment
        if let Some(id) = id.filter(|_| state.call_id.is_empty()) {
            state.call_id = id;
        }
        if let Some(name) = name.filter(|_| state.name.is_empty()) {
            state.name = name;
        }
        if arguments.is_empty() {
            return;
        }
        state.arguments.push_str(&arguments);
        let payload = EventPayload::FunctionCallArgumentsDelta {
            item_id: state.item_id.clone(),
            output_index: state.output_index,
            delta: arguments,
        };
        events.push(self.emitter.emit(payload));
    }

    /// Translate one backend delta; events are returned in emission order
    pub fn on_backend_event(&mut self, event: BackendStreamEvent) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        match event {
            BackendStreamEvent::TextDelta(delta) => self.on_text_delta(delta, &mut events),
            BackendStreamEvent::RefusalDelta(delta) => self.on_refusal_delta(delta, &mut events),
            BackendStreamEvent::ReasoningDelta(delta) => {
                self.on_reasoning_delta(delta, &mut events)
            }
            BackendStreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => self.on_tool_call_delta(index, id, name, arguments, &mut events),
            BackendStreamEvent::Usage {
                prompt_tokens,
                completion_tokens,
            } => {
                self.round.usage = Some(BackendUsage {
                    input_tokens: prompt_tokens,
                    output_tokens: completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                });
            }
            BackendStreamEvent::Finished { finish_reason } => {
                self.round.finish_reason = Some(finish_reason);
            }
            BackendStreamEvent::Passthrough { event_type, data } => {
                let id = self.response.id.clone();
                events.push(self.emitter.emit_raw(&event_type, &data, &id));
            }
            BackendStreamEvent::Done => trace!("Backend round finished"),
            BackendStreamEvent::Error(message) => {
                warn!("Backend stream reported an error: {}", message);
                self.round.error = Some(message);
            }
        }
        events
    }

    /// Replay a complete backend response as one final round of deltas
    ///
    /// The output is lifted through `parse_backend_output` and fed back in
    /// stream order: reasoning, text, refusal, then tool calls.
    pub fn replay_backend_response(&mut self, backend: &BackendResponse) -> Vec<GatewayEvent> {
        let parsed = parse_backend_output(&backend.output);
        let mut deltas = Vec::with_capacity(parsed.tool_calls.len() + 3);
        if !parsed.reasoning.is_empty() {
            deltas.push(BackendStreamEvent::ReasoningDelta(parsed.reasoning));
        }
        if !parsed.text.is_empty() {
            deltas.push(BackendStreamEvent::TextDelta(parsed.text));
        }
        if !parsed.refusal.is_empty() {
            deltas.push(BackendStreamEvent::RefusalDelta(parsed.refusal));
        }
        deltas.extend(parsed.tool_calls.into_iter().enumerate().map(|(index, call)| {
            BackendStreamEvent::ToolCallDelta {
                index,
                id: Some(call.id),
                name: Some(call.name),
                arguments: call.arguments,
            }
        }));

        let mut events = Vec::new();
        for delta in deltas {
            events.extend(self.on_backend_event(delta));
        }
        if let Some(usage) = &backend.usage {
            self.round.usage = Some(usage.clone());
        }
        if backend.is_incomplete() {
            self.round.finish_reason = Some(FINISH_REASON_LENGTH.to_string());
        }
        events
    }

    /// Close every item opened this round, in output-index order
    pub fn finish_round(&mut self) -> (Vec<GatewayEvent>, RoundResult) {
        let round = std::mem::take(&mut self.round);
        let mut parsed = ParsedOutput::default();

        // (output_index, payloads, final item)
        let mut closers: Vec<(usize, Vec<EventPayload>, OutputItem)> = Vec::new();

        if let Some(reasoning) = round.reasoning {
            parsed.reasoning = reasoning.text.clone();
            let item = OutputItem::reasoning(
                reasoning.item_id.clone(),
                reasoning.text.clone(),
                STATUS_COMPLETED,
            );
            closers.push((
                reasoning.output_index,
                vec![EventPayload::ReasoningDone {
                    item_id: reasoning.item_id,
                    output_index: reasoning.output_index,
                    content_index: 0,
                    text: reasoning.text,
                }],
                item,
            ));
        }

        if let Some(msg) = round.message {
            let mut parts: Vec<(usize, OutputContent, EventPayload)> = Vec::new();
            if let Some((index, text)) = msg.text {
                parsed.text = text.clone();
                parts.push((
                    index,
                    ContentPartBuilder::new_output_text(text.clone()).build(),
                    EventPayload::OutputTextDone {
                        item_id: msg.item_id.clone(),
                        output_index: msg.output_index,
                        content_index: index,
                        text,
                        logprobs: vec![],
                    },
                ));
            }
            if let Some((index, refusal)) = msg.refusal {
                parsed.refusal = refusal.clone();
                parts.push((
                    index,
                    ContentPartBuilder::new_refusal(refusal.clone()).build(),
                    EventPayload::RefusalDone {
                        item_id: msg.item_id.clone(),
                        output_index: msg.output_index,
                        content_index: index,
                        refusal,
                    },
                ));
            }
            parts.sort_by_key(|(index, _, _)| *index);

            let mut payloads = Vec::with_capacity(parts.len() * 2);
            let mut content = Vec::with_capacity(parts.len());
            for (index, part, done) in parts {
                payloads.push(done);
                payloads.push(EventPayload::ContentPartDone {
                    item_id: msg.item_id.clone(),
                    output_index: msg.output_index,
                    content_index: index,
                    part: part.clone(),
                });
                content.push(part);
            }
            let item = OutputItemBuilder::new_message(msg.item_id)
                .status(STATUS_COMPLETED)
                .content(content)
                .build();
            closers.push((msg.output_index, payloads, item));
        }

        for (_, call) in round.tool_calls {
            let tool_call = ToolCall {
                id: call.call_id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            };
            parsed.tool_calls.push(tool_call);
            let item = OutputItem::FunctionCall {
                id: call.item_id.clone(),
                call_id: call.call_id,
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                status: STATUS_COMPLETED.to_string(),
            };
            closers.push((
                call.output_index,
                vec![EventPayload::FunctionCallArgumentsDone {
                    item_id: call.item_id,
                    output_index: call.output_index,
                    name: call.name,
                    arguments: call.arguments,
                }],
                item,
            ));
        }
        parsed.has_tool_calls = !parsed.tool_calls.is_empty();

        closers.sort_by_key(|(index, _, _)| *index);
        let mut events = Vec::new();
        for (output_index, payloads, item) in closers {
            for payload in payloads {
                events.push(self.emitter.emit(payload));
            }
            self.response.output.push(item.clone());
            events.push(self.emitter.emit(EventPayload::OutputItemDone { output_index, item }));
        }

        debug!(
            "Round closed: {} text chars, {} tool calls",
            parsed.text.len(),
            parsed.tool_calls.len()
        );
        let result = RoundResult {
            output: parsed,
            finish_reason: round.finish_reason,
            usage: round.usage,
            error: round.error,
        };
        (events, result)
    }

    /// Announce a server-side tool result as a completed output item
    pub fn tool_output(&mut self, call_id: &str, output: String) -> Vec<GatewayEvent> {
        let output_index = self.allocate_output_index();
        let item = OutputItem::function_call_output(call_id, output);
        self.response.output.push(item.clone());
        vec![
            self.emitter.emit(EventPayload::OutputItemAdded {
                output_index,
                item: item.clone(),
            }),
            self.emitter.emit(EventPayload::OutputItemDone { output_index, item }),
        ]
    }

    fn set_usage(&mut self, usage: Option<ResponseUsage>) {
        if usage.is_some() {
            self.response.usage = usage;
        }
    }

    pub fn complete(&mut self, usage: Option<ResponseUsage>) -> Vec<GatewayEvent> {
        self.set_usage(usage);
        if let Err(e) = self.response.mark_completed() {
            warn!("Ignoring completion: {}", e);
            return vec![];
        }
        let payload = EventPayload::Completed {
            response: self.snapshot(),
        };
        vec![self.emitter.emit(payload)]
    }

    pub fn incomplete(&mut self, reason: &str, usage: Option<ResponseUsage>) -> Vec<GatewayEvent> {
        self.set_usage(usage);
        if let Err(e) = self.response.mark_incomplete(reason) {
            warn!("Ignoring incomplete transition: {}", e);
            return vec![];
        }
        let payload = EventPayload::Incomplete {
            response: self.snapshot(),
        };
        vec![self.emitter.emit(payload)]
    }

    pub fn fail(&mut self, error_type: &str, code: &str, message: &str) -> Vec<GatewayEvent> {
        if let Err(e) = self.response.mark_failed(error_type, code, message) {
            warn!("Ignoring failure transition: {}", e);
            return vec![];
        }
        let payload = EventPayload::Failed {
            response: self.snapshot(),
        };
        vec![self.emitter.emit(payload)]
    }
}

/// Usage summed across rounds: latest input count, accumulated output count
pub fn accumulate_usage(total: Option<ResponseUsage>, round: Option<&BackendUsage>) -> Option<ResponseUsage> {
    match (total, round) {
        (total, None) => total,
        (None, Some(u)) => Some(build_usage(u.input_tokens, u.output_tokens)),
        (Some(t), Some(u)) => Some(build_usage(u.input_tokens, t.output_tokens + u.output_tokens)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::responses::builders::{ResponseBuilder, ResponseStatus};
    use crate::web::responses::stream_processor::UpstreamStreamProcessor;

    fn translator() -> StreamTranslator {
        StreamTranslator::new(ResponseBuilder::new("resp_gateway".to_string(), "m").build())
    }

    fn types(events: &[GatewayEvent]) -> Vec<String> {
        events.iter().map(|e| e.event_type().to_string()).collect()
    }

    #[test]
    fn test_text_stream_event_sequence() {
        let mut t = translator();
        let mut events = t.start();
        events.extend(t.on_backend_event(BackendStreamEvent::TextDelta("Hel".to_string())));
        events.extend(t.on_backend_event(BackendStreamEvent::TextDelta("lo".to_string())));
        events.extend(t.on_backend_event(BackendStreamEvent::Usage {
            prompt_tokens: 3,
            completion_tokens: 2,
        }));
        let (closing, result) = t.finish_round();
        events.extend(closing);
        events.extend(t.complete(accumulate_usage(None, result.usage.as_ref())));

        assert_eq!(
            types(&events),
            vec![
                "response.created",
                "response.in_progress",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
                "response.output_text.delta",
                "response.output_text.done",
                "response.content_part.done",
                "response.output_item.done",
                "response.completed",
            ]
        );
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.sequence_number(), i as u64);
        }
        assert_eq!(result.output.text, "Hello");
        let response = t.into_response();
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output_text(), "Hello");
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 5);
    }

    #[test]
    fn test_tool_call_items_close_in_output_order() {
        let mut t = translator();
        let mut events = Vec::new();
        for (index, id, name) in [(0, "c1", "a"), (1, "c2", "b")] {
            events.extend(t.on_backend_event(BackendStreamEvent::ToolCallDelta {
                index,
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                arguments: String::new(),
            }));
        }
        events.extend(t.on_backend_event(BackendStreamEvent::ToolCallDelta {
            index: 1,
            id: None,
            name: None,
            arguments: "{\"y\":2}".to_string(),
        }));
        events.extend(t.on_backend_event(BackendStreamEvent::ToolCallDelta {
            index: 0,
            id: None,
            name: None,
            arguments: "{\"x\":1}".to_string(),
        }));
        let (closing, result) = t.finish_round();

        assert_eq!(events.len(), 4);
        assert_eq!(
            types(&closing),
            vec![
                "response.function_call_arguments.done",
                "response.output_item.done",
                "response.function_call_arguments.done",
                "response.output_item.done",
            ]
        );
        let indices: Vec<usize> = closing
            .iter()
            .filter_map(|e| match e.payload() {
                Some(EventPayload::OutputItemDone { output_index, .. }) => Some(*output_index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(result.output.has_tool_calls);
        assert_eq!(result.output.tool_calls[0].arguments, "{\"x\":1}");
        assert_eq!(result.output.tool_calls[1].name, "b");
    }

    #[test]
    fn test_output_indices_continue_across_rounds() {
        let mut t = translator();
        t.on_backend_event(BackendStreamEvent::ToolCallDelta {
            index: 0,
            id: Some("c1".to_string()),
            name: Some("file_search".to_string()),
            arguments: "{}".to_string(),
        });
        t.finish_round();
        let output_events = t.tool_output("c1", "result".to_string());
        assert!(matches!(
            output_events[0].payload(),
            Some(EventPayload::OutputItemAdded { output_index: 1, .. })
        ));

        t.begin_round();
        let events = t.on_backend_event(BackendStreamEvent::TextDelta("done".to_string()));
        assert!(matches!(
            events[0].payload(),
            Some(EventPayload::OutputItemAdded { output_index: 2, .. })
        ));
        t.finish_round();
        assert_eq!(t.into_response().output.len(), 3);
    }

    #[test]
    fn test_passthrough_frames_get_gateway_id() {
        let mut t = translator();
        let events = t.on_backend_event(BackendStreamEvent::Passthrough {
            event_type: "response.custom".to_string(),
            data: r#"{"response_id":"resp_backend","sequence_number":42}"#.to_string(),
        });
        let data: serde_json::Value = serde_json::from_str(&events[0].data().unwrap()).unwrap();
        assert_eq!(data["response_id"], "resp_gateway");
        assert_eq!(data["sequence_number"], 0);
    }

    #[test]
    fn test_reasoning_and_refusal_parts() {
        let mut t = translator();
        t.on_backend_event(BackendStreamEvent::ReasoningDelta("hmm".to_string()));
        t.on_backend_event(BackendStreamEvent::RefusalDelta("no".to_string()));
        let (closing, result) = t.finish_round();

        assert_eq!(result.output.reasoning, "hmm");
        assert_eq!(result.output.refusal, "no");
        assert_eq!(
            types(&closing),
            vec![
                "response.reasoning.done",
                "response.output_item.done",
                "response.refusal.done",
                "response.content_part.done",
                "response.output_item.done",
            ]
        );
    }

    #[test]
    fn test_terminal_event_is_emitted_once() {
        let mut t = translator();
        assert_eq!(t.fail(ERROR_TYPE_API, ERROR_CODE_BACKEND, "boom").len(), 1);
        assert!(t.complete(None).is_empty());
        assert_eq!(t.into_response().status, ResponseStatus::Failed);
    }

    #[test]
    fn test_replay_of_buffered_chat_stream() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\n\n",
            "data: [DONE]\n\n"
        );
        let mut processor = UpstreamStreamProcessor::new();
        let mut t = translator();
        for event in processor.process_chunk(body.as_bytes()).unwrap() {
            t.on_backend_event(event);
        }
        let (_, result) = t.finish_round();
        assert!(result.hit_length_limit());
    }

    #[test]
    fn test_replay_of_complete_backend_response() {
        let backend: BackendResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "status": "completed",
            "output": [
                {"type": "reasoning", "content": [{"type": "reasoning_text", "text": "think"}]},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Calling "},
                    {"type": "output_text", "text": "now"}
                ]},
                {"type": "function_call", "call_id": "c1", "name": "f", "arguments": "{}"},
                {"type": "function_call", "call_id": "c2", "name": "g", "arguments": "{\"a\":1}"}
            ]
        }))
        .unwrap();
        let expected = parse_backend_output(&backend.output);

        let mut t = translator();
        t.replay_backend_response(&backend);
        let (_, result) = t.finish_round();
        assert_eq!(result.output, expected);
        assert_eq!(result.output.text, "Calling now");
        assert_eq!(result.output.tool_calls[1].id, "c2");
        assert!(!result.hit_length_limit());
        assert_eq!(t.into_response().output.len(), 4);
    }

    #[test]
    fn test_accumulate_usage() {
        let first = accumulate_usage(
            None,
            Some(&BackendUsage {
                input_tokens: 10,
                output_tokens: 4,
                total_tokens: 14,
            }),
        );
        let second = accumulate_usage(
            first,
            Some(&BackendUsage {
                input_tokens: 20,
                output_tokens: 6,
                total_tokens: 26,
            }),
        )
        .unwrap();
        assert_eq!(second.input_tokens, 20);
        assert_eq!(second.output_tokens, 10);
        assert_eq!(second.total_tokens, 30);
    }
}
