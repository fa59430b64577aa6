//! SSE event model and wire encoding

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, trace};

use super::builders::{OutputContent, OutputItem, Response};
use super::constants::*;

/// Payload of one gateway stream event, tagged by its event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "response.created")]
    Created { response: Box<Response> },
    #[serde(rename = "response.in_progress")]
    InProgress { response: Box<Response> },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        output_index: usize,
        item: OutputItem,
    },
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: OutputContent,
    },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
        #[serde(default)]
        logprobs: Vec<Value>,
    },
    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        text: String,
        #[serde(default)]
        logprobs: Vec<Value>,
    },
    #[serde(rename = "response.refusal.delta")]
    RefusalDelta {
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
    },
    #[serde(rename = "response.refusal.done")]
    RefusalDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        refusal: String,
    },
    #[serde(rename = "response.reasoning.delta")]
    ReasoningDelta {
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
    },
    #[serde(rename = "response.reasoning.done")]
    ReasoningDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        text: String,
    },
    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: OutputContent,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        item_id: String,
        output_index: usize,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        item_id: String,
        output_index: usize,
        name: String,
        arguments: String,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        output_index: usize,
        item: OutputItem,
    },
    #[serde(rename = "response.completed")]
    Completed { response: Box<Response> },
    #[serde(rename = "response.failed")]
    Failed { response: Box<Response> },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: Box<Response> },
    #[serde(rename = "error")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        param: Option<String>,
    },
}

impl EventPayload {
    /// Get the event type string for SSE
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::Created { .. } => EVENT_RESPONSE_CREATED,
            EventPayload::InProgress { .. } => EVENT_RESPONSE_IN_PROGRESS,
            EventPayload::OutputItemAdded { .. } => EVENT_RESPONSE_OUTPUT_ITEM_ADDED,
            EventPayload::ContentPartAdded { .. } => EVENT_RESPONSE_CONTENT_PART_ADDED,
            EventPayload::OutputTextDelta { .. } => EVENT_RESPONSE_OUTPUT_TEXT_DELTA,
            EventPayload::OutputTextDone { .. } => EVENT_RESPONSE_OUTPUT_TEXT_DONE,
            EventPayload::RefusalDelta { .. } => EVENT_RESPONSE_REFUSAL_DELTA,
            EventPayload::RefusalDone { .. } => EVENT_RESPONSE_REFUSAL_DONE,
            EventPayload::ReasoningDelta { .. } => EVENT_RESPONSE_REASONING_DELTA,
            EventPayload::ReasoningDone { .. } => EVENT_RESPONSE_REASONING_DONE,
            EventPayload::ContentPartDone { .. } => EVENT_RESPONSE_CONTENT_PART_DONE,
            EventPayload::FunctionCallArgumentsDelta { .. } => {
                EVENT_RESPONSE_FUNCTION_CALL_ARGUMENTS_DELTA
            }
            EventPayload::FunctionCallArgumentsDone { .. } => {
                EVENT_RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE
            }
            EventPayload::OutputItemDone { .. } => EVENT_RESPONSE_OUTPUT_ITEM_DONE,
            EventPayload::Completed { .. } => EVENT_RESPONSE_COMPLETED,
            EventPayload::Failed { .. } => EVENT_RESPONSE_FAILED,
            EventPayload::Incomplete { .. } => EVENT_RESPONSE_INCOMPLETE,
            EventPayload::Error { .. } => EVENT_ERROR,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::Completed { .. }
                | EventPayload::Failed { .. }
                | EventPayload::Incomplete { .. }
                | EventPayload::Error { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub sequence_number: u64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// An event ready for the wire
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Typed(StreamEvent),
    /// A backend frame forwarded opaquely, already carrying the gateway id
    Raw {
        event_type: String,
        data: String,
        sequence_number: u64,
    },
}

impl GatewayEvent {
    pub fn event_type(&self) -> &str {
        match self {
            GatewayEvent::Typed(e) => e.payload.event_type(),
            GatewayEvent::Raw { event_type, .. } if !event_type.is_empty() => event_type,
            GatewayEvent::Raw { .. } => EVENT_FALLBACK,
        }
    }

    pub fn sequence_number(&self) -> u64 {
        match self {
            GatewayEvent::Typed(e) => e.sequence_number,
            GatewayEvent::Raw {
                sequence_number, ..
            } => *sequence_number,
        }
    }

    pub fn payload(&self) -> Option<&EventPayload> {
        match self {
            GatewayEvent::Typed(e) => Some(&e.payload),
            GatewayEvent::Raw { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.payload().map_or(false, EventPayload::is_terminal)
    }

    /// JSON body of the `data:` line
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            GatewayEvent::Typed(e) => serde_json::to_string(e),
            GatewayEvent::Raw { data, .. } => Ok(data.clone()),
        }
    }

    /// Convert to an axum SSE event
    pub fn to_sse_event(&self) -> Event {
        match self.data() {
            Ok(data) => Event::default().event(self.event_type()).data(data),
            Err(e) => {
                error!("Failed to serialize {}: {:?}", self.event_type(), e);
                Event::default()
                    .event(EVENT_ERROR)
                    .data(r#"{"type":"error","message":"event serialization failed"}"#)
            }
        }
    }
}

/// Render a batch as `event: <type>\ndata: <json>\n\n` frames
///
/// Events that fail to serialize are skipped.
pub fn format_sse_events(events: &[GatewayEvent]) -> String {
    let mut out = String::new();
    for event in events {
        match event.data() {
            Ok(data) => {
                out.push_str("event: ");
                out.push_str(event.event_type());
                out.push_str("\ndata: ");
                out.push_str(&data);
                out.push_str("\n\n");
            }
            Err(e) => error!("Skipping unserializable {} event: {:?}", event.event_type(), e),
        }
    }
    out
}

/// Substitute the gateway id into an opaque backend payload
///
/// Patches a top-level `response_id` and a nested `response.id`. Input
/// without either field, or that is not a JSON object, is returned
/// byte-for-byte.
pub fn patch_response_id(raw: &str, response_id: &str) -> String {
    let Ok(Value::Object(mut obj)) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };

    let mut changed = false;
    if let Some(existing) = obj.get_mut("response_id") {
        *existing = Value::String(response_id.to_string());
        changed = true;
    }
    if let Some(Value::Object(response)) = obj.get_mut("response") {
        if let Some(existing) = response.get_mut("id") {
            *existing = Value::String(response_id.to_string());
            changed = true;
        }
    }

    if !changed {
        return raw.to_string();
    }
    serde_json::to_string(&obj).unwrap_or_else(|_| raw.to_string())
}

/// Overwrite a `sequence_number` field if the payload carries one
fn patch_sequence_number(raw: String, sequence_number: u64) -> String {
    let Ok(Value::Object(mut obj)) = serde_json::from_str::<Value>(&raw) else {
        return raw;
    };
    match obj.get_mut("sequence_number") {
        Some(existing) => {
            *existing = Value::from(sequence_number);
            serde_json::to_string(&obj).unwrap_or(raw)
        }
        None => raw,
    }
}

/// Assigns strictly increasing sequence numbers to outgoing events
///
/// One emitter exists per response; every event of that response, across
/// all tool-call rounds, goes through it.
#[derive(Debug, Default)]
pub struct SseEventEmitter {
    sequence_number: u64,
}

impl SseEventEmitter {
    pub fn new() -> Self {
        Self { sequence_number: 0 }
    }

    fn next_sequence(&mut self) -> u64 {
        let current = self.sequence_number;
        self.sequence_number += 1;
        current
    }

    pub fn emit(&mut self, payload: EventPayload) -> GatewayEvent {
        let sequence_number = self.next_sequence();
        trace!("Emitted {} event (seq: {})", payload.event_type(), sequence_number);
        GatewayEvent::Typed(StreamEvent {
            sequence_number,
            payload,
        })
    }

    /// Forward a backend frame with the gateway id and sequence patched in
    pub fn emit_raw(&mut self, event_type: &str, data: &str, response_id: &str) -> GatewayEvent {
        let sequence_number = self.next_sequence();
        let data = patch_sequence_number(patch_response_id(data, response_id), sequence_number);
        GatewayEvent::Raw {
            event_type: event_type.to_string(),
            data,
            sequence_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::responses::builders::ResponseBuilder;
    use serde_json::json;

    #[test]
    fn test_patch_response_id_replaces_existing() {
        let patched = patch_response_id(r#"{"response_id":"old-id","text":"hello"}"#, "new-id");
        let value: Value = serde_json::from_str(&patched).unwrap();
        assert_eq!(value["response_id"], "new-id");
        assert_eq!(value["text"], "hello");
    }

    #[test]
    fn test_patch_response_id_nested_response() {
        let patched = patch_response_id(
            r#"{"type":"response.created","response":{"id":"resp_backend","status":"in_progress"}}"#,
            "resp_gateway",
        );
        let value: Value = serde_json::from_str(&patched).unwrap();
        assert_eq!(value["response"]["id"], "resp_gateway");
    }

    #[test]
    fn test_patch_response_id_is_byte_identical_without_id() {
        for raw in [
            r#"{"text":  "hello" }"#,
            "not json",
            "[1,2,3]",
            r#"{"response":"plain"}"#,
        ] {
            assert_eq!(patch_response_id(raw, "new-id"), raw);
        }
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let mut emitter = SseEventEmitter::new();
        let a = emitter.emit(EventPayload::Error {
            code: None,
            message: "x".to_string(),
            param: None,
        });
        let b = emitter.emit_raw("response.custom", r#"{"sequence_number":99}"#, "resp_1");
        let c = emitter.emit(EventPayload::FunctionCallArgumentsDelta {
            item_id: "fc_1".to_string(),
            output_index: 0,
            delta: "{".to_string(),
        });
        assert_eq!(
            [a.sequence_number(), b.sequence_number(), c.sequence_number()],
            [0, 1, 2]
        );
        let raw: Value = serde_json::from_str(&b.data().unwrap()).unwrap();
        assert_eq!(raw["sequence_number"], 1);
    }

    #[test]
    fn test_typed_event_serialization_matches_event_type() {
        let response = ResponseBuilder::new("resp_1".to_string(), "m").build();
        let mut emitter = SseEventEmitter::new();
        let event = emitter.emit(EventPayload::Created {
            response: Box::new(response),
        });

        let data: Value = serde_json::from_str(&event.data().unwrap()).unwrap();
        assert_eq!(data["type"], event.event_type());
        assert_eq!(data["sequence_number"], 0);
        assert_eq!(data["response"]["id"], "resp_1");
    }

    #[test]
    fn test_format_sse_events() {
        let mut emitter = SseEventEmitter::new();
        let events = vec![
            emitter.emit(EventPayload::OutputTextDelta {
                item_id: "msg_1".to_string(),
                output_index: 0,
                content_index: 0,
                delta: "Hi".to_string(),
                logprobs: vec![],
            }),
            emitter.emit_raw("", "{}", "resp_1"),
        ];
        let body = format_sse_events(&events);
        let frames: Vec<&str> = body.split("\n\n").filter(|f| !f.is_empty()).collect();

        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("event: response.output_text.delta\ndata: {"));
        assert_eq!(frames[1], "event: message\ndata: {}");
    }

    #[test]
    fn test_event_roundtrips_through_json() {
        let event = StreamEvent {
            sequence_number: 4,
            payload: EventPayload::OutputItemDone {
                output_index: 1,
                item: OutputItem::FunctionCall {
                    id: "fc_1".to_string(),
                    call_id: "call_1".to_string(),
                    name: "f".to_string(),
                    arguments: "{}".to_string(),
                    status: "completed".to_string(),
                },
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "response.output_item.done");
        assert_eq!(value["item"]["type"], "function_call");
        let back: StreamEvent = serde_json::from_value(json!(value)).unwrap();
        assert_eq!(back, event);
    }
}
