//! Upstream stream processor for SSE responses from the chat completion API

use serde_json::Value;
use tracing::{debug, trace};

use super::constants::SSE_BUFFER_CAPACITY;

/// One typed increment decoded from the backend stream
#[derive(Debug, Clone, PartialEq)]
pub enum BackendStreamEvent {
    TextDelta(String),
    RefusalDelta(String),
    ReasoningDelta(String),
    /// Fragment of a tool call; the first fragment for an index carries id and name
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Usage {
        prompt_tokens: i64,
        completion_tokens: i64,
    },
    Finished {
        finish_reason: String,
    },
    /// A Responses-native frame forwarded opaquely
    Passthrough {
        event_type: String,
        data: String,
    },
    Done,
    Error(String),
}

/// Decodes a chat-completions SSE byte stream into typed events
///
/// Bytes may arrive split anywhere, including inside a multi-byte
/// character; frames are only decoded once their blank-line terminator has
/// been seen.
pub struct UpstreamStreamProcessor {
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    done: bool,
}

impl Default for UpstreamStreamProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamStreamProcessor {
    pub fn new() -> Self {
        Self {
            buffer: String::with_capacity(SSE_BUFFER_CAPACITY),
            pending: Vec::new(),
            done: false,
        }
    }

    /// Process a chunk of bytes from the upstream stream
    pub fn process_chunk(&mut self, bytes: &[u8]) -> Result<Vec<BackendStreamEvent>, ProcessorError> {
        self.pending.extend_from_slice(bytes);
        self.decode_pending();
        // Normalize CRLF framing so frame splitting only looks for "\n\n"
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(frame) = self.extract_sse_frame() {
            self.handle_sse_frame(&frame, &mut events)?;
        }
        Ok(events)
    }

    /// Flush whatever is left once the upstream body ends
    ///
    /// A stream that ends without `[DONE]` still terminates with `Done`.
    pub fn finish(&mut self) -> Result<Vec<BackendStreamEvent>, ProcessorError> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = std::mem::take(&mut self.buffer);
        if !rest.trim().is_empty() {
            self.handle_sse_frame(rest.trim(), &mut events)?;
        }
        if !self.done {
            self.done = true;
            events.push(BackendStreamEvent::Done);
        }
        Ok(events)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Move decodable bytes from `pending` into the text buffer
    ///
    /// An incomplete sequence at the end stays pending for the next chunk;
    /// invalid sequences become U+FFFD.
    fn decode_pending(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(prefix) = std::str::from_utf8(&self.pending[..valid]) {
                        self.buffer.push_str(prefix);
                    }
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Extract a complete SSE frame from the buffer
    fn extract_sse_frame(&mut self) -> Option<String> {
        loop {
            let pos = self.buffer.find("\n\n")?;
            let frame = self.buffer[..pos].to_string();
            self.buffer = self.buffer[pos + 2..].to_string();

            // Skip empty frames
            if !frame.trim().is_empty() {
                return Some(frame);
            }
        }
    }

    /// Handle a single SSE frame
    fn handle_sse_frame(
        &mut self,
        frame: &str,
        events: &mut Vec<BackendStreamEvent>,
    ) -> Result<(), ProcessorError> {
        if self.done {
            return Ok(());
        }

        let mut event_type = None;
        let mut data_lines = Vec::new();
        for line in frame.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                event_type = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.strip_prefix(' ').unwrap_or(value));
            }
        }
        // Comments and keep-alives carry no data
        if data_lines.is_empty() {
            return Ok(());
        }
        let data = data_lines.join("\n");
        let data = data.trim();

        // Handle [DONE] signal
        if data == "[DONE]" {
            trace!("Upstream processor: received [DONE]");
            self.done = true;
            events.push(BackendStreamEvent::Done);
            return Ok(());
        }

        if let Some(event_type) = event_type {
            trace!("Upstream processor: passthrough frame {}", event_type);
            events.push(BackendStreamEvent::Passthrough {
                event_type,
                data: data.to_string(),
            });
            return Ok(());
        }

        // Parse JSON data
        let json_data: Value =
            serde_json::from_str(data).map_err(|e| ProcessorError::JsonParse(e.to_string()))?;

        if let Some(error) = json_data.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            events.push(BackendStreamEvent::Error(message));
            return Ok(());
        }

        let choice = &json_data["choices"][0];
        let delta = &choice["delta"];

        if let Some(reasoning) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
            events.push(BackendStreamEvent::ReasoningDelta(reasoning.to_string()));
        }

        // Extract content delta
        if let Some(content) = delta["content"].as_str().filter(|s| !s.is_empty()) {
            trace!("Upstream processor: found content delta: {}", content);
            events.push(BackendStreamEvent::TextDelta(content.to_string()));
        }

        if let Some(refusal) = delta["refusal"].as_str().filter(|s| !s.is_empty()) {
            events.push(BackendStreamEvent::RefusalDelta(refusal.to_string()));
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for (position, call) in tool_calls.iter().enumerate() {
                let index = call["index"].as_u64().map_or(position, |i| i as usize);
                events.push(BackendStreamEvent::ToolCallDelta {
                    index,
                    id: call["id"].as_str().map(str::to_string),
                    name: call["function"]["name"].as_str().map(str::to_string),
                    arguments: call["function"]["arguments"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }

        // Extract usage
        if let Some(usage) = json_data.get("usage").filter(|u| !u.is_null()) {
            let prompt_tokens = usage["prompt_tokens"].as_i64().unwrap_or(0);
            let completion_tokens = usage["completion_tokens"].as_i64().unwrap_or(0);

            debug!(
                "Upstream processor: found usage - prompt_tokens={}, completion_tokens={}",
                prompt_tokens, completion_tokens
            );
            events.push(BackendStreamEvent::Usage {
                prompt_tokens,
                completion_tokens,
            });
        }

        // Extract finish reason
        if let Some(finish_reason) = choice["finish_reason"].as_str() {
            trace!("Upstream processor: found finish_reason: {}", finish_reason);
            events.push(BackendStreamEvent::Finished {
                finish_reason: finish_reason.to_string(),
            });
        }

        Ok(())
    }
}

/// Errors that can occur during stream processing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessorError {
    #[error("JSON parse error: {0}")]
    JsonParse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_across_chunks() {
        let mut processor = UpstreamStreamProcessor::new();
        let first = processor
            .process_chunk(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel")
            .unwrap();
        assert!(first.is_empty());

        let second = processor
            .process_chunk(b"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n")
            .unwrap();
        assert_eq!(
            second,
            vec![
                BackendStreamEvent::TextDelta("Hello".to_string()),
                BackendStreamEvent::TextDelta("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_tool_call_fragments_usage_and_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"city\\\":1}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":3}}\n\n",
            "data: [DONE]\n\n"
        );
        let mut processor = UpstreamStreamProcessor::new();
        let events = processor.process_chunk(body.as_bytes()).unwrap();

        assert_eq!(
            events[0],
            BackendStreamEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".to_string()),
                name: Some("get_weather".to_string()),
                arguments: String::new(),
            }
        );
        assert!(matches!(
            &events[1],
            BackendStreamEvent::ToolCallDelta { id: None, arguments, .. } if arguments == "{\"city\":1}"
        ));
        assert!(matches!(&events[2], BackendStreamEvent::Finished { finish_reason } if finish_reason == "tool_calls"));
        assert_eq!(
            events[3],
            BackendStreamEvent::Usage {
                prompt_tokens: 7,
                completion_tokens: 3
            }
        );
        assert_eq!(events[4], BackendStreamEvent::Done);
        assert!(processor.is_done());
        assert!(processor.finish().unwrap().is_empty());
    }

    #[test]
    fn test_named_event_frames_pass_through() {
        let mut processor = UpstreamStreamProcessor::new();
        let events = processor
            .process_chunk(b"event: response.created\ndata: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_backend\"}}\n\n")
            .unwrap();
        assert!(matches!(
            &events[0],
            BackendStreamEvent::Passthrough { event_type, data }
                if event_type == "response.created" && data.contains("resp_backend")
        ));
    }

    #[test]
    fn test_finish_without_done_marker() {
        let mut processor = UpstreamStreamProcessor::new();
        processor.process_chunk(b": keep-alive\n\n").unwrap();
        let events = processor
            .process_chunk(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}")
            .unwrap();
        assert!(events.is_empty());

        let events = processor.finish().unwrap();
        assert_eq!(
            events,
            vec![
                BackendStreamEvent::TextDelta("tail".to_string()),
                BackendStreamEvent::Done
            ]
        );
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut processor = UpstreamStreamProcessor::new();
        let result = processor.process_chunk(b"data: {not json}\n\n");
        assert!(matches!(result, Err(ProcessorError::JsonParse(_))));
    }

    #[test]
    fn test_error_payload() {
        let mut processor = UpstreamStreamProcessor::new();
        let events = processor
            .process_chunk(b"data: {\"error\":{\"message\":\"overloaded\"}}\n\n")
            .unwrap();
        assert_eq!(events, vec![BackendStreamEvent::Error("overloaded".to_string())]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let frame = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}\n\n".as_bytes();
        // Cut between the two bytes of 'é'
        let cut = frame.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut processor = UpstreamStreamProcessor::new();
        assert!(processor.process_chunk(&frame[..cut]).unwrap().is_empty());
        let events = processor.process_chunk(&frame[cut..]).unwrap();
        assert_eq!(events, vec![BackendStreamEvent::TextDelta("héllo".to_string())]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut processor = UpstreamStreamProcessor::new();
        let mut chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"a".to_vec();
        chunk.push(0xFF);
        chunk.extend_from_slice(b"b\"}}]}\n\n");
        let events = processor.process_chunk(&chunk).unwrap();
        assert_eq!(events, vec![BackendStreamEvent::TextDelta("a\u{FFFD}b".to_string())]);
    }
}
