use std::collections::HashMap;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::relay::claude::response::estimate_tokens_from_chars;
use crate::relay::claude::types::{ClaudeContentBlock, ClaudeContentDelta, ClaudeStreamEvent};
use crate::relay::dto::RelayUsage;
use crate::relay::info::RelayInfo;
use crate::relay::streaming::{ResponseStream, SseEvent, SseParser, StreamError, StreamResult};

/// Per-stream translation state: accumulates usage across frames and remaps
/// content-block indices onto OpenAI tool-call indices.
struct StreamState {
    id: String,
    model: String,
    created: i64,
    usage: RelayUsage,
    stop_reason: Option<String>,
    tool_indices: HashMap<usize, u32>,
    finished: bool,
    completion_chars: usize,
}

impl StreamState {
    fn new(info: &RelayInfo) -> Self {
        Self {
            id: format!("chatcmpl-{}", info.request_id),
            model: info.origin_model_name.clone(),
            created: chrono::Utc::now().timestamp(),
            usage: RelayUsage::default(),
            stop_reason: None,
            tool_indices: HashMap::new(),
            finished: false,
            completion_chars: 0,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> SseEvent {
        SseEvent::new(
            json!({
                "id": self.id,
                "object": "chat.completion.chunk",
                "created": self.created,
                "model": self.model,
                "choices": [{
                    "index": 0,
                    "delta": delta,
                    "finish_reason": finish_reason,
                }]
            })
            .to_string(),
        )
    }

    /// Terminal pair: finish chunk carrying the accumulated usage, then the
    /// `[DONE]` marker.
    fn finish(&mut self) -> Vec<SseEvent> {
        self.finished = true;
        let finish_reason = match self.stop_reason.as_deref() {
            Some("max_tokens") => "length",
            Some("tool_use") => "tool_calls",
            Some("refusal") => "content_filter",
            _ => "stop",
        };

        let mut chunk = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": finish_reason,
            }]
        });
        chunk["usage"] = json!({
            "prompt_tokens": self.usage.prompt_tokens,
            "completion_tokens": self.usage.completion_tokens,
            "total_tokens": self.usage.total_tokens(),
            "prompt_tokens_details": {
                "cached_tokens": self.usage.cache_read_tokens,
            },
        });

        vec![SseEvent::new(chunk.to_string()), SseEvent::done()]
    }

    fn handle_event(&mut self, event: ClaudeStreamEvent) -> Vec<SseEvent> {
        match event {
            ClaudeStreamEvent::MessageStart { message } => {
                if !message.id.is_empty() {
                    self.id = message.id;
                }
                self.usage = RelayUsage::from(message.usage);
                vec![self.chunk(json!({"role": "assistant", "content": ""}), None)]
            }
            ClaudeStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ClaudeContentBlock::ToolUse { id, name, .. } => {
                    let next = self.tool_indices.len() as u32;
                    let tool_index = *self.tool_indices.entry(index).or_insert(next);
                    vec![self.chunk(
                        json!({"tool_calls": [{
                            "index": tool_index,
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": ""},
                        }]}),
                        None,
                    )]
                }
                ClaudeContentBlock::Text { text } if !text.is_empty() => {
                    vec![self.chunk(json!({"content": text}), None)]
                }
                _ => Vec::new(),
            },
            ClaudeStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ClaudeContentDelta::TextDelta { text } => {
                    vec![self.chunk(json!({"content": text}), None)]
                }
                ClaudeContentDelta::ThinkingDelta { thinking } => {
                    vec![self.chunk(json!({"reasoning_content": thinking}), None)]
                }
                ClaudeContentDelta::InputJsonDelta { partial_json } => {
                    let tool_index = self.tool_indices.get(&index).copied().unwrap_or(0);
                    vec![self.chunk(
                        json!({"tool_calls": [{
                            "index": tool_index,
                            "function": {"arguments": partial_json},
                        }]}),
                        None,
                    )]
                }
                ClaudeContentDelta::SignatureDelta { .. } | ClaudeContentDelta::Unknown => {
                    Vec::new()
                }
            },
            ClaudeStreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(u) = usage {
                    if u.output_tokens > 0 {
                        self.usage.completion_tokens = u.output_tokens;
                    }
                    if u.input_tokens > 0 {
                        self.usage.prompt_tokens = u.input_tokens;
                    }
                }
                Vec::new()
            }
            ClaudeStreamEvent::MessageStop => self.finish(),
            // 旧版补全协议的增量帧
            ClaudeStreamEvent::Completion {
                completion,
                stop_reason,
            } => {
                self.completion_chars += completion.chars().count();
                self.usage.completion_tokens = estimate_tokens_from_chars(self.completion_chars);
                let mut out = Vec::new();
                if !completion.is_empty() {
                    out.push(self.chunk(json!({"content": completion}), None));
                }
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                    out.extend(self.finish());
                }
                out
            }
            ClaudeStreamEvent::Error { error } => {
                self.finished = true;
                vec![
                    SseEvent::new(
                        json!({"error": {
                            "type": error.error_type,
                            "message": error.message,
                        }})
                        .to_string(),
                    ),
                    SseEvent::done(),
                ]
            }
            ClaudeStreamEvent::ContentBlockStop { .. }
            | ClaudeStreamEvent::Ping
            | ClaudeStreamEvent::Unknown => Vec::new(),
        }
    }
}

/// Pump the upstream byte stream through the SSE parser and the frame
/// translator. Returns immediately; the usage receiver resolves once the
/// terminal frame (or stream end) is observed.
pub(super) fn spawn_stream_pump(
    info: &RelayInfo,
    resp: reqwest::Response,
) -> (ResponseStream, oneshot::Receiver<RelayUsage>) {
    let (tx, rx) = mpsc::unbounded_channel::<StreamResult<SseEvent>>();
    let (usage_tx, usage_rx) = oneshot::channel();
    let mut state = StreamState::new(info);
    let request_id = info.request_id.clone();

    tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut body = resp.bytes_stream();

        'read: while let Some(next) = body.next().await {
            match next {
                Ok(bytes) => {
                    for frame in parser.push(&bytes) {
                        if frame.data.is_empty() || frame.is_done() {
                            continue;
                        }
                        match serde_json::from_str::<ClaudeStreamEvent>(&frame.data) {
                            Ok(event) => {
                                for out in state.handle_event(event) {
                                    let _ = tx.send(Ok(out));
                                }
                                if state.finished {
                                    break 'read;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    request_id = %request_id,
                                    "skipping unparsable stream frame: {}",
                                    e
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(request_id = %request_id, "Stream error: {}", e);
                    let _ = tx.send(Err(StreamError::Http(e)));
                    break;
                }
            }
        }

        // Safety net: upstream closed without a terminal frame.
        if !state.finished {
            for out in state.finish() {
                let _ = tx.send(Ok(out));
            }
        }
        let _ = usage_tx.send(state.usage);
    });

    (Box::pin(UnboundedReceiverStream::new(rx)), usage_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn state() -> StreamState {
        let info = RelayInfo::new(
            "claude-sonnet-4",
            "claude-sonnet-4-20250514",
            "https://api.anthropic.com",
            "sk-test",
        );
        StreamState::new(&info)
    }

    fn event(raw: &str) -> ClaudeStreamEvent {
        serde_json::from_str(raw).unwrap()
    }

    fn data(ev: &SseEvent) -> Value {
        serde_json::from_str(&ev.data).unwrap()
    }

    #[test]
    fn message_flow_accumulates_usage_and_terminates() {
        let mut st = state();

        let out = st.handle_event(event(
            r#"{"type":"message_start","message":{"id":"msg_9","type":"message","role":"assistant","model":"claude-sonnet-4-20250514","content":[],"usage":{"input_tokens":11,"cache_read_input_tokens":3}}}"#,
        ));
        assert_eq!(out.len(), 1);
        assert_eq!(data(&out[0])["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(st.usage.prompt_tokens, 11);
        assert_eq!(st.usage.cache_read_tokens, 3);

        let out = st.handle_event(event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        ));
        assert_eq!(data(&out[0])["choices"][0]["delta"]["content"], "Hello");

        let out = st.handle_event(event(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":7}}"#,
        ));
        assert!(out.is_empty());
        assert_eq!(st.usage.completion_tokens, 7);

        let out = st.handle_event(event(r#"{"type":"message_stop"}"#));
        assert_eq!(out.len(), 2);
        let finish = data(&out[0]);
        assert_eq!(finish["choices"][0]["finish_reason"], "stop");
        assert_eq!(finish["usage"]["prompt_tokens"], 11);
        assert_eq!(finish["usage"]["completion_tokens"], 7);
        assert_eq!(finish["usage"]["total_tokens"], 18);
        assert!(out[1].is_done());
        assert!(st.finished);
    }

    #[test]
    fn tool_use_frames_map_to_tool_call_deltas() {
        let mut st = state();
        let out = st.handle_event(event(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_weather","input":{}}}"#,
        ));
        let call = &data(&out[0])["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["id"], "toolu_1");
        assert_eq!(call["function"]["name"], "get_weather");

        let out = st.handle_event(event(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"city\""}}"#,
        ));
        let call = &data(&out[0])["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["function"]["arguments"], "{\"city\"");
    }

    #[test]
    fn tool_use_stop_reason_maps_to_tool_calls_finish() {
        let mut st = state();
        st.handle_event(event(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":2}}"#,
        ));
        let out = st.handle_event(event(r#"{"type":"message_stop"}"#));
        assert_eq!(data(&out[0])["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn legacy_completion_frames_estimate_usage() {
        let mut st = state();
        let out = st.handle_event(event(
            r#"{"type":"completion","completion":"Hello wor","stop_reason":null}"#,
        ));
        assert_eq!(data(&out[0])["choices"][0]["delta"]["content"], "Hello wor");

        let out = st.handle_event(event(
            r#"{"type":"completion","completion":"ld","stop_reason":"stop_sequence"}"#,
        ));
        // content chunk + finish chunk + [DONE]
        assert_eq!(out.len(), 3);
        assert!(out[2].is_done());
        assert!(st.usage.completion_tokens > 0);
    }

    #[test]
    fn upstream_error_frame_ends_the_stream() {
        let mut st = state();
        let out = st.handle_event(event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#,
        ));
        assert_eq!(out.len(), 2);
        assert_eq!(data(&out[0])["error"]["type"], "overloaded_error");
        assert!(st.finished);
    }

    #[test]
    fn thinking_deltas_become_reasoning_content() {
        let mut st = state();
        let out = st.handle_event(event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"mull"}}"#,
        ));
        assert_eq!(
            data(&out[0])["choices"][0]["delta"]["reasoning_content"],
            "mull"
        );
    }
}
