use std::pin::Pin;
use tokio_stream::Stream;

/// Server-Sent Event 数据结构（下行给客户端，也用于上游帧解析结果）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn new(data: String) -> Self {
        Self {
            id: None,
            event: None,
            data,
        }
    }

    pub fn with_event(mut self, event: String) -> Self {
        self.event = Some(event);
        self
    }

    pub fn done() -> Self {
        Self {
            id: None,
            event: None,
            data: "[DONE]".to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }

    /// 格式化为 Server-Sent Event 格式
    pub fn format_sse(&self) -> String {
        let mut sse_data = String::new();

        if let Some(id) = &self.id {
            sse_data.push_str(&format!("id: {}\n", id));
        }

        if let Some(event) = &self.event {
            sse_data.push_str(&format!("event: {}\n", event));
        }

        // 处理多行数据
        for line in self.data.lines() {
            sse_data.push_str(&format!("data: {}\n", line));
        }

        sse_data.push('\n');
        sse_data
    }
}

/// 流式传输错误类型
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Stream processing error: {0}")]
    Stream(String),
}

/// 流式传输的结果类型
pub type StreamResult<T> = Result<T, StreamError>;

/// 流式传输的响应流类型
pub type ResponseStream = Pin<Box<dyn Stream<Item = StreamResult<SseEvent>> + Send>>;

/// Incremental SSE frame parser over raw response bytes.
///
/// Frames may arrive split at arbitrary byte boundaries; bytes are buffered
/// until a blank-line frame terminator is seen. Comment lines and empty
/// keep-alive frames are dropped.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every complete event it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((frame_end, delim_len)) = find_frame_end(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..frame_end + delim_len).collect();
            let text = String::from_utf8_lossy(&frame[..frame_end]);
            if let Some(ev) = parse_frame(&text) {
                events.push(ev);
            }
        }
        events
    }
}

/// Locate `\n` followed by an optional `\r` and a second `\n`; returns the
/// index of the first newline and the delimiter length.
fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' {
            if buf[i + 1] == b'\n' {
                return Some((i, 2));
            }
            if buf[i + 1] == b'\r' && i + 2 < buf.len() && buf[i + 2] == b'\n' {
                return Some((i, 3));
            }
        }
        i += 1;
    }
    None
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut id = None;
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for raw_line in frame.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("id:") {
            id = Some(rest.trim().to_string());
        }
    }

    if data_lines.is_empty() && event.is_none() {
        return None;
    }

    Some(SseEvent {
        id,
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::{SseEvent, SseParser};

    #[test]
    fn parses_event_and_data_lines() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                id: None,
                event: Some("message_start".to_string()),
                data: "{\"type\":\"message_start\"}".to_string(),
            }]
        );
    }

    #[test]
    fn reassembles_frames_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"par").is_empty());
        assert!(parser.push(b"tial\":true}").is_empty());
        let events = parser.push(b"\n\ndata: next\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"partial\":true}");
        assert_eq!(events[1].data, "next");
    }

    #[test]
    fn handles_crlf_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keep-alive\r\n\r\ndata: hello\r\ndata: world\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello\nworld");
    }

    #[test]
    fn done_marker_round_trip() {
        let ev = SseEvent::done();
        assert!(ev.is_done());
        assert_eq!(ev.format_sse(), "data: [DONE]\n\n");
    }

    #[test]
    fn format_sse_writes_event_then_multiline_data() {
        let ev = SseEvent::new("a\nb".to_string()).with_event("delta".to_string());
        assert_eq!(ev.format_sse(), "event: delta\ndata: a\ndata: b\n\n");
    }
}
