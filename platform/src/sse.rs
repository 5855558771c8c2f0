//! SSE frame parsing for platform execution streams.
//!
//! Line-based framing: `event: <type>` sets the current event type,
//! `data: <json>` carries the payload, a blank line dispatches. A decoded
//! data block that itself contains `event`/`data` keys is unwrapped once
//! (nested framing tolerance).

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::{
    error::{PlatformError, PlatformResult},
    stream::StreamFrame,
};

/// Maximum SSE buffer size (1 MB) to bound memory against an upstream
/// that sends data without frame delimiters.
const MAX_SSE_BUFFER_SIZE: usize = 1024 * 1024;

/// One raw SSE frame before JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental parser over the SSE line protocol.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> PlatformResult<Vec<SseFrame>> {
        if self.buffer.len() + chunk.len() > MAX_SSE_BUFFER_SIZE {
            return Err(PlatformError::SseFraming(format!(
                "buffer exceeded {MAX_SSE_BUFFER_SIZE} bytes without a frame delimiter"
            )));
        }
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
            } else {
                self.accept_line(line);
            }
        }
        Ok(frames)
    }

    /// Flush a trailing frame that was never terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            if !line.is_empty() {
                self.accept_line(&line);
            }
        }
        self.dispatch()
    }

    fn accept_line(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix("event:") {
            self.event_type = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // Comment lines (":") and unknown fields are ignored per the SSE spec.
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event_type.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let event = self.event_type.take().unwrap_or_else(|| "data".to_string());
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(SseFrame { event, data })
    }
}

/// Decode a raw SSE frame into a typed stream frame.
///
/// If the JSON data block is itself `{event, data}` framing, the inner
/// pair takes precedence. Unwrapping is applied once only.
pub fn decode_frame(frame: &SseFrame) -> PlatformResult<StreamFrame> {
    let value: Value = match serde_json::from_str(&frame.data) {
        Ok(v) => v,
        // Non-JSON data blocks are treated as plain text payloads.
        Err(_) => Value::String(frame.data.clone()),
    };

    let (event_type, data) = match value.as_object() {
        Some(obj) if obj.contains_key("event") && obj.contains_key("data") => {
            let inner_type = obj
                .get("event")
                .and_then(Value::as_str)
                .unwrap_or(&frame.event)
                .to_string();
            (inner_type, obj.get("data").cloned().unwrap_or(Value::Null))
        }
        _ => (frame.event.clone(), value),
    };

    StreamFrame::decode(&event_type, &data)
}

/// Adapter from an HTTP byte stream to a stream of typed frames.
///
/// Ends after the terminal event. If the transport drops before one
/// arrives, yields [`PlatformError::StreamInterrupted`] carrying the last
/// execution id seen, then ends.
pub struct EventStream<S> {
    inner: Pin<Box<S>>,
    parser: SseParser,
    pending: std::collections::VecDeque<StreamFrame>,
    /// Error delivered after the queued frames drain.
    pending_error: Option<PlatformError>,
    last_execution_id: Option<String>,
    saw_terminal: bool,
    done: bool,
}

impl<S> EventStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner: Box::pin(inner),
            parser: SseParser::new(),
            pending: std::collections::VecDeque::new(),
            pending_error: None,
            last_execution_id: None,
            saw_terminal: false,
            done: false,
        }
    }

    fn enqueue(&mut self, raw: Vec<SseFrame>) {
        for frame in raw {
            match decode_frame(&frame) {
                Ok(typed) => {
                    if let Some(id) = &typed.execution_id {
                        self.last_execution_id = Some(id.clone());
                    }
                    if typed.event.is_terminal() {
                        self.saw_terminal = true;
                    }
                    self.pending.push_back(typed);
                }
                Err(e) => {
                    // A single undecodable frame is dropped, not fatal.
                    warn!(error = %e, event = %frame.event, "Dropping undecodable SSE frame");
                }
            }
        }
    }
}

impl<S> Stream for EventStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    type Item = PlatformResult<StreamFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if let Some(err) = self.pending_error.take() {
                return Poll::Ready(Some(Err(err)));
            }
            if self.done {
                return Poll::Ready(None);
            }
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => match self.parser.feed(&bytes) {
                    Ok(raw) => self.enqueue(raw),
                    Err(e) => {
                        self.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    let execution_id = self.last_execution_id.clone();
                    warn!(error = %e, "Execution stream transport error");
                    return Poll::Ready(Some(Err(PlatformError::StreamInterrupted {
                        execution_id,
                    })));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if let Some(frame) = self.parser.finish() {
                        self.enqueue(vec![frame]);
                    }
                    if !self.saw_terminal {
                        self.pending_error = Some(PlatformError::StreamInterrupted {
                            execution_id: self.last_execution_id.clone(),
                        });
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Boxed frame stream returned by client execution methods.
pub type FrameStream = Pin<Box<dyn Stream<Item = PlatformResult<StreamFrame>> + Send>>;

/// Wrap an HTTP response body into a boxed frame stream.
pub fn frame_stream(response: reqwest::Response) -> FrameStream {
    EventStream::new(response.bytes_stream()).boxed()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stream::{ExecutionStatus, StreamEvent};

    #[test]
    fn test_two_field_framing() {
        let mut parser = SseParser::new();
        let frames = parser
            .feed(b"event: state\ndata: {\"status\":\"running\"}\n\n")
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "state");
        assert_eq!(frames[0].data, r#"{"status":"running"}"#);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: da").unwrap().is_empty());
        assert!(parser.feed(b"ta\ndata: \"he").unwrap().is_empty());
        let frames = parser.feed(b"llo\"\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "\"hello\"");
    }

    #[test]
    fn test_multi_line_data() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"data: line1\ndata: line2\n\n").unwrap();
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn test_data_only_frame_defaults_to_data_event() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"data: \"chunk\"\n\n").unwrap();
        assert_eq!(frames[0].event, "data");
    }

    #[test]
    fn test_buffer_cap() {
        let mut parser = SseParser::new();
        let big = vec![b'x'; MAX_SSE_BUFFER_SIZE + 1];
        assert!(parser.feed(&big).is_err());
    }

    #[test]
    fn test_nested_framing_unwrap() {
        let raw = SseFrame {
            event: "message".to_string(),
            data: json!({"event": "state", "data": {"status": "completed"}}).to_string(),
        };
        let typed = decode_frame(&raw).unwrap();
        assert_eq!(
            typed.event,
            StreamEvent::State {
                status: ExecutionStatus::Completed,
                total_steps: None
            }
        );
    }

    #[test]
    fn test_plain_text_data_block() {
        let raw = SseFrame {
            event: "data".to_string(),
            data: "not json".to_string(),
        };
        let typed = decode_frame(&raw).unwrap();
        assert_eq!(
            typed.event,
            StreamEvent::Data {
                text: "not json".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_event_stream_interrupt_without_terminal() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![Ok(Bytes::from_static(
            b"event: state\ndata: {\"status\":\"running\",\"execution_id\":\"ex-9\"}\n\n",
        ))];
        let mut stream = EventStream::new(futures::stream::iter(chunks));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.execution_id.as_deref(), Some("ex-9"));

        match stream.next().await.unwrap() {
            Err(PlatformError::StreamInterrupted { execution_id }) => {
                assert_eq!(execution_id.as_deref(), Some("ex-9"));
            }
            other => panic!("expected interruption, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_event_stream_completes_cleanly() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(
                b"event: data\ndata: \"out\"\n\nevent: done\ndata: {\"exit_code\":0}\n\n",
            )),
        ];
        let mut stream = EventStream::new(futures::stream::iter(chunks));

        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(item.unwrap().event);
        }
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }
}
