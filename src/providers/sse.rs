//! Server-sent event parsing for streamed chat completions
//!
//! OpenAI-compatible servers answer `stream: true` requests with a
//! `text/event-stream` body. Each event carries one JSON chunk on a `data:`
//! line; the literal `data: [DONE]` ends the stream. Events are separated by
//! a blank line.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::error::{OaichatError, Result};
use crate::providers::base::{ChatStream, StreamChunk, TokenUsage};

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsagePayload {
    #[serde(default)]
    pub(crate) prompt_tokens: u32,
    #[serde(default)]
    pub(crate) completion_tokens: u32,
}

impl From<UsagePayload> for TokenUsage {
    fn from(u: UsagePayload) -> Self {
        TokenUsage::new(u.prompt_tokens, u.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(default)]
    pub(crate) message: String,
}

/// Outcome of one SSE event block
#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    /// Chunks decoded from a `data:` payload (possibly none, e.g. role-only deltas)
    Chunks(Vec<StreamChunk>),
    /// `data: [DONE]`
    Done,
    /// Comment, keep-alive, or an event without data
    Ignored,
}

/// Decode one event block (the text between two blank lines)
pub(crate) fn parse_sse_event(block: &str) -> Result<SseEvent> {
    let mut data_lines = Vec::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // `event:`, `id:`, `retry:` and `:` comments carry nothing we use.
    }

    if data_lines.is_empty() {
        return Ok(SseEvent::Ignored);
    }

    let data = data_lines.join("\n");
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    if data.is_empty() {
        return Ok(SseEvent::Ignored);
    }

    let payload: ChunkPayload = serde_json::from_str(data).map_err(|e| {
        OaichatError::Network(format!("Malformed stream chunk: {} ({})", e, data))
    })?;

    if let Some(err) = payload.error {
        return Err(OaichatError::Network(format!("Provider stream error: {}", err.message)).into());
    }

    let mut chunks = Vec::new();
    for choice in payload.choices {
        if let Some(text) = choice.delta.and_then(|d| d.content) {
            if !text.is_empty() {
                chunks.push(StreamChunk::Delta(text));
            }
        }
    }
    if let Some(usage) = payload.usage {
        chunks.push(StreamChunk::Usage(usage.into()));
    }

    Ok(SseEvent::Chunks(chunks))
}

struct SseState {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<StreamChunk>>,
    finished: bool,
}

impl SseState {
    /// Move every complete event out of the buffer into `pending`
    fn drain_events(&mut self) {
        while let Some(pos) = find_event_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&block[..pos]).into_owned();
            self.process_block(&text);
            if self.finished {
                self.buffer.clear();
                return;
            }
        }
    }

    fn process_block(&mut self, block: &str) {
        match parse_sse_event(block) {
            Ok(SseEvent::Chunks(chunks)) => self.pending.extend(chunks.into_iter().map(Ok)),
            Ok(SseEvent::Done) => self.finished = true,
            Ok(SseEvent::Ignored) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Turn a raw response byte stream into a [`ChatStream`]
///
/// Bytes are buffered until a full event is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly. Carriage returns
/// are dropped so `\r\n` framed servers parse the same as `\n` ones.
pub fn chat_stream_from_bytes<S>(bytes: S) -> ChatStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = SseState {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
                    st.drain_events();
                }
                Some(Err(e)) => {
                    tracing::warn!("Stream interrupted: {}", e);
                    st.finished = true;
                    st.pending.push_back(Err(OaichatError::Network(format!(
                        "Stream interrupted: {}",
                        e
                    ))
                    .into()));
                }
                None => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    let rest = String::from_utf8_lossy(&rest).into_owned();
                    if !rest.trim().is_empty() {
                        st.process_block(&rest);
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn bytes_stream(parts: Vec<Vec<u8>>) -> impl Stream<Item = reqwest::Result<Bytes>> {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    async fn collect(parts: Vec<Vec<u8>>) -> Vec<Result<StreamChunk>> {
        chat_stream_from_bytes(bytes_stream(parts)).collect().await
    }

    fn delta_text(items: &[Result<StreamChunk>]) -> String {
        items
            .iter()
            .filter_map(|i| match i {
                Ok(StreamChunk::Delta(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_sse_event_delta() {
        let event = parse_sse_event(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap();
        assert_eq!(
            event,
            SseEvent::Chunks(vec![StreamChunk::Delta("Hi".to_string())])
        );
    }

    #[test]
    fn test_parse_sse_event_done() {
        assert_eq!(parse_sse_event("data: [DONE]").unwrap(), SseEvent::Done);
    }

    #[test]
    fn test_parse_sse_event_comment_ignored() {
        assert_eq!(parse_sse_event(": keep-alive").unwrap(), SseEvent::Ignored);
    }

    #[test]
    fn test_parse_sse_event_role_only_delta_yields_nothing() {
        let event =
            parse_sse_event(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(event, SseEvent::Chunks(vec![]));
    }

    #[test]
    fn test_parse_sse_event_usage() {
        let event = parse_sse_event(
            r#"data: {"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            SseEvent::Chunks(vec![StreamChunk::Usage(TokenUsage::new(12, 3))])
        );
    }

    #[test]
    fn test_parse_sse_event_error_payload() {
        let err = parse_sse_event(r#"data: {"error":{"message":"overloaded"}}"#).unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_parse_sse_event_malformed_json() {
        assert!(parse_sse_event("data: {not json").is_err());
    }

    #[tokio::test]
    async fn test_stream_across_chunk_boundaries() {
        let items = collect(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n".to_vec(),
            b"\ndata: {\"choices\":[{\"del".to_vec(),
            b"ta\":{\"content\":\"lo\"}}]}\n\n".to_vec(),
            b"data: [DONE]\n\n".to_vec(),
        ])
        .await;

        assert_eq!(delta_text(&items), "Hello");
        assert!(items.iter().all(|i| i.is_ok()));
    }

    #[tokio::test]
    async fn test_stream_split_utf8_sequence() {
        // "é" is 0xC3 0xA9; split it across two network chunks.
        let items = collect(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"caf\xC3".to_vec(),
            b"\xA9\"}}]}\n\ndata: [DONE]\n\n".to_vec(),
        ])
        .await;

        assert_eq!(delta_text(&items), "café");
    }

    #[tokio::test]
    async fn test_stream_crlf_framing() {
        let items = collect(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\n\r\n".to_vec(),
            b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\r\n\r\ndata: [DONE]\r\n\r\n".to_vec(),
        ])
        .await;

        assert_eq!(delta_text(&items), "ab");
    }

    #[tokio::test]
    async fn test_stream_stops_at_done() {
        let items = collect(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\ndata: [DONE]\n\n".to_vec(),
            b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n".to_vec(),
        ])
        .await;

        assert_eq!(delta_text(&items), "x");
    }

    #[tokio::test]
    async fn test_stream_without_trailing_blank_line() {
        let items = collect(vec![b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}".to_vec()]).await;
        assert_eq!(delta_text(&items), "tail");
    }

    #[tokio::test]
    async fn test_stream_error_event_terminates_with_err() {
        let items = collect(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n".to_vec(),
            b"data: {\"error\":{\"message\":\"boom\"}}\n\n".to_vec(),
            b"data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n".to_vec(),
        ])
        .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
