//! SSE adapter for the job events stream.
//!
//! Converts the raw `reqwest` byte stream of `GET /api/processor/jobs/events`
//! into [`JobEvent`] values. Handles partial frames across chunk boundaries,
//! multi-line `data:` fields, and comment lines.
//!
//! The connection is opened with a read timeout equal to the worker's poll
//! interval. Hitting that timeout is the *expected* end of the stream (the
//! periodic polling tick), so it terminates the stream normally instead of
//! surfacing an error. Any other transport failure yields a single error and
//! then ends the stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use tracing::debug;

use crate::error::ClientError;
use crate::types::JobEvent;

#[derive(Debug, serde::Deserialize)]
struct JobEventData {
    #[serde(default)]
    kind: String,
}

/// Stream adapter turning raw SSE bytes into [`JobEvent`] values.
///
/// Chunks are buffered as raw bytes and decoded only once a frame is
/// complete, so a multi-byte UTF-8 character split across chunk boundaries
/// never misparses.
pub struct JobEventStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: BytesMut,
    done: bool,
}

impl JobEventStream {
    pub(crate) fn new(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: BytesMut::new(),
            done: false,
        }
    }
}

impl Stream for JobEventStream {
    type Item = Result<JobEvent, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(event) = try_parse_frame(&mut this.buffer) {
                return Poll::Ready(Some(event));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    if e.is_timeout() {
                        // Read timeout: the deliberate polling tick.
                        debug!("event stream read timeout, closing for poll tick");
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Err(ClientError::Network(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Byte offset and delimiter length of the first frame terminator (a blank
/// line, with or without carriage returns).
fn frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i] == b'\n' {
            if buffer[i + 1] == b'\n' {
                return Some((i, 2));
            }
            if buffer[i + 1] == b'\r' && buffer.get(i + 2) == Some(&b'\n') {
                return Some((i, 3));
            }
        }
        i += 1;
    }
    None
}

/// Extract one complete SSE frame (terminated by a blank line) from the
/// buffer. Returns `None` until a full frame is available; frames with no
/// fields (keep-alive blank lines) are skipped.
fn try_parse_frame(buffer: &mut BytesMut) -> Option<Result<JobEvent, ClientError>> {
    loop {
        let (end, delimiter) = frame_end(buffer)?;
        let raw = buffer.split_to(end + delimiter);
        let frame = match std::str::from_utf8(&raw[..end]) {
            Ok(text) => text,
            Err(e) => {
                return Some(Err(ClientError::Parse(format!(
                    "invalid UTF-8 in event frame: {e}"
                ))))
            }
        };

        let mut event_name = "message".to_string();
        let mut data_lines: Vec<&str> = Vec::new();
        let mut saw_field = false;

        for line in frame.lines() {
            // Comment lines keep the connection alive, nothing more.
            if line.starts_with(':') || line.is_empty() {
                continue;
            }
            saw_field = true;
            if let Some(value) = line.strip_prefix("event:") {
                event_name = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.strip_prefix(' ').unwrap_or(value));
            }
            // id: and retry: fields are irrelevant to this consumer.
        }

        if !saw_field {
            continue;
        }

        if event_name == "job" {
            let data = data_lines.join("\n");
            return Some(match serde_json::from_str::<JobEventData>(&data) {
                Ok(parsed) => Ok(JobEvent::Job { kind: parsed.kind }),
                Err(e) => Err(ClientError::Parse(format!(
                    "malformed job event payload: {e}"
                ))),
            });
        }

        return Some(Ok(JobEvent::Other { event: event_name }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn stream_of(chunks: Vec<&str>) -> JobEventStream {
        let items: Vec<Result<Bytes, reqwest::Error>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        JobEventStream::new(futures::stream::iter(items))
    }

    async fn collect(stream: JobEventStream) -> Vec<Result<JobEvent, ClientError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn parses_job_event() {
        let events =
            collect(stream_of(vec!["event: job\ndata: {\"kind\": \"ocr_page_paddle\"}\n\n"])).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().expect("event").clone(),
            JobEvent::Job {
                kind: "ocr_page_paddle".into()
            }
        );
    }

    #[tokio::test]
    async fn frame_split_across_chunks() {
        let events = collect(stream_of(vec![
            "event: jo",
            "b\ndata: {\"kind\": \"embed",
            "_record\"}\n\n",
        ]))
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().expect("event").clone(),
            JobEvent::Job {
                kind: "embed_record".into()
            }
        );
    }

    #[tokio::test]
    async fn non_job_events_pass_through_tagged() {
        let events = collect(stream_of(vec!["data: ping\n\n"])).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().expect("event").clone(),
            JobEvent::Other {
                event: "message".into()
            }
        );
    }

    #[tokio::test]
    async fn comments_and_keepalives_are_skipped() {
        let events = collect(stream_of(vec![
            ": keep-alive\n\n",
            "event: job\ndata: {\"kind\": \"translate_page\"}\n\n",
        ]))
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().expect("event").clone(),
            JobEvent::Job {
                kind: "translate_page".into()
            }
        );
    }

    #[tokio::test]
    async fn multibyte_character_split_across_chunks() {
        let text = "event: job\ndata: {\"kind\": \"žluť\"}\n\n";
        // Split in the middle of the two-byte 'ž'.
        let split = text.find('ž').expect("char present") + 1;
        let bytes = text.as_bytes();
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];
        let events = collect(JobEventStream::new(futures::stream::iter(chunks))).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().expect("event").clone(),
            JobEvent::Job {
                kind: "žluť".into()
            }
        );
    }

    #[tokio::test]
    async fn crlf_frames_are_normalized() {
        let events =
            collect(stream_of(vec!["event: job\r\ndata: {\"kind\": \"x\"}\r\n\r\n"])).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().expect("event").clone(),
            JobEvent::Job { kind: "x".into() }
        );
    }

    #[tokio::test]
    async fn malformed_job_payload_is_a_parse_error() {
        let events = collect(stream_of(vec!["event: job\ndata: not-json\n\n"])).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(ClientError::Parse(_))));
    }

    #[tokio::test]
    async fn incomplete_trailing_frame_is_dropped() {
        let events = collect(stream_of(vec!["event: job\ndata: {\"kind\": \"x\"}"])).await;
        assert!(events.is_empty());
    }
}
