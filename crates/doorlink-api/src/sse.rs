//! Server-sent event stream client for the device's `/events` endpoint.
//!
//! Opens a single streaming `GET http://{host}:{port}/events` request and
//! decodes the `text/event-stream` body into [`StreamEvent`]s. This is a
//! thin, single-attempt connection: it never retries and never watches
//! liveness. All resilience lives in `doorlink-core`'s supervisor.
//!
//! # Example
//!
//! ```rust,ignore
//! use doorlink_api::{EventSource, TransportConfig};
//!
//! let mut source = EventSource::connect("garagedoor.local", 80, &TransportConfig::default()).await?;
//! while let Some(event) = source.next_event().await? {
//!     println!("{event:?}");
//! }
//! source.close();
//! ```

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use url::Url;

use crate::error::Error;
use crate::event::{DeviceEvent, StreamEvent};
use crate::transport::TransportConfig;

// ── SSE wire decoding ────────────────────────────────────────────────

/// One dispatched server-sent event: accumulated `event:` name and
/// `data:` payload, emitted at the blank-line boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SseFrame {
    name: String,
    data: String,
}

/// Incremental decoder for the `text/event-stream` wire format.
///
/// Chunks may split lines anywhere, including inside a multi-byte UTF-8
/// character; the decoder carries the incomplete tail as raw bytes and
/// only converts complete lines. Comment lines (leading `:`) and unknown
/// fields are ignored, per the SSE format. CRLF line endings are
/// tolerated.
#[derive(Debug, Default)]
struct SseDecoder {
    tail: Vec<u8>,
    name: String,
    data: Option<String>,
}

impl SseDecoder {
    /// Feed a raw chunk, returning every frame completed by it.
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.tail.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.tail.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.tail.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            self.push_line(line.trim_end_matches(['\n', '\r']), &mut frames);
        }
        frames
    }

    fn push_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            // Dispatch boundary. A frame without any `data:` line is only
            // meaningful if it was named (e.g. a bare `event: ping`).
            if self.data.is_some() || !self.name.is_empty() {
                frames.push(SseFrame {
                    name: std::mem::take(&mut self.name),
                    data: self.data.take().unwrap_or_default(),
                });
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.name = value.to_owned(),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            },
            // `id` and `retry` are valid SSE fields the device never uses.
            _ => {}
        }
    }
}

/// Map a dispatched frame onto the event vocabulary the device speaks.
///
/// Malformed `state` payloads are dropped with a warning -- the stream
/// keeps going. Unknown event names are ignored.
fn decode_frame(frame: SseFrame) -> Option<StreamEvent> {
    match frame.name.as_str() {
        "state" => match serde_json::from_str::<DeviceEvent>(&frame.data) {
            Ok(event) => Some(StreamEvent::State(event)),
            Err(e) => {
                tracing::warn!(error = %e, body = %frame.data, "dropping malformed state event");
                None
            }
        },
        "log" => Some(StreamEvent::Log(frame.data)),
        "ping" => Some(StreamEvent::Ping),
        other => {
            tracing::debug!(event = other, "ignoring unknown stream event");
            None
        }
    }
}

// ── EventSource ──────────────────────────────────────────────────────

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Handle to one open event stream.
///
/// Yields events until [`close`](Self::close) is called or the transport
/// fails, after which [`next_event`](Self::next_event) reports the
/// terminal condition and nothing further.
pub struct EventSource {
    stream: Option<ByteStream>,
    decoder: SseDecoder,
    ready: VecDeque<StreamEvent>,
    url: Url,
}

impl EventSource {
    /// Open the device's `/events` endpoint. Single attempt: a failure
    /// here is returned to the caller, not retried.
    pub async fn connect(
        host: &str,
        port: u16,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let url = Url::parse(&format!("http://{host}:{port}/events"))?;
        let client = transport.build_stream_client()?;

        let response = client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        tracing::info!(url = %url, "event stream opened");

        Ok(Self {
            stream: Some(response.bytes_stream().boxed()),
            decoder: SseDecoder::default(),
            ready: VecDeque::new(),
            url,
        })
    }

    /// Next decoded event.
    ///
    /// `Ok(None)` means the stream ended cleanly (or was closed locally);
    /// `Err` means the transport failed mid-stream. Both are terminal:
    /// every subsequent call returns `Ok(None)`.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, Error> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(Some(event));
            }

            let chunk = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => return Ok(None),
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for frame in self.decoder.feed(&bytes) {
                        if let Some(event) = decode_frame(frame) {
                            self.ready.push_back(event);
                        }
                    }
                }
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(Error::Transport(e));
                }
                None => {
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Close the stream. Idempotent: closing an already-closed handle is
    /// logged and harmless.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(url = %self.url, "event stream closed");
        } else {
            tracing::debug!(url = %self.url, "event stream already closed");
        }
    }

    /// The endpoint this handle was opened against.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ReportedState;

    fn feed_str(decoder: &mut SseDecoder, text: &str) -> Vec<SseFrame> {
        decoder.feed(text.as_bytes())
    }

    #[test]
    fn decode_single_frame() {
        let mut decoder = SseDecoder::default();
        let frames = feed_str(&mut decoder, "event: ping\ndata: \n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "ping");
        assert_eq!(frames[0].data, "");
    }

    #[test]
    fn decode_frame_split_across_chunks() {
        let mut decoder = SseDecoder::default();

        assert!(feed_str(&mut decoder, "event: sta").is_empty());
        assert!(feed_str(&mut decoder, "te\ndata: {\"x\":").is_empty());
        let frames = feed_str(&mut decoder, "1}\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "state");
        assert_eq!(frames[0].data, "{\"x\":1}");
    }

    #[test]
    fn decode_reassembles_multibyte_characters_split_across_chunks() {
        let mut decoder = SseDecoder::default();

        // "dörr" with the ö (0xC3 0xB6) split between two chunks.
        assert!(decoder.feed(b"event: log\ndata: d\xC3").is_empty());
        let frames = decoder.feed(b"\xB6rr\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "d\u{f6}rr");
    }

    #[test]
    fn decode_multiple_frames_in_one_chunk() {
        let mut decoder = SseDecoder::default();
        let frames = feed_str(
            &mut decoder,
            "event: log\ndata: booting\n\nevent: ping\ndata: \n\n",
        );

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "log");
        assert_eq!(frames[0].data, "booting");
        assert_eq!(frames[1].name, "ping");
    }

    #[test]
    fn decode_tolerates_crlf_and_comments() {
        let mut decoder = SseDecoder::default();
        let frames = feed_str(
            &mut decoder,
            ": keep-alive\r\nevent: log\r\ndata: hello\r\n\r\n",
        );

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "log");
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn decode_joins_multiline_data() {
        let mut decoder = SseDecoder::default();
        let frames = feed_str(&mut decoder, "event: log\ndata: one\ndata: two\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn blank_lines_between_frames_emit_nothing() {
        let mut decoder = SseDecoder::default();
        assert!(feed_str(&mut decoder, "\n\n\n").is_empty());
    }

    #[test]
    fn frame_decodes_to_state_event() {
        let frame = SseFrame {
            name: "state".into(),
            data: r#"{"id":"cover-garage_door","state":"OPEN","value":1.0,"current_operation":"IDLE"}"#
                .into(),
        };

        match decode_frame(frame) {
            Some(StreamEvent::State(event)) => {
                assert_eq!(event.state, ReportedState::Open);
                assert_eq!(event.id, "cover-garage_door");
            }
            other => panic!("expected state event, got {other:?}"),
        }
    }

    #[test]
    fn malformed_state_payload_is_dropped() {
        let frame = SseFrame {
            name: "state".into(),
            data: "not json at all".into(),
        };

        assert!(decode_frame(frame).is_none());
    }

    #[test]
    fn unknown_event_name_is_ignored() {
        let frame = SseFrame {
            name: "firmware".into(),
            data: "{}".into(),
        };

        assert!(decode_frame(frame).is_none());
    }
}
