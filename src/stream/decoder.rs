//! Line-delimited JSON stream decoding.

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;

use crate::error::Result;
use crate::transport::ByteStream;
use crate::types::StreamEvent;

/// Stateful decoder from raw bytes to [`StreamEvent`]s.
///
/// Multi-byte code points split across chunk boundaries are held back until
/// complete, and a trailing partial line is kept for the next chunk.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending_bytes: Vec<u8>,
    line_buffer: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the events of every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending_bytes.extend_from_slice(chunk);
        self.drain_utf8();

        let mut events = Vec::new();
        while let Some(line_end) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=line_end).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// End of input: flush undecodable bytes and parse the unterminated tail.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if !self.pending_bytes.is_empty() {
            self.line_buffer
                .push_str(&String::from_utf8_lossy(&self.pending_bytes));
            self.pending_bytes.clear();
        }
        let tail = std::mem::take(&mut self.line_buffer);
        parse_line(&tail).into_iter().collect()
    }

    /// Bytes still waiting for a line terminator.
    pub fn buffered(&self) -> &str {
        &self.line_buffer
    }

    fn drain_utf8(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    self.line_buffer.push_str(text);
                    self.pending_bytes.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.line_buffer
                        .push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            self.line_buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + invalid);
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            self.pending_bytes.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn parse_line(raw: &str) -> Option<StreamEvent> {
    let line = raw.trim();
    let line = line
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(line);
    if line.is_empty() || line == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<StreamEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, line, "skipping unparseable stream line");
            None
        }
    }
}

/// Decode a byte stream into events.
///
/// The returned stream ends after a `done` or `error` event, after the byte
/// stream ends, or right after yielding a read failure.
pub fn decode_stream(bytes: ByteStream) -> BoxStream<'static, Result<StreamEvent>> {
    let stream = async_stream::stream! {
        let mut decoder = StreamDecoder::new();
        let mut inner = bytes;

        'read: loop {
            let events = match inner.next().await {
                Some(Ok(chunk)) => decoder.feed(&chunk),
                Some(Err(e)) => {
                    yield Err(e);
                    break 'read;
                }
                None => {
                    for event in decoder.finish() {
                        let terminal = event.is_terminal();
                        yield Ok(event);
                        if terminal {
                            break;
                        }
                    }
                    break 'read;
                }
            };

            for event in events {
                let terminal = event.is_terminal();
                yield Ok(event);
                if terminal {
                    break 'read;
                }
            }
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::Delta { text: text.into() }
    }

    #[test]
    fn splits_lines_and_keeps_partial_tail() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"{\"type\":\"delta\",\"text\":\"He\"}\n{\"type\":\"del");
        assert_eq!(events, vec![delta("He")]);
        assert_eq!(decoder.buffered(), "{\"type\":\"del");

        let events = decoder.feed(b"ta\",\"text\":\"llo\"}\n");
        assert_eq!(events, vec![delta("llo")]);
        assert_eq!(decoder.buffered(), "");
    }

    #[test]
    fn multibyte_code_point_split_across_chunks() {
        let line = "{\"type\":\"delta\",\"text\":\"caf\u{e9} \u{1f381}\"}\n".as_bytes();
        // Split inside the 4-byte gift emoji and inside the 2-byte é.
        let emoji_at = line.len() - 5;
        let e_acute_at = line.iter().position(|b| *b == 0xc3).unwrap() + 1;

        let mut decoder = StreamDecoder::new();
        let mut events = decoder.feed(&line[..e_acute_at]);
        events.extend(decoder.feed(&line[e_acute_at..emoji_at]));
        events.extend(decoder.feed(&line[emoji_at..]));
        assert_eq!(events, vec![delta("caf\u{e9} \u{1f381}")]);
    }

    #[test]
    fn noise_lines_are_skipped() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(
            b"not json\n\r\n: keepalive\n{\"type\":\"ping\"}\ndata: {\"type\":\"delta\",\"text\":\"ok\"}\r\n",
        );
        assert_eq!(events, vec![delta("ok")]);
    }

    #[test]
    fn finish_parses_unterminated_tail() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(b"{\"type\":\"done\",\"followups\":[\"Why?\"]}").is_empty());
        assert_eq!(
            decoder.finish(),
            vec![StreamEvent::Done {
                followups: vec!["Why?".into()]
            }]
        );
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = StreamDecoder::new();
        let mut chunk = b"{\"type\":\"delta\",\"text\":\"a".to_vec();
        chunk.push(0xff);
        chunk.extend_from_slice(b"b\"}\n");
        assert_eq!(decoder.feed(&chunk), vec![delta("a\u{fffd}b")]);
    }

    fn byte_stream(chunks: Vec<&'static str>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec())),
        ))
    }

    #[tokio::test]
    async fn error_event_is_passed_through_and_ends_decoding() {
        let mut events = decode_stream(byte_stream(vec![
            "{\"type\":\"delta\",\"text\":\"partial\"}\n",
            "{\"type\":\"error\",\"message\":\"model overloaded\"}\n",
            "{\"type\":\"delta\",\"text\":\"never\"}\n",
        ]));

        assert_eq!(events.next().await.unwrap().unwrap(), delta("partial"));
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            StreamEvent::Error {
                message: "model overloaded".to_string(),
                retryable: None,
                fatal: None,
            }
        );
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn done_ends_the_stream() {
        let events: Vec<_> = decode_stream(byte_stream(vec![
            "{\"type\":\"meta\",\"sources\":[]}\n{\"type\":\"done\"}\n",
            "{\"type\":\"delta\",\"text\":\"after done\"}\n",
        ]))
        .collect()
        .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Ok(StreamEvent::Done { .. })));
    }
}
