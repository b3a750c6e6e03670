//! Incremental `text/event-stream` parser.
//!
//! Raw bytes are appended to a [`BytesMut`] buffer and complete lines are
//! split off the front, so chunk boundaries may fall anywhere, including
//! inside a UTF-8 sequence. A record is only emitted once its terminating
//! blank line has been seen.

use bytes::BytesMut;

/// Upper bound on unterminated input (buffered bytes plus pending `data:`).
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// One dispatched record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRecord {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("event stream record exceeds {limit} bytes")]
    Oversized { limit: usize },
}

#[derive(Debug)]
pub struct EventStreamParser {
    buffer: BytesMut,
    limit: usize,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    id: Option<String>,
}

impl Default for EventStreamParser {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            limit,
            event: None,
            data: Vec::new(),
            data_len: 0,
            id: None,
        }
    }

    /// Consume a chunk and return every record it completed, in order.
    ///
    /// Fails once a single record grows past the limit; the parser must not
    /// be fed again after that.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamRecord>, StreamError> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(newline + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if let Some(record) = self.line(&String::from_utf8_lossy(&line)) {
                records.push(record);
            }
        }
        if self.buffer.len() + self.data_len > self.limit {
            self.buffer.clear();
            self.reset();
            return Err(StreamError::Oversized { limit: self.limit });
        }
        Ok(records)
    }

    /// Whether unterminated input is being held back.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.data.is_empty() || self.event.is_some()
    }

    fn line(&mut self, line: &str) -> Option<StreamRecord> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len() + 1;
                self.data.push(value.to_string());
            },
            "id" => self.id = Some(value.to_string()),
            _ => {},
        }
        None
    }

    fn dispatch(&mut self) -> Option<StreamRecord> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        self.data_len = 0;
        Some(StreamRecord {
            event,
            data,
            id: self.id.clone(),
        })
    }

    fn reset(&mut self) {
        self.event = None;
        self.data.clear();
        self.data_len = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn feed(parser: &mut EventStreamParser, chunk: &[u8]) -> Vec<StreamRecord> {
        parser.feed(chunk).unwrap()
    }

    #[test]
    fn single_record() {
        let mut parser = EventStreamParser::new();
        let records = feed(&mut parser, b"event: code\ndata: {\"event\":\"code\"}\n\n");
        assert_eq!(records, vec![StreamRecord {
            event: Some("code".into()),
            data: r#"{"event":"code"}"#.into(),
            id: None,
        }]);
        assert!(!parser.has_pending());
    }

    #[test]
    fn nothing_before_blank_line() {
        let mut parser = EventStreamParser::new();
        assert!(feed(&mut parser, b"event: code\ndata: {\"a\":1}\n").is_empty());
        assert!(parser.has_pending());
        let records = feed(&mut parser, b"\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, r#"{"a":1}"#);
    }

    #[test]
    fn split_inside_json_value() {
        let mut parser = EventStreamParser::new();
        assert!(feed(&mut parser, b"data: {\"event\":\"code\",\"qr_im").is_empty());
        assert!(feed(&mut parser, b"age\":\"X\"}").is_empty());
        let records = feed(&mut parser, b"\n\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, r#"{"event":"code","qr_image":"X"}"#);
    }

    #[test]
    fn split_inside_utf8_sequence() {
        let text = "data: {\"error\":\"gagal – coba lagi\"}\n\n".as_bytes();
        let dash = text.iter().position(|b| *b == 0xE2).unwrap_or_default();
        let mut parser = EventStreamParser::new();
        assert!(feed(&mut parser, &text[..dash + 1]).is_empty());
        let records = feed(&mut parser, &text[dash + 1..]);
        assert_eq!(records[0].data, r#"{"error":"gagal – coba lagi"}"#);
    }

    #[test]
    fn crlf_comments_and_multiline_data() {
        let mut parser = EventStreamParser::new();
        let records = feed(
            &mut parser,
            b": keep-alive\r\nevent: x\r\ndata: one\r\ndata:two\r\n\r\n",
        );
        assert_eq!(records, vec![StreamRecord {
            event: Some("x".into()),
            data: "one\ntwo".into(),
            id: None,
        }]);
    }

    #[test]
    fn many_records_in_one_chunk_keep_order() {
        let mut parser = EventStreamParser::new();
        let records = feed(
            &mut parser,
            b"data: 1\n\ndata: 2\n\nevent: only-name\n\ndata: 3\n\n",
        );
        let data: Vec<_> = records.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(data, vec!["1", "2", "3"]);
    }

    #[test]
    fn event_name_does_not_leak_into_next_record() {
        let mut parser = EventStreamParser::new();
        let records = feed(&mut parser, b"event: code\ndata: a\n\ndata: b\n\n");
        assert_eq!(records[0].event.as_deref(), Some("code"));
        assert_eq!(records[1].event, None);
    }

    #[test]
    fn id_is_sticky() {
        let mut parser = EventStreamParser::new();
        let records = feed(&mut parser, b"id: 7\ndata: a\n\ndata: b\n\n");
        assert_eq!(records[0].id.as_deref(), Some("7"));
        assert_eq!(records[1].id.as_deref(), Some("7"));
    }

    #[test]
    fn unterminated_line_over_limit_is_rejected() {
        let mut parser = EventStreamParser::with_limit(16);
        assert!(feed(&mut parser, b"data: 0123").is_empty());
        assert_eq!(
            parser.feed(b"456789abcdef"),
            Err(StreamError::Oversized { limit: 16 })
        );
        assert!(!parser.has_pending());
    }

    #[test]
    fn record_spread_over_many_data_lines_is_capped() {
        let mut parser = EventStreamParser::with_limit(16);
        assert!(feed(&mut parser, b"data: 01234\n").is_empty());
        assert_eq!(
            parser.feed(b"data: 56789\ndata: abcde\n"),
            Err(StreamError::Oversized { limit: 16 })
        );
    }

    #[test]
    fn completed_records_free_their_budget() {
        let mut parser = EventStreamParser::with_limit(16);
        for _ in 0..4 {
            let records = feed(&mut parser, b"data: 0123456789\n\n");
            assert_eq!(records.len(), 1);
        }
    }
}
