//! SSE Codec (C1): encode and decode the Server-Sent Events line format.
//!
//! Built the way the teacher builds a stateful streaming accumulator
//! (`llm::provider::ToolCallAssembler`): a small struct with private fields and
//! a `push_*`-named method that is fed one unit at a time and returns a
//! completed value when the unit boundary is crossed.

use crate::error::CodecError;

/// Line terminator used when encoding a record. Decoding accepts all three on
/// input regardless of which separator the encoder used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    CrLf,
    Cr,
    Lf,
}

impl Default for Separator {
    fn default() -> Self {
        Separator::CrLf
    }
}

impl Separator {
    fn as_str(self) -> &'static str {
        match self {
            Separator::CrLf => "\r\n",
            Separator::Cr => "\r",
            Separator::Lf => "\n",
        }
    }
}

/// A single Server-Sent Event record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSentEvent {
    pub event: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
    pub retry: Option<i64>,
}

impl ServerSentEvent {
    /// The event name clients should treat this record as, defaulting to the
    /// SSE spec's implicit "message" when no `event:` field was sent.
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Strips any embedded CR/LF so a field value can never smuggle in a record
/// boundary or a second field.
fn strip_line_terminators(s: &str) -> String {
    s.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Encode one event (plus an optional leading comment) as a complete SSE
/// record, terminated by one blank line.
pub fn encode_event(
    event: &ServerSentEvent,
    comment: Option<&str>,
    sep: Separator,
) -> Result<String, CodecError> {
    let line_sep = sep.as_str();
    let mut out = String::new();

    if let Some(comment) = comment {
        for line in split_on_any_terminator(comment) {
            out.push_str(": ");
            out.push_str(&line);
            out.push_str(line_sep);
        }
    }

    if let Some(id) = &event.id {
        out.push_str("id: ");
        out.push_str(&strip_line_terminators(id));
        out.push_str(line_sep);
    }

    if let Some(name) = &event.event {
        out.push_str("event: ");
        out.push_str(&strip_line_terminators(name));
        out.push_str(line_sep);
    }

    if let Some(data) = &event.data {
        for fragment in split_on_any_terminator(data) {
            out.push_str("data:");
            if !fragment.is_empty() {
                out.push(' ');
                out.push_str(&fragment);
            }
            out.push_str(line_sep);
        }
    }

    if let Some(retry) = event.retry {
        if retry < 0 {
            return Err(CodecError::InvalidRetry(retry.to_string()));
        }
        out.push_str("retry: ");
        out.push_str(&retry.to_string());
        out.push_str(line_sep);
    }

    out.push_str(line_sep);
    Ok(out)
}

/// Splits text on `\r\n`, `\r`, or `\n`, in any mixture, preserving empty
/// fragments between consecutive terminators.
fn split_on_any_terminator(s: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                fragments.push(std::mem::take(&mut current));
            }
            '\n' => fragments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fragments.push(current);
    fragments
}

/// Stateful line-at-a-time SSE decoder.
///
/// Feed it one line (already stripped of its own terminator) at a time via
/// [`push_line`](SseDecoder::push_line). A blank line dispatches the
/// accumulated event; `last_event_id` survives across dispatches per the SSE
/// spec, everything else resets.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<i64>,
    last_event_id: Option<String>,
    saw_field: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently seen non-NUL `id:` value, preserved across dispatches.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feed one line. Returns `Some(event)` when the line was blank and at
    /// least one field had been accumulated; returns `None` while still
    /// accumulating, and also for an empty record (a blank line with nothing
    /// buffered first).
    pub fn push_line(&mut self, line: &str) -> Option<ServerSentEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        if let Some(rest) = line.strip_prefix(':') {
            let _ = rest; // comment line: no field, no event
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let field = &line[..idx];
                let mut value = &line[idx + 1..];
                if let Some(stripped) = value.strip_prefix(' ') {
                    value = stripped;
                }
                (field, value)
            }
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event = Some(value.to_string());
                self.saw_field = true;
            }
            "data" => {
                self.data.push(value.to_string());
                self.saw_field = true;
            }
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                    self.last_event_id = Some(value.to_string());
                }
                self.saw_field = true;
            }
            "retry" => {
                if let Ok(n) = value.parse::<i64>() {
                    self.retry = Some(n);
                }
                self.saw_field = true;
            }
            _ => {} // unrecognised field: ignored
        }

        None
    }

    fn dispatch(&mut self) -> Option<ServerSentEvent> {
        if !self.saw_field {
            return None;
        }

        let event = ServerSentEvent {
            event: self.event.take(),
            data: if self.data.is_empty() {
                None
            } else {
                Some(self.data.join("\n"))
            },
            id: self.id.take(),
            retry: self.retry.take(),
        };

        self.data.clear();
        self.saw_field = false;
        Some(event)
    }
}

/// Feeds a chunk of raw bytes (which may contain zero, one, or many complete
/// lines, plus a trailing partial line) through a decoder, returning all
/// events dispatched so far. The trailing partial line stays in `carry`.
pub fn feed_lines(
    decoder: &mut SseDecoder,
    carry: &mut String,
    bytes: &str,
) -> Vec<ServerSentEvent> {
    carry.push_str(bytes);
    let mut events = Vec::new();

    loop {
        let Some(term_pos) = carry.find(|c: char| c == '\r' || c == '\n') else {
            break;
        };

        let is_cr = carry.as_bytes()[term_pos] == b'\r';
        if is_cr && term_pos + 1 == carry.len() {
            // Could be a CRLF split across a chunk boundary; wait for more input.
            break;
        }

        let mut terminator_len = 1;
        if is_cr && carry.as_bytes().get(term_pos + 1) == Some(&b'\n') {
            terminator_len = 2;
        }

        let line = carry[..term_pos].to_string();
        carry.drain(..term_pos + terminator_len);

        if let Some(event) = decoder.push_line(&line) {
            events.push(event);
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut SseDecoder, text: &str) -> Vec<ServerSentEvent> {
        let mut out = Vec::new();
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(event) = decoder.push_line(line) {
                out.push(event);
            }
        }
        out
    }

    #[test]
    fn round_trip_basic_event() {
        let event = ServerSentEvent {
            event: Some("text".to_string()),
            data: Some(r#"{"text":"hi"}"#.to_string()),
            id: None,
            retry: None,
        };
        let encoded = encode_event(&event, None, Separator::CrLf).unwrap();
        assert_eq!(encoded, "event: text\r\ndata: {\"text\":\"hi\"}\r\n\r\n");

        let mut decoder = SseDecoder::new();
        let decoded = decode_all(&mut decoder, &encoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].event.as_deref(), Some("text"));
        assert_eq!(decoded[0].data.as_deref(), Some(r#"{"text":"hi"}"#));
    }

    #[test]
    fn absent_event_name_decodes_to_message() {
        let mut decoder = SseDecoder::new();
        let decoded = decode_all(&mut decoder, "data: hello\n\n");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].event_name(), "message");
    }

    #[test]
    fn separator_stripping_in_id_and_event() {
        let event = ServerSentEvent {
            event: Some("weird\r\nname".to_string()),
            data: None,
            id: Some("id\nwith\nnewlines".to_string()),
            retry: None,
        };
        let encoded = encode_event(&event, None, Separator::Lf).unwrap();
        assert!(!encoded.lines().any(|l| l.contains("weird")
            && (l.contains('\r') || l.matches('\n').count() > 0 && l != "weird\nname")));
        // No encoded field line itself contains an embedded terminator.
        for line in encoded.split('\n') {
            if let Some(rest) = line.strip_prefix("id: ") {
                assert!(!rest.contains('\r'));
            }
            if let Some(rest) = line.strip_prefix("event: ") {
                assert!(!rest.contains('\r'));
            }
        }
    }

    #[test]
    fn comment_line_decodes_to_no_event() {
        let mut decoder = SseDecoder::new();
        let decoded = decode_all(&mut decoder, ": this is a comment\n\n");
        assert!(decoded.is_empty());
    }

    #[test]
    fn empty_record_produces_no_event() {
        let mut decoder = SseDecoder::new();
        let decoded = decode_all(&mut decoder, "\n");
        assert!(decoded.is_empty());
    }

    #[test]
    fn last_event_id_persists_across_dispatch() {
        let mut decoder = SseDecoder::new();
        decode_all(&mut decoder, "id: 42\ndata: first\n\n");
        assert_eq!(decoder.last_event_id(), Some("42"));
        let decoded = decode_all(&mut decoder, "data: second\n\n");
        assert_eq!(decoded[0].id, None);
        assert_eq!(decoder.last_event_id(), Some("42"));
    }

    #[test]
    fn id_with_nul_is_discarded() {
        let mut decoder = SseDecoder::new();
        let decoded = decode_all(&mut decoder, "id: bad\0id\ndata: x\n\n");
        assert_eq!(decoded[0].id, None);
        assert_eq!(decoder.last_event_id(), None);
    }

    #[test]
    fn invalid_retry_is_ignored_not_fatal() {
        let mut decoder = SseDecoder::new();
        let decoded = decode_all(&mut decoder, "retry: not-a-number\ndata: x\n\n");
        assert_eq!(decoded[0].retry, None);
    }

    #[test]
    fn invalid_retry_on_encode_fails() {
        let event = ServerSentEvent {
            retry: Some(-1),
            ..Default::default()
        };
        let err = encode_event(&event, None, Separator::CrLf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidRetry(_)));
    }

    #[test]
    fn multi_line_data_splits_into_multiple_data_lines() {
        let event = ServerSentEvent {
            data: Some("line1\nline2".to_string()),
            ..Default::default()
        };
        let encoded = encode_event(&event, None, Separator::Lf).unwrap();
        assert_eq!(encoded, "data:line1\ndata:line2\n\n");
    }

    #[test]
    fn feed_lines_handles_partial_chunks() {
        let mut decoder = SseDecoder::new();
        let mut carry = String::new();
        let mut events = feed_lines(&mut decoder, &mut carry, "event: te");
        assert!(events.is_empty());
        events = feed_lines(&mut decoder, &mut carry, "xt\ndata: hi\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("text"));
    }

    #[test]
    fn feed_lines_splits_on_bare_cr() {
        let mut decoder = SseDecoder::new();
        let mut carry = String::new();
        let events = feed_lines(&mut decoder, &mut carry, "event: text\rdata: hi\r\r");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("text"));
        assert_eq!(events[0].data.as_deref(), Some("hi"));
    }

    #[test]
    fn feed_lines_holds_trailing_cr_for_possible_crlf() {
        let mut decoder = SseDecoder::new();
        let mut carry = String::new();
        let events = feed_lines(&mut decoder, &mut carry, "data: hi\r");
        assert!(events.is_empty());
        assert_eq!(carry, "data: hi\r");
        let events = feed_lines(&mut decoder, &mut carry, "\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_deref(), Some("hi"));
    }
}
