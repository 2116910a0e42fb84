//! Incremental decoder for `text/event-stream` bodies
//!
//! Only the `data` field matters to the observer: each event's `data:` lines
//! are joined with `\n` and yielded as one payload. Comment lines (`:`) and
//! other fields (`event`, `id`, `retry`) are skipped.

/// Buffers partial lines across network chunks.
///
/// Lines may end in `\n`, `\r\n` or a lone `\r`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
    /// Last chunk ended on `\r`; a leading `\n` in the next one belongs to it
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event payload it completed.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<String> {
        if self.after_cr && !chunk.is_empty() {
            if chunk[0] == b'\n' {
                chunk = &chunk[1..];
            }
            self.after_cr = false;
        }
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let terminator = self.buf[pos];
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if terminator == b'\r' {
                match self.buf.first() {
                    Some(b'\n') => {
                        self.buf.remove(0);
                    }
                    Some(_) => {}
                    None => self.after_cr = true,
                }
            }
            self.line(&String::from_utf8_lossy(&line), &mut events);
        }
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
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
        if field == "data" {
            self.data.push(value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut dec = SseDecoder::new();
        let events = dec.push(b"data: {\"message\":\"step 1\"}\n\n");
        assert_eq!(events, vec![r#"{"message":"step 1"}"#.to_string()]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: {\"mess").is_empty());
        assert!(dec.push(b"age\":\"x\"}\r\n").is_empty());
        let events = dec.push(b"\r\n");
        assert_eq!(events, vec![r#"{"message":"x"}"#.to_string()]);
    }

    #[test]
    fn test_multiline_data_and_ignored_fields() {
        let mut dec = SseDecoder::new();
        let events = dec.push(b": keepalive\nevent: log\nid: 7\ndata: one\ndata:two\n\nretry: 3000\n\n");
        assert_eq!(events, vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut dec = SseDecoder::new();
        let events = dec.push(b"data: a\n\ndata: b\n\ndata: c");
        assert_eq!(events, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(dec.push(b"\n\n"), vec!["c".to_string()]);
    }

    #[test]
    fn test_utf8_split_inside_character() {
        let mut dec = SseDecoder::new();
        let bytes = "data: 배포\n\n".as_bytes();
        let (head, tail) = bytes.split_at(8);
        assert!(dec.push(head).is_empty());
        assert_eq!(dec.push(tail), vec!["배포".to_string()]);
    }

    #[test]
    fn test_lone_carriage_return_ends_lines() {
        let mut dec = SseDecoder::new();
        let events = dec.push(b"data: a\r\rdata: b\r\r");
        assert_eq!(events, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_crlf_split_between_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: a\r").is_empty());
        assert!(dec.push(b"").is_empty());
        assert!(dec.push(b"\ndata: b\n").is_empty());
        assert_eq!(dec.push(b"\n"), vec!["a\nb".to_string()]);
    }
}
