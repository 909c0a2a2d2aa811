//! Byte-at-a-time framing of controller output.
//!
//! Two framings run over the same stream. Lines end at `\n` (`\r` is ignored). JSON
//! objects are tracked by brace depth; a completed buffer holds the whole top-level object
//! including its outer braces, even when the object shares a line with other text:
//!
//! ```text
//! ok {"sr":{"posx":1}}\n   ->  JsonComplete("{\"sr\":{\"posx\":1}}"), Line("ok {\"sr\":{\"posx\":1}}")
//! ```

use tracing::warn;

/// Longest line kept; further characters on the same line are dropped.
pub const MAX_LINE_LEN: usize = 255;
/// Longest JSON object kept; longer objects abandon JSON framing until the next `{`.
pub const MAX_JSON_LEN: usize = 4096;
/// One blank-line warning per this many blank lines.
pub const BLANK_LINE_WARN_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// A complete non-empty line, without terminator
    Line(String),
    /// A line cut short by NUL or end of stream
    LineError(String),
    /// A complete top-level JSON object
    JsonComplete(String),
    /// Running total of blank lines, emitted every [`BLANK_LINE_WARN_INTERVAL`]
    BlankLines(u64),
}

#[derive(Debug, Default)]
pub struct SerialFramer {
    line: String,
    line_overflow: bool,
    json: String,
    depth: usize,
    blank_lines: u64,
}

fn is_allowed(byte: u8) -> bool {
    byte == b'\t' || (0x20..=0x7E).contains(&byte)
}

impl SerialFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unmatched `{` count of the JSON object being framed.
    pub fn json_depth(&self) -> usize {
        self.depth
    }

    pub fn blank_lines(&self) -> u64 {
        self.blank_lines
    }

    pub fn push_byte(&mut self, byte: u8) -> Option<FramerEvent> {
        match byte {
            0 => self.flush_error(),
            b'\n' => self.end_line(),
            b'\r' => None,
            b if is_allowed(b) => {
                self.push_line(b as char);
                self.push_json(b as char)
            }
            // Line noise, e.g. a baud rate mismatch
            _ => None,
        }
    }

    /// End of stream: flushes any partial line as an error and resets.
    pub fn finish(&mut self) -> Option<FramerEvent> {
        let event = self.flush_error();
        self.reset_json();
        event
    }

    fn flush_error(&mut self) -> Option<FramerEvent> {
        self.line_overflow = false;
        if self.line.is_empty() {
            return None;
        }
        Some(FramerEvent::LineError(std::mem::take(&mut self.line)))
    }

    fn end_line(&mut self) -> Option<FramerEvent> {
        self.line_overflow = false;
        if !self.line.is_empty() {
            return Some(FramerEvent::Line(std::mem::take(&mut self.line)));
        }
        self.blank_lines += 1;
        if self.blank_lines % BLANK_LINE_WARN_INTERVAL == 0 {
            return Some(FramerEvent::BlankLines(self.blank_lines));
        }
        None
    }

    fn push_line(&mut self, c: char) {
        if self.line.len() < MAX_LINE_LEN {
            self.line.push(c);
        } else if !self.line_overflow {
            self.line_overflow = true;
            warn!(
                "[DCE] Line exceeds {} bytes, truncating: {}...",
                MAX_LINE_LEN,
                &self.line[..32]
            );
        }
    }

    fn push_json(&mut self, c: char) -> Option<FramerEvent> {
        match c {
            '{' => {
                if self.depth == 0 {
                    self.json.clear();
                }
                self.depth += 1;
            }
            '}' if self.depth > 0 => {
                self.json.push(c);
                self.depth -= 1;
                if self.depth == 0 {
                    return Some(FramerEvent::JsonComplete(std::mem::take(&mut self.json)));
                }
                return None;
            }
            _ if self.depth == 0 => return None,
            _ => {}
        }
        if self.json.len() >= MAX_JSON_LEN {
            warn!("[DCE] JSON exceeds {} bytes, dropping object", MAX_JSON_LEN);
            self.reset_json();
            return None;
        }
        self.json.push(c);
        None
    }

    fn reset_json(&mut self) {
        self.json.clear();
        self.depth = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(framer: &mut SerialFramer, bytes: &[u8]) -> Vec<FramerEvent> {
        bytes.iter().filter_map(|&b| framer.push_byte(b)).collect()
    }

    #[test]
    fn test_line_with_embedded_json() {
        let mut framer = SerialFramer::new();
        let events = feed(&mut framer, b"ok {\"sr\":{\"posx\":1}}\n");
        assert_eq!(
            events,
            vec![
                FramerEvent::JsonComplete("{\"sr\":{\"posx\":1}}".to_string()),
                FramerEvent::Line("ok {\"sr\":{\"posx\":1}}".to_string()),
            ]
        );
        assert_eq!(framer.json_depth(), 0);
    }

    #[test]
    fn test_nested_braces_close_at_outermost() {
        let mut framer = SerialFramer::new();
        let input = b"{\"a\":{\"b\":1}}";
        let (last, body) = input.split_last().unwrap();
        assert!(feed(&mut framer, body).is_empty());
        assert_eq!(framer.json_depth(), 1);
        assert_eq!(
            framer.push_byte(*last),
            Some(FramerEvent::JsonComplete("{\"a\":{\"b\":1}}".to_string()))
        );
        assert_eq!(framer.json_depth(), 0);
    }

    #[test]
    fn test_carriage_return_and_noise_are_dropped() {
        let mut framer = SerialFramer::new();
        let events = feed(&mut framer, b"G0\xFF X1\x07\r\n");
        assert_eq!(events, vec![FramerEvent::Line("G0 X1".to_string())]);
    }

    #[test]
    fn test_nul_flushes_line_as_error() {
        let mut framer = SerialFramer::new();
        let events = feed(&mut framer, b"garb\0ok\n");
        assert_eq!(
            events,
            vec![
                FramerEvent::LineError("garb".to_string()),
                FramerEvent::Line("ok".to_string()),
            ]
        );
    }

    #[test]
    fn test_finish_flushes_partial_line() {
        let mut framer = SerialFramer::new();
        feed(&mut framer, b"{\"partial\":");
        assert_eq!(
            framer.finish(),
            Some(FramerEvent::LineError("{\"partial\":".to_string()))
        );
        assert_eq!(framer.json_depth(), 0);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_blank_lines_rate_limited() {
        let mut framer = SerialFramer::new();
        let events = feed(&mut framer, &[b'\n'; 1000]);
        assert_eq!(events, vec![FramerEvent::BlankLines(1000)]);
        assert!(feed(&mut framer, &[b'\n'; 999]).is_empty());
        assert_eq!(framer.push_byte(b'\n'), Some(FramerEvent::BlankLines(2000)));
    }

    #[test]
    fn test_long_line_truncated() {
        let mut framer = SerialFramer::new();
        let mut input = vec![b'x'; MAX_LINE_LEN + 50];
        input.push(b'\n');
        let events = feed(&mut framer, &input);
        assert_eq!(events, vec![FramerEvent::Line("x".repeat(MAX_LINE_LEN))]);
    }

    #[test]
    fn test_oversized_json_is_dropped() {
        let mut framer = SerialFramer::new();
        let mut input = b"{\"blob\":\"".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_JSON_LEN));
        input.extend_from_slice(b"\"}{\"ok\":1}");
        let events = feed(&mut framer, &input);
        assert_eq!(events, vec![FramerEvent::JsonComplete("{\"ok\":1}".to_string())]);
    }
}
