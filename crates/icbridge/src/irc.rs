//! IRC line protocol decoding.
//!
//! The wire is UTF-8 text split into CRLF-terminated lines. Each line is at
//! most a prefix (starting with `:`), a command, and a parameter list where
//! a parameter starting with `:` swallows the rest of the line.
//!
//! [`Decoder`] buffers partial lines across socket reads; feeding the same
//! byte sequence in any chunking yields the same messages.

use bytes::BytesMut;

use crate::error::{Error, Result};

/// Upper bound on one buffered line. A peer that never sends CRLF cannot
/// grow the buffer past this.
const MAX_LINE: usize = 8192;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message prefix, including the leading colon, if present.
    pub prefix: Option<String>,
    /// Command name or numeric.
    pub command: String,
    /// Positional parameters; a trailing `:`-parameter keeps embedded spaces.
    pub params: Vec<String>,
}

impl Message {
    /// Parameter at `index`, or the empty string.
    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or("")
    }
}

/// Incremental CRLF line decoder.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and collect every message they complete.
    ///
    /// Empty lines are dropped. Lines that are not valid UTF-8 are dropped
    /// and logged; an overlong unterminated line is a framing error.
    pub fn write(&mut self, data: &[u8], out: &mut Vec<Message>) -> Result<()> {
        self.buf.extend_from_slice(data);

        while let Some(pos) = find_crlf(&self.buf) {
            let line = self.buf.split_to(pos + 2);
            match std::str::from_utf8(&line[..pos]) {
                Ok(text) => {
                    if let Some(msg) = parse_line(text) {
                        out.push(msg);
                    }
                }
                Err(_) => tracing::warn!("dropping line with invalid UTF-8"),
            }
        }

        if self.buf.len() > MAX_LINE {
            return Err(Error::FrameTooLarge {
                limit: MAX_LINE,
                actual: self.buf.len(),
            });
        }

        Ok(())
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse one line into prefix, command and parameters.
fn parse_line(line: &str) -> Option<Message> {
    let mut rest = line.trim_start();
    if rest.is_empty() {
        return None;
    }

    let mut prefix = None;
    if rest.starts_with(':') {
        match rest.find(' ') {
            Some(offset) => {
                prefix = Some(rest[..offset].to_string());
                rest = rest[offset..].trim_start();
            }
            None => {
                prefix = Some(rest.to_string());
                rest = "";
            }
        }
    }

    let (command, tail) = match rest.find(' ') {
        Some(offset) => (&rest[..offset], rest[offset..].trim_start()),
        None => (rest, ""),
    };

    if command.is_empty() {
        return None;
    }

    Some(Message {
        prefix,
        command: command.to_string(),
        params: split_params(tail),
    })
}

/// Split the parameter area: space-delimited tokens, except a token that
/// starts with `:` consumes the rest of the line.
fn split_params(mut rest: &str) -> Vec<String> {
    let mut params = Vec::new();

    while !rest.is_empty() {
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing.to_string());
            break;
        }
        match rest.find(' ') {
            Some(offset) => {
                params.push(rest[..offset].to_string());
                rest = rest[offset..].trim_start();
            }
            None => {
                params.push(rest.to_string());
                break;
            }
        }
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &[u8]) -> Vec<Message> {
        let mut decoder = Decoder::new();
        let mut out = Vec::new();
        decoder.write(data, &mut out).unwrap();
        out
    }

    #[test]
    fn parse_full_line() {
        let msgs = decode(b":irc.example.org 332 alice #chat :the topic\r\n");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].prefix.as_deref(), Some(":irc.example.org"));
        assert_eq!(msgs[0].command, "332");
        assert_eq!(msgs[0].params, ["alice", "#chat", "the topic"]);
    }

    #[test]
    fn parse_without_prefix() {
        let msgs = decode(b"PRIVMSG #chat :hello there\r\n");
        assert_eq!(msgs[0].prefix, None);
        assert_eq!(msgs[0].command, "PRIVMSG");
        assert_eq!(msgs[0].params, ["#chat", "hello there"]);
    }

    #[test]
    fn parse_command_only() {
        let msgs = decode(b"QUIT\r\n");
        assert_eq!(msgs[0].command, "QUIT");
        assert!(msgs[0].params.is_empty());
    }

    #[test]
    fn leading_whitespace_is_stripped() {
        let msgs = decode(b"   NICK alice\r\n");
        assert_eq!(msgs[0].command, "NICK");
        assert_eq!(msgs[0].params, ["alice"]);
    }

    #[test]
    fn empty_lines_are_dropped() {
        let msgs = decode(b"\r\nNICK alice\r\n\r\n");
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn prefix_only_line_is_dropped() {
        assert!(decode(b":lonely.prefix\r\n").is_empty());
    }

    #[test]
    fn invalid_utf8_is_dropped_soft() {
        let msgs = decode(b"NICK \xff\xfe\r\nUSER alice 0 * :a\r\n");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].command, "USER");
    }

    #[test]
    fn partial_lines_buffer_across_writes() {
        let mut decoder = Decoder::new();
        let mut out = Vec::new();
        decoder.write(b"NICK al", &mut out).unwrap();
        assert!(out.is_empty());
        decoder.write(b"ice\r\nUSER a", &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].params, ["alice"]);
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let data = b":a!b@c PRIVMSG #chat :one two\r\nPING :x\r\nMODE #chat +b\r\n";
        let whole = decode(data);

        for chunk in [1usize, 2, 3, 7] {
            let mut decoder = Decoder::new();
            let mut out = Vec::new();
            for piece in data.chunks(chunk) {
                decoder.write(piece, &mut out).unwrap();
            }
            assert_eq!(out, whole, "chunk size {chunk}");
        }
    }

    #[test]
    fn weird_spacing_collapses() {
        let msgs = decode(b":x     command    a1  a2    :  trailing  text\r\n");
        assert_eq!(msgs[0].command, "command");
        assert_eq!(msgs[0].params, ["a1", "a2", "  trailing  text"]);
    }

    #[test]
    fn unterminated_line_hits_the_cap() {
        let mut decoder = Decoder::new();
        let mut out = Vec::new();
        let data = vec![b'a'; 9000];
        assert!(matches!(
            decoder.write(&data, &mut out),
            Err(Error::FrameTooLarge { .. })
        ));
    }
}
