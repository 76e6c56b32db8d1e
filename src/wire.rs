//! C1: the line-oriented AMI framer.
//!
//! Frames a byte stream into [`Packet`]s (ordered `Key: Value` lines
//! terminated by a blank line), the one-off greeting banner, and the
//! raw `Follows` command body. Accepts bare `\n` as well as `\r\n` line
//! endings on read (some Asterisk builds and most test fixtures only
//! emit `\n`); always emits `\r\n` on the encode side (`action.rs`).

use crate::error::AmiError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// A single cap on a wire line, bounding memory if a peer never sends a
/// line terminator.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// The raw body terminator for a `Response: Follows` action response.
pub const FOLLOWS_TERMINATOR: &str = "--END COMMAND--";

/// An ordered, duplicate-preserving set of `Key: Value` lines.
///
/// Keys are lowercased on insertion for case-insensitive lookup; values
/// are kept exactly as received (trimmed of the line terminator and a
/// single leading space after the colon, nothing else). `push` never
/// merges a repeated key into an existing entry — a packet with three
/// `Variable:` lines keeps all three (`spec.md` §8 scenario 6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    entries: Vec<(String, String)>,
}

impl Packet {
    pub fn new() -> Self {
        Packet {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into().to_ascii_lowercase(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first value for `key` (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key`, in arrival order.
    pub fn get_all<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One event surfaced by the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// The one-off banner line sent immediately on connect, e.g.
    /// `"Asterisk Call Manager/9.0.0"`.
    Greeting(String),
    /// A complete, blank-line-terminated packet.
    Packet(Packet),
}

/// Wraps any buffered async reader and yields [`FrameEvent`]s.
///
/// The very first successful read is always treated as the greeting
/// line, matching the AMI handshake (`spec.md` §4.1/§4.5 step 1) — the
/// server sends the banner unprompted before any packet exchange.
pub struct Framer<R> {
    reader: R,
    greeted: bool,
}

impl<R: AsyncBufRead + Unpin> Framer<R> {
    pub fn new(reader: R) -> Self {
        Framer {
            reader,
            greeted: false,
        }
    }

    async fn read_line_trimmed(&mut self) -> Result<Option<String>, AmiError> {
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(AmiError::Io)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.len() > MAX_LINE_BYTES {
            return Err(AmiError::MalformedPacket(format!(
                "line exceeded {MAX_LINE_BYTES} bytes"
            )));
        }
        while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
            buf.pop();
        }
        let line = String::from_utf8(buf)
            .map_err(|e| AmiError::MalformedPacket(format!("non-utf8 line: {e}")))?;
        Ok(Some(line))
    }

    /// Reads the next top-level event: the greeting on the first call,
    /// a complete [`Packet`] on every call after. Returns
    /// `Err(AmiError::ConnectionClosed)` wrapped as `Ok(None)`-free — a
    /// clean EOF surfaces as [`AmiError::ConnectionClosed`] since the
    /// caller always expects more frames until it chooses to stop
    /// reading.
    pub async fn next_event(&mut self) -> Result<FrameEvent, AmiError> {
        if !self.greeted {
            self.greeted = true;
            let line = self
                .read_line_trimmed()
                .await?
                .ok_or(AmiError::ConnectionClosed)?;
            return Ok(FrameEvent::Greeting(line));
        }

        let mut packet = Packet::new();
        loop {
            let line = self
                .read_line_trimmed()
                .await?
                .ok_or(AmiError::ConnectionClosed)?;
            if line.is_empty() {
                if packet.is_empty() {
                    // a stray blank line between packets, keep reading
                    continue;
                }
                return Ok(FrameEvent::Packet(packet));
            }
            match line.split_once(':') {
                Some((key, value)) => {
                    let value = value.strip_prefix(' ').unwrap_or(value);
                    packet.push(key, value);
                }
                None => {
                    return Err(AmiError::MalformedPacket(format!(
                        "line without a colon: {line:?}"
                    )));
                }
            }
        }
    }

    /// Consumes the raw body of a `Response: Follows` action response,
    /// up to and excluding the `--END COMMAND--` terminator line. The
    /// terminator line itself, and the blank line that follows it, are
    /// both consumed but not returned.
    pub async fn read_follows_body(&mut self) -> Result<String, AmiError> {
        let mut lines = Vec::new();
        loop {
            let line = self
                .read_line_trimmed()
                .await?
                .ok_or(AmiError::ConnectionClosed)?;
            if line == FOLLOWS_TERMINATOR {
                break;
            }
            lines.push(line);
        }
        // the server emits a blank line after the terminator, closing
        // the packet the same way a normal response does.
        let _ = self.read_line_trimmed().await?;
        if lines.is_empty() {
            Ok(String::new())
        } else {
            // trailing '\n' after the last line, matching `spec.md` §8
            // scenario 5's literal expected output.
            Ok(lines.join("\n") + "\n")
        }
    }
}
