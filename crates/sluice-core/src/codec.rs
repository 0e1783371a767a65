//! Line-delimited text framing.
//!
//! One command per line, `NAME:payload` terminated by `\n` or `\r\n`. Binary
//! payloads are base64-encoded by the caller so every frame stays text-safe.
//! [`LineDecoder`] tolerates arbitrary chunk boundaries: bytes after the last
//! terminator are kept until the rest of the line arrives.

use std::fmt;

/// Longest unterminated line kept before it is discarded (4 MiB)
pub const MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

/// One decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    /// Command name, e.g. `DOWNLOAD`
    pub name: String,
    /// Everything after the first colon; empty when absent
    pub payload: String,
}

impl Command {
    /// Build a command from its parts
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Parse one line without its terminator.
    ///
    /// Returns `None` for empty or whitespace-only lines.
    #[must_use]
    pub fn parse_line(line: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let (name, payload) = text.split_once(':').unwrap_or((text, ""));
        Some(Self::new(name.trim(), payload.trim()))
    }

    /// Encode as a terminated frame
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.name, &self.payload)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.payload)
    }
}

/// Encode `name:payload\n`.
///
/// Line breaks inside the payload would split the frame, so they are replaced
/// by spaces.
#[must_use]
pub fn encode(name: &str, payload: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(name.len() + payload.len() + 2);
    frame.extend_from_slice(name.as_bytes());
    frame.push(b':');
    frame.extend(
        payload
            .bytes()
            .map(|b| if b == b'\n' || b == b'\r' { b' ' } else { b }),
    );
    frame.push(b'\n');
    frame
}

/// Stateless form of [`LineDecoder::decode`].
///
/// Appends `new_bytes` to `buffer` and returns the complete commands together
/// with the unterminated remainder to pass to the next call.
#[must_use]
pub fn decode(buffer: &[u8], new_bytes: &[u8]) -> (Vec<Command>, Vec<u8>) {
    let mut decoder = LineDecoder::with_pending(buffer.to_vec());
    let commands = decoder.decode(new_bytes);
    (commands, decoder.into_pending())
}

/// Stream reassembler for line frames
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
    /// Leading bytes of `pending` already known to hold no terminator
    scanned: usize,
    discarding: bool,
    discarded: u64,
}

impl LineDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_pending(pending: Vec<u8>) -> Self {
        Self {
            pending,
            ..Self::default()
        }
    }

    /// Feed bytes, returning every command completed by them
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Command> {
        let mut commands = Vec::new();
        let mut input = bytes;

        // Finish skipping an oversized line before accepting new data
        if self.discarding {
            match input.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarded += pos as u64 + 1;
                    self.discarding = false;
                    input = &input[pos + 1..];
                }
                None => {
                    self.discarded += input.len() as u64;
                    return commands;
                }
            }
        }

        self.pending.extend_from_slice(input);

        let mut start = 0;
        let mut from = self.scanned;
        while let Some(pos) = self.pending[from..].iter().position(|&b| b == b'\n') {
            let end = from + pos;
            let line = &self.pending[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if let Some(command) = Command::parse_line(line) {
                commands.push(command);
            }
            start = end + 1;
            from = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();

        if self.pending.len() > MAX_LINE_LENGTH {
            self.discarded += self.pending.len() as u64;
            self.pending.clear();
            self.scanned = 0;
            self.discarding = true;
        }

        commands
    }

    /// Bytes awaiting a terminator
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Total bytes dropped from oversized lines
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn into_pending(self) -> Vec<u8> {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_encode_frame() {
        assert_eq!(encode("DOWNLOAD", "a.txt"), b"DOWNLOAD:a.txt\n");
        assert_eq!(encode("LIST_FILES", ""), b"LIST_FILES:\n");
        assert_eq!(encode("ERROR", "bad\r\nthing"), b"ERROR:bad  thing\n");
    }

    #[test]
    fn test_parse_line_splits_on_first_colon() {
        let command = Command::parse_line(b"PING:12:34").unwrap();
        assert_eq!(command.name, "PING");
        assert_eq!(command.payload, "12:34");

        let command = Command::parse_line(b"LIST_FILES").unwrap();
        assert_eq!(command.payload, "");

        assert!(Command::parse_line(b"   \t").is_none());
    }

    #[test]
    fn test_decode_complete_lines() {
        let mut decoder = LineDecoder::new();
        let commands = decoder.decode(b"LIST_FILES\nDOWNLOAD:a.txt\r\n");

        assert_eq!(names(&commands), ["LIST_FILES", "DOWNLOAD"]);
        assert_eq!(commands[1].payload, "a.txt");
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_decode_keeps_partial_tail() {
        let mut decoder = LineDecoder::new();

        let commands = decoder.decode(b"PING:1\nDOWN");
        assert_eq!(names(&commands), ["PING"]);
        assert_eq!(decoder.pending(), b"DOWN");

        let commands = decoder.decode(b"LOAD:b.bin");
        assert!(commands.is_empty());

        let commands = decoder.decode(b"\n");
        assert_eq!(commands, [Command::new("DOWNLOAD", "b.bin")]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_decode_crlf_split_across_chunks() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.decode(b"PONG:5\r").is_empty());
        assert_eq!(decoder.decode(b"\n"), [Command::new("PONG", "5")]);
    }

    #[test]
    fn test_decode_drops_blank_lines() {
        let mut decoder = LineDecoder::new();
        let commands = decoder.decode(b"\n\r\n  \nPING:1\n\n");
        assert_eq!(names(&commands), ["PING"]);
    }

    #[test]
    fn test_stateless_decode() {
        let (commands, rest) = decode(b"UPLO", b"AD:x;3\nUPLOAD_DA");
        assert_eq!(commands, [Command::new("UPLOAD", "x;3")]);
        assert_eq!(rest, b"UPLOAD_DA");

        let (commands, rest) = decode(&rest, b"TA:AAAA\n");
        assert_eq!(commands, [Command::new("UPLOAD_DATA", "AAAA")]);
        assert!(rest.is_empty());

        // A carried buffer is scanned from its start
        let (commands, rest) = decode(b"PING:1\nPI", b"NG:2\n");
        assert_eq!(names(&commands), ["PING", "PING"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_oversized_line_is_discarded() {
        let mut decoder = LineDecoder::new();
        let junk = vec![b'x'; MAX_LINE_LENGTH + 1];

        assert!(decoder.decode(&junk).is_empty());
        assert!(decoder.pending().is_empty());
        assert!(decoder.decode(b"still junk").is_empty());

        let commands = decoder.decode(b"tail\nPING:7\n");
        assert_eq!(commands, [Command::new("PING", "7")]);
        assert_eq!(
            decoder.discarded(),
            (MAX_LINE_LENGTH + 1 + "still junk".len() + "tail\n".len()) as u64
        );
    }

    #[test]
    fn test_long_line_fed_piecewise() {
        let payload = "x".repeat(64 * 1024);
        let frame = encode("ERROR", &payload);
        let mut decoder = LineDecoder::new();

        let (body, last) = frame.split_at(frame.len() - 1);
        for (i, piece) in body.chunks(7).enumerate() {
            assert!(decoder.decode(piece).is_empty());
            assert_eq!(decoder.pending().len(), body.len().min((i + 1) * 7));
        }

        let commands = decoder.decode(&[last[0], b'P', b'I']);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].payload.len(), payload.len());
        assert_eq!(decoder.pending(), b"PI");

        assert_eq!(names(&decoder.decode(b"NG:1\n")), ["PING"]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let frame = "DOWNLOAD:résumé.txt\n".as_bytes();
        let split = frame.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = LineDecoder::new();
        assert!(decoder.decode(&frame[..split]).is_empty());
        let commands = decoder.decode(&frame[split..]);
        assert_eq!(commands[0].payload, "résumé.txt");
    }

    #[test]
    fn test_command_round_trip_display() {
        let command = Command::new("ALGORITHM", "TCP_CUBIC");
        assert_eq!(command.to_string(), "ALGORITHM:TCP_CUBIC");
        assert_eq!(command.encode(), b"ALGORITHM:TCP_CUBIC\n");
    }
}
