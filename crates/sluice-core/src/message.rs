//! Typed protocol vocabulary.
//!
//! [`Message`] is the typed view of a decoded [`Command`]. Conversion in both
//! directions is lossless for every well-formed frame; malformed frames fail
//! with a [`ProtocolError`] and are dropped by the session.

use crate::codec::{self, Command};
use crate::congestion::Algorithm;
use crate::error::ProtocolError;
use serde::Serialize;
use std::fmt;

const LIST_FILES: &str = "LIST_FILES";
const FILE_LIST: &str = "FILE_LIST";
const DOWNLOAD: &str = "DOWNLOAD";
const DOWNLOAD_START: &str = "DOWNLOAD_START";
const FILE_DATA: &str = "FILE_DATA";
const DOWNLOAD_COMPLETE: &str = "DOWNLOAD_COMPLETE";
const UPLOAD: &str = "UPLOAD";
const UPLOAD_READY: &str = "UPLOAD_READY";
const UPLOAD_DATA: &str = "UPLOAD_DATA";
const UPLOAD_COMPLETE: &str = "UPLOAD_COMPLETE";
const ALGORITHM: &str = "ALGORITHM";
const PING: &str = "PING";
const PONG: &str = "PONG";
const ACK: &str = "ACK";
const NACK: &str = "NACK";
const ERROR: &str = "ERROR";

/// Render a byte count the way file listings show it.
///
/// Below 1024 bytes the exact count is printed, above that two decimals of
/// KB, MB or GB.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    #[allow(clippy::cast_precision_loss)]
    let size = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if size < MB {
        format!("{:.2} KB", size / KB)
    } else if size < GB {
        format!("{:.2} MB", size / MB)
    } else {
        format!("{:.2} GB", size / GB)
    }
}

/// One entry of a `FILE_LIST` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    /// File name
    pub name: String,
    /// Human-readable size as sent by the server, e.g. `2.00 KB`
    pub size: String,
}

impl RemoteFile {
    /// Entry for a local file of `bytes` length
    pub fn new(name: impl Into<String>, bytes: u64) -> Self {
        Self {
            name: name.into(),
            size: format_size(bytes),
        }
    }

    /// Parse a `name (size);name (size);` payload.
    ///
    /// Entries without a size keep an empty `size`.
    #[must_use]
    pub fn parse_list(payload: &str) -> Vec<RemoteFile> {
        payload
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.rsplit_once(" (") {
                Some((name, size)) => RemoteFile {
                    name: name.trim().to_string(),
                    size: size.trim_end_matches(')').to_string(),
                },
                None => RemoteFile {
                    name: entry.to_string(),
                    size: String::new(),
                },
            })
            .collect()
    }

    /// Render entries as a `FILE_LIST` payload, each terminated by `;`
    #[must_use]
    pub fn format_list(files: &[RemoteFile]) -> String {
        files
            .iter()
            .map(|f| format!("{} ({});", f.name, f.size))
            .collect()
    }
}

/// A protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Request the server's file listing
    ListFiles,
    /// Listing result
    FileList(Vec<RemoteFile>),
    /// Request a file by name
    Download(String),
    /// The server starts sending `filename` of `size` bytes
    DownloadStart {
        /// File being sent
        filename: String,
        /// Total size in bytes
        size: u64,
    },
    /// One base64 chunk of the file being downloaded
    FileData(String),
    /// End of a download
    DownloadComplete(String),
    /// Announce an upload of `filename` with `size` bytes
    Upload {
        /// File being uploaded
        filename: String,
        /// Total size in bytes
        size: u64,
    },
    /// The receiver accepted the upload
    UploadReady(String),
    /// One base64 chunk of the file being uploaded
    UploadData(String),
    /// The receiver stored the complete upload
    UploadComplete(String),
    /// Switch congestion algorithm
    Algorithm(Algorithm),
    /// Round-trip check carrying a millisecond timestamp
    Ping(u64),
    /// Probe answer echoing the timestamp
    Pong(u64),
    /// Cumulative count of data chunks received
    Ack(u64),
    /// A data chunk was (simulated as) lost
    Nack(u64),
    /// Failure notice
    Error(String),
}

impl Message {
    /// Wire name of the command
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Message::ListFiles => LIST_FILES,
            Message::FileList(_) => FILE_LIST,
            Message::Download(_) => DOWNLOAD,
            Message::DownloadStart { .. } => DOWNLOAD_START,
            Message::FileData(_) => FILE_DATA,
            Message::DownloadComplete(_) => DOWNLOAD_COMPLETE,
            Message::Upload { .. } => UPLOAD,
            Message::UploadReady(_) => UPLOAD_READY,
            Message::UploadData(_) => UPLOAD_DATA,
            Message::UploadComplete(_) => UPLOAD_COMPLETE,
            Message::Algorithm(_) => ALGORITHM,
            Message::Ping(_) => PING,
            Message::Pong(_) => PONG,
            Message::Ack(_) => ACK,
            Message::Nack(_) => NACK,
            Message::Error(_) => ERROR,
        }
    }

    /// Payload text of the command
    #[must_use]
    pub fn payload(&self) -> String {
        match self {
            Message::ListFiles => String::new(),
            Message::FileList(files) => RemoteFile::format_list(files),
            Message::DownloadStart { filename, size } | Message::Upload { filename, size } => {
                format!("{filename};{size}")
            }
            Message::Download(text)
            | Message::FileData(text)
            | Message::DownloadComplete(text)
            | Message::UploadReady(text)
            | Message::UploadData(text)
            | Message::UploadComplete(text)
            | Message::Error(text) => text.clone(),
            Message::Algorithm(algorithm) => algorithm.wire_name().to_string(),
            Message::Ping(n) | Message::Pong(n) | Message::Ack(n) | Message::Nack(n) => {
                n.to_string()
            }
        }
    }

    /// Encode as a terminated frame
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        codec::encode(self.name(), &self.payload())
    }

    /// True for the two chunk-carrying commands
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Message::FileData(_) | Message::UploadData(_))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Chunk payloads are noise in logs
        if self.is_data() {
            write!(f, "{}:<{} bytes>", self.name(), self.payload().len())
        } else {
            write!(f, "{}:{}", self.name(), self.payload())
        }
    }
}

fn required(command: &'static str, field: &'static str, value: &str) -> Result<String, ProtocolError> {
    if value.is_empty() {
        Err(ProtocolError::MissingField { command, field })
    } else {
        Ok(value.to_string())
    }
}

fn number(command: &'static str, value: &str) -> Result<u64, ProtocolError> {
    value.trim().parse().map_err(|_| ProtocolError::InvalidNumber {
        command,
        value: value.to_string(),
    })
}

fn name_and_size(command: &'static str, payload: &str) -> Result<(String, u64), ProtocolError> {
    let (name, size) = payload
        .rsplit_once(';')
        .ok_or(ProtocolError::MissingField { command, field: "size" })?;
    Ok((required(command, "filename", name.trim())?, number(command, size)?))
}

impl TryFrom<Command> for Message {
    type Error = ProtocolError;

    fn try_from(command: Command) -> Result<Self, ProtocolError> {
        let payload = command.payload;
        let message = match command.name.as_str() {
            LIST_FILES => Message::ListFiles,
            FILE_LIST => Message::FileList(RemoteFile::parse_list(&payload)),
            DOWNLOAD => Message::Download(required(DOWNLOAD, "filename", &payload)?),
            DOWNLOAD_START => {
                let (filename, size) = name_and_size(DOWNLOAD_START, &payload)?;
                Message::DownloadStart { filename, size }
            }
            FILE_DATA => Message::FileData(payload),
            DOWNLOAD_COMPLETE => Message::DownloadComplete(payload),
            UPLOAD => {
                let (filename, size) = name_and_size(UPLOAD, &payload)?;
                Message::Upload { filename, size }
            }
            UPLOAD_READY => Message::UploadReady(payload),
            UPLOAD_DATA => Message::UploadData(payload),
            UPLOAD_COMPLETE => Message::UploadComplete(payload),
            ALGORITHM => Message::Algorithm(
                payload
                    .parse()
                    .map_err(|_| ProtocolError::UnknownAlgorithm(payload.clone()))?,
            ),
            PING => Message::Ping(number(PING, &payload)?),
            PONG => Message::Pong(number(PONG, &payload)?),
            ACK => Message::Ack(number(ACK, &payload)?),
            NACK => Message::Nack(number(NACK, &payload)?),
            ERROR => Message::Error(payload),
            _ => return Err(ProtocolError::UnknownCommand(command.name)),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str, payload: &str) -> Result<Message, ProtocolError> {
        Message::try_from(Command::new(name, payload))
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 bytes");
        assert_eq!(format_size(10), "10 bytes");
        assert_eq!(format_size(1023), "1023 bytes");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_file_list_payload() {
        let files = vec![RemoteFile::new("a.txt", 10), RemoteFile::new("b.bin", 2048)];
        let message = Message::FileList(files.clone());
        assert_eq!(message.encode(), b"FILE_LIST:a.txt (10 bytes);b.bin (2.00 KB);\n");

        assert_eq!(RemoteFile::parse_list("a.txt (10 bytes);b.bin (2.00 KB);"), files);
        assert!(RemoteFile::parse_list("").is_empty());
    }

    #[test]
    fn test_file_list_name_with_parenthesis() {
        let files = RemoteFile::parse_list("copy (1).txt (3 bytes);plain;");
        assert_eq!(files[0].name, "copy (1).txt");
        assert_eq!(files[0].size, "3 bytes");
        assert_eq!(files[1].name, "plain");
        assert_eq!(files[1].size, "");
    }

    #[test]
    fn test_parse_transfer_commands() {
        assert_eq!(
            parse("UPLOAD", "report.pdf;4096").unwrap(),
            Message::Upload {
                filename: "report.pdf".into(),
                size: 4096
            }
        );
        assert_eq!(
            parse("DOWNLOAD_START", "a;b.txt;12").unwrap(),
            Message::DownloadStart {
                filename: "a;b.txt".into(),
                size: 12
            }
        );
        assert_eq!(
            parse("DOWNLOAD", "a.txt").unwrap(),
            Message::Download("a.txt".into())
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse("UPLOAD", "report.pdf"),
            Err(ProtocolError::MissingField {
                command: "UPLOAD",
                field: "size"
            })
        );
        assert!(matches!(
            parse("UPLOAD", "report.pdf;lots"),
            Err(ProtocolError::InvalidNumber { command: "UPLOAD", .. })
        ));
        assert!(matches!(
            parse("DOWNLOAD", ""),
            Err(ProtocolError::MissingField { field: "filename", .. })
        ));
        assert_eq!(
            parse("HELLO", "x"),
            Err(ProtocolError::UnknownCommand("HELLO".into()))
        );
        assert_eq!(
            parse("ALGORITHM", "BBR"),
            Err(ProtocolError::UnknownAlgorithm("BBR".into()))
        );
    }

    #[test]
    fn test_parse_control_commands() {
        assert_eq!(parse("LIST_FILES", "").unwrap(), Message::ListFiles);
        assert_eq!(parse("PING", "1700000000000").unwrap(), Message::Ping(1_700_000_000_000));
        assert_eq!(parse("ACK", "3").unwrap(), Message::Ack(3));
        assert_eq!(parse("NACK", "4").unwrap(), Message::Nack(4));
        assert_eq!(
            parse("ALGORITHM", "TCP_VEGAS").unwrap(),
            Message::Algorithm(Algorithm::Vegas)
        );
        assert_eq!(
            parse("ERROR", "File not found: x").unwrap(),
            Message::Error("File not found: x".into())
        );
    }

    #[test]
    fn test_encode_matches_wire_format() {
        assert_eq!(Message::ListFiles.encode(), b"LIST_FILES:\n");
        assert_eq!(
            Message::UploadReady("report.pdf".into()).encode(),
            b"UPLOAD_READY:report.pdf\n"
        );
        assert_eq!(
            Message::Algorithm(Algorithm::Cubic).encode(),
            b"ALGORITHM:TCP_CUBIC\n"
        );
        assert_eq!(Message::Pong(42).encode(), b"PONG:42\n");
    }

    #[test]
    fn test_display_hides_chunk_payload() {
        let message = Message::FileData("QUJDRA==".into());
        assert_eq!(message.to_string(), "FILE_DATA:<8 bytes>");
        assert!(message.is_data());
        assert_eq!(Message::Ack(1).to_string(), "ACK:1");
    }
}
