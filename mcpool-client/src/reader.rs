//! # ASCII Response Reader
//!
//! Purpose: Decode server responses from a byte stream: status lines and
//! `VALUE` blocks whose payload is length-prefixed raw bytes.
//!
//! ## Design Principles
//! 1. **Binary-Safe**: Lines are framed by `\n`, but value payloads are read
//!    by exact length and never scanned for terminators.
//! 2. **Buffer Reuse**: One 4 KiB buffer per connection, refilled on demand.
//! 3. **Bounded Waits**: Every refill is wrapped in the receive timeout.
//! 4. **Fail Fast**: Error verbs and malformed headers surface immediately
//!    as protocol errors carrying the offending line.

use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use mcpool_common::Item;

use crate::error::{ClientError, ClientResult, ProtocolError};
use crate::timeout::with_timeout;

/// Size of the refill buffer.
pub const READ_BUFFER_SIZE: usize = 4 << 10;

/// Verbs the server uses to reject a request.
const ERROR_VERBS: [&str; 3] = ["ERROR", "CLIENT_ERROR", "SERVER_ERROR"];

/// One response line with its space-separated tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    line: String,
    parts: Vec<String>,
}

impl ResponseLine {
    /// Splits a decoded line into tokens.
    pub fn new(line: impl Into<String>) -> Self {
        let line = line.into();
        let parts = line.split_whitespace().map(str::to_string).collect();
        ResponseLine { line, parts }
    }

    /// Raw line text without the terminator.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Whitespace-split tokens.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// First token, or `""` for a blank line.
    pub fn first(&self) -> &str {
        self.parts.first().map(String::as_str).unwrap_or("")
    }

    /// Rejects blank lines and server error verbs.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let first = match self.parts.first() {
            Some(first) => first,
            None => return Err(ProtocolError::EmptyLine),
        };
        if ERROR_VERBS.iter().any(|verb| first.eq_ignore_ascii_case(verb)) {
            return Err(ProtocolError::ErrorResponse {
                line: self.line.clone(),
            });
        }
        Ok(())
    }
}

/// Buffered reader over the receive half of a connection.
pub struct ResponseReader<R> {
    stream: R,
    buffer: BytesMut,
    receive_timeout: Option<Duration>,
}

impl<R> ResponseReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wraps `stream` with no receive timeout.
    pub fn new(stream: R) -> Self {
        Self::with_receive_timeout(stream, None)
    }

    /// Wraps `stream`; every refill fails with a timeout after `timeout`.
    pub fn with_receive_timeout(stream: R, timeout: Option<Duration>) -> Self {
        ResponseReader {
            stream,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            receive_timeout: timeout,
        }
    }

    /// Reads one validated line.
    pub async fn read_line(&mut self) -> ClientResult<ResponseLine> {
        self.read_line_checked(true).await
    }

    /// Reads one line; when `validate` is set, error verbs become errors.
    pub async fn read_line_checked(&mut self, validate: bool) -> ClientResult<ResponseLine> {
        let mut raw = Vec::new();
        loop {
            if self.buffer.is_empty() && !self.fill().await? {
                return Err(ClientError::EndOfStream);
            }
            match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    raw.extend(self.buffer[..pos].iter().copied().filter(|&b| b != b'\r'));
                    self.buffer.advance(pos + 1);
                    break;
                }
                None => {
                    raw.extend(self.buffer.iter().copied().filter(|&b| b != b'\r'));
                    self.buffer.clear();
                }
            }
        }

        let text = String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        let line = ResponseLine::new(text);
        if validate {
            line.validate()?;
        }
        Ok(line)
    }

    /// Reads one item of a retrieval response, or `None` at `END`.
    pub async fn read_item(&mut self) -> ClientResult<Option<Item>> {
        let line = self.read_line().await?;
        if line.first().eq_ignore_ascii_case("END") {
            return Ok(None);
        }
        let (key, flags, len, cas) = parse_value_header(&line)?;

        let data = self.read_exact(len).await?;
        let terminator = self.read_exact(2).await?;
        if terminator.as_ref() != b"\r\n" {
            return Err(ProtocolError::MissingTerminator { key }.into());
        }
        Ok(Some(Item::new(key, flags, cas, data)))
    }

    /// Copies exactly `len` raw bytes, refilling as needed.
    ///
    /// `len` comes off the wire, so the upfront reservation is capped and the
    /// buffer grows only as bytes actually arrive.
    async fn read_exact(&mut self, len: usize) -> ClientResult<Bytes> {
        let mut data = BytesMut::with_capacity(len.min(READ_BUFFER_SIZE));
        while data.len() < len {
            if self.buffer.is_empty() && !self.fill().await? {
                return Err(ClientError::EndOfStream);
            }
            let take = (len - data.len()).min(self.buffer.len());
            data.extend_from_slice(&self.buffer[..take]);
            self.buffer.advance(take);
        }
        Ok(data.freeze())
    }

    /// Refills the empty buffer. Returns false when the peer closed.
    async fn fill(&mut self) -> ClientResult<bool> {
        debug_assert!(self.buffer.is_empty());
        self.buffer.clear();
        self.buffer.reserve(READ_BUFFER_SIZE);

        let stream = &mut self.stream;
        let buffer = &mut self.buffer;
        let read = with_timeout("receive", self.receive_timeout, async move {
            Ok::<_, ClientError>(stream.read_buf(buffer).await?)
        })
        .await?;
        Ok(read > 0)
    }
}

fn parse_value_header(line: &ResponseLine) -> ClientResult<(String, u32, usize, Option<u64>)> {
    let malformed = || ProtocolError::MalformedItem {
        line: line.line().to_string(),
    };
    let parts = line.parts();
    if !parts[0].eq_ignore_ascii_case("VALUE") || parts.len() < 4 || parts.len() > 5 {
        return Err(malformed().into());
    }
    let flags = parts[2].parse::<u32>().map_err(|_| malformed())?;
    let len = parts[3].parse::<usize>().map_err(|_| malformed())?;
    let cas = match parts.get(4) {
        Some(token) => Some(token.parse::<u64>().map_err(|_| malformed())?),
        None => None,
    };
    Ok((parts[1].clone(), flags, len, cas))
}
