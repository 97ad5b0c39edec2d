use crate::support::{ErrorType, NetError, NetResult};
use bytes::{Buf, BytesMut};
use std::io;

/// Bytes pulled off the socket per read call.
pub const RECV_CHUNK: usize = 4096;
pub const READ_BUF_SIZE: usize = 64 * 1024;
pub const WRITE_BUF_SIZE: usize = 64 * 1024;

pub const COMMAND_PREFIX: char = '/';

/// A decoded inbound line: either a command invocation or chat text to be
/// forwarded to the peer of the sender's active chat.
#[derive(Debug, Eq, PartialEq)]
pub enum Payload {
    Command { name: String, args: Vec<String> },
    Chat(String),
}

/// Classifies a single trimmed line. Command lines lose every leading `/`,
/// then split on whitespace; the first token names the command.
pub fn classify(line: &str) -> Payload {
    if line.starts_with(COMMAND_PREFIX) {
        let mut tokens = line.trim_start_matches(COMMAND_PREFIX).split_whitespace();
        let name = tokens.next().unwrap_or("").to_string();
        let args = tokens.map(str::to_string).collect();
        Payload::Command { name, args }
    } else {
        Payload::Chat(line.to_string())
    }
}

/// Ingress half of a connection: accumulates raw bytes and splits off
/// newline-terminated lines. Lines are decoded as UTF-8 with replacement and
/// trimmed of surrounding whitespace.
pub struct LineReader {
    buf: BytesMut,
    capacity: usize,
}

impl LineReader {
    #[inline]
    pub fn new(capacity: usize) -> LineReader {
        LineReader {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Reads from the source until it would block, in `RECV_CHUNK` pieces.
    ///
    /// Returns the byte count on `WouldBlock`, `Closed` once the peer has
    /// shut down and no fresh data arrived in this call, and `Overflow` when
    /// the buffer fills up without containing a single complete line.
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> NetResult<usize> {
        let mut total = 0;
        let mut chunk = [0u8; RECV_CHUNK];

        loop {
            if self.buf.len() >= self.capacity {
                if !self.has_line() {
                    return Err(NetError::Fatal(ErrorType::Overflow));
                }
                // Let the session drain complete lines before reading on.
                return Ok(total);
            }

            match reader.read(&mut chunk) {
                Ok(0) => {
                    if total > 0 {
                        return Ok(total);
                    }
                    return Err(NetError::Fatal(ErrorType::Closed));
                }
                Ok(count) => {
                    self.buf.extend_from_slice(&chunk[..count]);
                    total += count;
                }
                Err(err) => match NetError::from(err) {
                    NetError::Wait => return Ok(total),
                    fatal => return Err(fatal),
                },
            }
        }
    }

    /// Splits off the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&byte| byte == b'\n')?;
        let line = self.buf.split_to(end + 1);

        Some(String::from_utf8_lossy(&line[..end]).trim().to_string())
    }

    #[inline]
    pub fn has_line(&self) -> bool {
        self.buf.iter().any(|&byte| byte == b'\n')
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Egress half of a connection. Messages are appended whole, each with a
/// single terminating newline, and drain to the socket in FIFO order, so
/// replies queued by different tasks never interleave mid-message.
pub struct LineWriter {
    buf: BytesMut,
    capacity: usize,
}

impl LineWriter {
    #[inline]
    pub fn new(capacity: usize) -> LineWriter {
        LineWriter {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends one logical message plus its newline terminator.
    pub fn push_line(&mut self, text: &str) -> NetResult<()> {
        if self.buf.len() + text.len() + 1 > self.capacity {
            return Err(NetError::Fatal(ErrorType::Overflow));
        }

        self.buf.extend_from_slice(text.as_bytes());
        self.buf.extend_from_slice(b"\n");

        Ok(())
    }

    /// Writes buffered data until the buffer is empty or the sink would
    /// block. `Wait` signals that data remains for a later flush.
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> NetResult<usize> {
        let mut total = 0;

        while !self.buf.is_empty() {
            match writer.write(&self.buf) {
                Ok(0) => return Err(NetError::Fatal(ErrorType::Io(io::ErrorKind::WriteZero))),
                Ok(count) => {
                    self.buf.advance(count);
                    total += count;
                }
                Err(err) => match NetError::from(err) {
                    NetError::Wait => return Err(NetError::Wait),
                    fatal => return Err(fatal),
                },
            }
        }

        Ok(total)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
