//! Blocking framing over any `Read + Write` stream.
//!
//! Control frames are newline-terminated text lines; payload frames are raw
//! bytes whose length was declared in the preceding control line. Nothing
//! here touches the filesystem.
use std::io::{self, BufRead, BufReader, Read, Write};

use log::trace;

use crate::ExchangeError;

use super::{Command, Response};

/// Longest control line accepted, newline included.
pub const MAX_LINE_LEN: usize = 4096;

/// Turn the raw bytes of one `read_until(b'\n')` into a line.
///
/// Shared by the blocking and cooperative transports so both reject the same
/// inputs in the same way.
pub(crate) fn finish_line(mut raw: Vec<u8>) -> Result<String, ExchangeError> {
    if raw.is_empty() {
        return Err(ExchangeError::PeerDisconnected(
            "connection closed".to_string(),
        ));
    }
    if raw.last() != Some(&b'\n') {
        if raw.len() >= MAX_LINE_LEN {
            return Err(ExchangeError::ProtocolError(format!(
                "control line exceeds {MAX_LINE_LEN} bytes"
            )));
        }
        return Err(ExchangeError::PeerDisconnected(
            "connection closed mid-line".to_string(),
        ));
    }

    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8(raw)
        .map_err(|_| ExchangeError::ProtocolError("control line is not valid UTF-8".to_string()))
}

/// Read one control line, without its terminator.
pub fn read_line<R: BufRead>(stream: &mut R) -> Result<String, ExchangeError> {
    let mut raw = Vec::new();
    stream
        .by_ref()
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut raw)
        .map_err(ExchangeError::from_socket)?;
    finish_line(raw)
}

/// Read and parse the next command, skipping blank lines.
pub fn decode_command<R: BufRead>(stream: &mut R) -> Result<Command, ExchangeError> {
    loop {
        let line = read_line(stream)?;
        if line.trim().is_empty() {
            continue;
        }
        trace!("decoding control line '{line}'");
        return Command::parse(&line);
    }
}

/// Fill `buf` completely or fail with [`ExchangeError::PeerDisconnected`].
pub fn read_exact_into<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<(), ExchangeError> {
    stream.read_exact(buf).map_err(ExchangeError::from_socket)
}

/// Read exactly `n` bytes. A short read is never returned.
pub fn read_exact<R: Read>(stream: &mut R, n: usize) -> Result<Vec<u8>, ExchangeError> {
    let mut buf = vec![0; n];
    read_exact_into(stream, &mut buf)?;
    Ok(buf)
}

/// Write one payload frame.
pub fn write_chunk<W: Write>(stream: &mut W, bytes: &[u8]) -> Result<(), ExchangeError> {
    stream.write_all(bytes).map_err(ExchangeError::from_socket)
}

/// Buffered, blocking protocol endpoint used by the threaded server and the
/// client.
pub struct ProtocolTransport<T: Read + Write> {
    stream: BufReader<T>,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub fn get_ref(&self) -> &T {
        self.stream.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.stream.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.stream.into_inner()
    }

    pub fn read_command(&mut self) -> Result<Command, ExchangeError> {
        decode_command(&mut self.stream)
    }

    pub fn read_line(&mut self) -> Result<String, ExchangeError> {
        read_line(&mut self.stream)
    }

    pub fn write_command(&mut self, command: &Command) -> Result<(), ExchangeError> {
        self.send(&command.encode())
    }

    pub fn write_response(&mut self, resp: &Response) -> Result<(), ExchangeError> {
        self.send(&resp.encode())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ExchangeError> {
        let stream = self.stream.get_mut();
        write_chunk(stream, bytes)?;
        stream.flush().map_err(ExchangeError::from_socket)
    }
}

impl<T: Read + Write> Read for ProtocolTransport<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl<T: Read + Write> Write for ProtocolTransport<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.get_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.get_mut().flush()
    }
}
