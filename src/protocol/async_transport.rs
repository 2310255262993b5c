//! Cooperative counterpart of [`transport`](super::transport).
//!
//! Same framing rules, but every read is a suspension point bounded by an
//! idle timeout, so one stalled peer can not hold its task forever.
use std::{future::Future, io, time::Duration};

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

use crate::ExchangeError;

use super::{
    Command, Response,
    transport::{MAX_LINE_LEN, finish_line},
};

async fn within<T, F>(idle_timeout: Duration, io: F) -> Result<T, ExchangeError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(idle_timeout, io).await {
        Ok(result) => result.map_err(ExchangeError::from_socket),
        Err(_) => Err(ExchangeError::PeerDisconnected(
            "timed out waiting for peer".to_string(),
        )),
    }
}

pub async fn read_line_async<R>(stream: &mut R, idle_timeout: Duration) -> Result<String, ExchangeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let mut limited = (&mut *stream).take(MAX_LINE_LEN as u64);
    within(idle_timeout, limited.read_until(b'\n', &mut raw)).await?;
    finish_line(raw)
}

pub async fn decode_command_async<R>(
    stream: &mut R,
    idle_timeout: Duration,
) -> Result<Command, ExchangeError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = read_line_async(stream, idle_timeout).await?;
        if line.trim().is_empty() {
            continue;
        }
        return Command::parse(&line);
    }
}

pub async fn read_exact_async<R>(
    stream: &mut R,
    buf: &mut [u8],
    idle_timeout: Duration,
) -> Result<(), ExchangeError>
where
    R: AsyncRead + Unpin,
{
    within(idle_timeout, stream.read_exact(buf)).await.map(|_| ())
}

pub async fn write_chunk_async<W>(stream: &mut W, bytes: &[u8]) -> Result<(), ExchangeError>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await.map_err(ExchangeError::from_socket)
}

pub struct AsyncTransport<T: AsyncRead + AsyncWrite + Unpin> {
    stream: BufReader<T>,
    idle_timeout: Duration,
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncTransport<T> {
    pub fn new(stream: T, idle_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Buffered stream, for payload frames that follow a control line.
    pub fn stream_mut(&mut self) -> &mut BufReader<T> {
        &mut self.stream
    }

    pub async fn read_command(&mut self) -> Result<Command, ExchangeError> {
        decode_command_async(&mut self.stream, self.idle_timeout).await
    }

    pub async fn write_response(&mut self, resp: &Response) -> Result<(), ExchangeError> {
        write_chunk_async(&mut self.stream, &resp.encode()).await?;
        self.stream.flush().await.map_err(ExchangeError::from_socket)
    }
}
