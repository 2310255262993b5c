//! Chunked file transfer shared by the server and the client.
//!
//! A transfer is described by a [`TransferSession`]: which way the bytes
//! flow, how large each chunk is, whether the payload is zstd-compressed and
//! how many bytes were declared up front. The declared size is the only
//! framing; the receiver stops after exactly that many bytes.
//!
//! Sources are wrapped in [`Outgoing`] and destinations in [`Incoming`].
//! Both are plain values that either scheduler can drive: the blocking
//! functions ([`send_payload`], [`receive_payload`]) work on any
//! `Read`/`Write`, the `_async` ones on tokio streams, and the
//! session bookkeeping, staging and compression are the same for both.
//!
//! Compression is applied to the whole file before chunking. Received data
//! always lands in a hidden temporary file and is renamed into place only
//! after every declared byte arrived (and, if compressed, decoded cleanly).
use std::{
    fmt,
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    ExchangeError,
    protocol::{read_exact_async, read_exact_into, write_chunk, write_chunk_async},
    storage::TempFile,
};

/// Chunk size used when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// zstd level; fast with a reasonable ratio.
pub const COMPRESSION_LEVEL: i32 = 3;

// Cap on up-front allocation when receiving into memory.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Callback invoked with the size of every chunk moved.
pub type Progress = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Which command a transfer belongs to; picks the error kind on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Download,
}

impl Operation {
    pub fn failure(self, reason: impl fmt::Display) -> ExchangeError {
        match self {
            Operation::Upload => ExchangeError::ErrorDuringUpload(reason.to_string()),
            Operation::Download => ExchangeError::ErrorDuringDownload(reason.to_string()),
        }
    }
}

/// Byte accounting for one transfer. Chunk size and compression are fixed
/// at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    direction: Direction,
    operation: Operation,
    chunk_size: usize,
    compressed: bool,
    transferred: u64,
    declared: u64,
}

impl TransferSession {
    pub fn new(
        direction: Direction,
        operation: Operation,
        chunk_size: usize,
        compressed: bool,
        declared: u64,
    ) -> Self {
        Self {
            direction,
            operation,
            chunk_size: chunk_size.max(1),
            compressed,
            transferred: 0,
            declared,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn compressed(&self) -> bool {
        self.compressed
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn declared(&self) -> u64 {
        self.declared
    }

    pub fn remaining(&self) -> u64 {
        self.declared - self.transferred
    }

    /// Length of the next chunk, or `None` once the declared size is reached.
    pub fn next_chunk_len(&self) -> Option<usize> {
        match self.remaining() {
            0 => None,
            remaining => Some(remaining.min(self.chunk_size as u64) as usize),
        }
    }

    pub fn advance(&mut self, n: usize) {
        debug_assert!(n as u64 <= self.remaining(), "chunk overruns declared size");
        self.transferred += n as u64;
    }

    pub fn is_complete(&self) -> bool {
        self.transferred == self.declared
    }

    pub fn failure(&self, reason: impl fmt::Display) -> ExchangeError {
        self.operation.failure(reason)
    }

    /// Reclassify an error raised mid-transfer. A disconnect becomes the
    /// operation's failure kind, noting how far the transfer got.
    pub fn interrupted(&self, err: ExchangeError) -> ExchangeError {
        match err {
            ExchangeError::PeerDisconnected(reason) => self.failure(format!(
                "{reason} after {} of {} bytes",
                self.transferred, self.declared
            )),
            other => other,
        }
    }

    pub fn finish(&self) -> Result<(), ExchangeError> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(self.failure(format!(
                "size mismatch: declared {} bytes, transferred {}",
                self.declared, self.transferred
            )))
        }
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    /// Payload bytes that crossed the wire.
    pub bytes_transferred: u64,
    /// Size of the file itself, before compression or after decompression.
    pub size: u64,
    pub compressed: bool,
}

fn report(progress: &Option<Progress>, n: usize) {
    if let Some(progress) = progress {
        progress(n as u64);
    }
}

/// A file prepared for sending.
pub struct Outgoing {
    session: TransferSession,
    source: Option<File>,
    source_size: u64,
    progress: Option<Progress>,
    failed_locally: bool,
    // Compressed copy; dropped after `source` so the handle closes first.
    _scratch: Option<TempFile>,
}

impl Outgoing {
    /// Open `path` for sending. With `compress`, the whole file is first
    /// compressed into a temporary file in `scratch_dir` and that is what
    /// gets sent; the declared size is then the compressed size.
    pub fn open(
        path: &Path,
        compress: bool,
        chunk_size: usize,
        operation: Operation,
        scratch_dir: &Path,
    ) -> Result<Self, ExchangeError> {
        let name = file_label(path);
        let source = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExchangeError::FileNotFound(name.clone()),
            _ => operation.failure(format!("open {name}: {e}")),
        })?;
        let metadata = source
            .metadata()
            .map_err(|e| operation.failure(format!("stat {name}: {e}")))?;
        if !metadata.is_file() {
            return Err(operation.failure(format!("{name} is not a regular file")));
        }
        let source_size = metadata.len();

        let (source, wire_size, scratch) = if compress {
            let mut scratch = TempFile::create_in(scratch_dir, "compress")
                .map_err(|e| operation.failure(format!("create compression buffer: {e}")))?;
            let buffer = scratch
                .file_mut()
                .map_err(|e| operation.failure(format!("compression buffer: {e}")))?;
            zstd::stream::copy_encode(BufReader::new(source), buffer, COMPRESSION_LEVEL)
                .map_err(|e| operation.failure(format!("compression failed: {e}")))?;
            let compressed = File::open(scratch.path())
                .map_err(|e| operation.failure(format!("reopen compressed payload: {e}")))?;
            let wire_size = compressed
                .metadata()
                .map_err(|e| operation.failure(format!("stat compressed payload: {e}")))?
                .len();
            drop(scratch.take_file());
            debug!("compressed {name} from {source_size} to {wire_size} bytes");
            (compressed, wire_size, Some(scratch))
        } else {
            (source, source_size, None)
        };

        Ok(Self {
            session: TransferSession::new(
                Direction::Send,
                operation,
                chunk_size,
                compress,
                wire_size,
            ),
            source: Some(source),
            source_size,
            progress: None,
            failed_locally: false,
            _scratch: scratch,
        })
    }

    pub fn with_progress(mut self, progress: Option<Progress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Bytes that will be sent, i.e. the size to declare to the peer.
    pub fn wire_size(&self) -> u64 {
        self.session.declared()
    }

    /// Did the last send stop because the source could not be read, rather
    /// than because the stream failed?
    pub fn failed_locally(&self) -> bool {
        self.failed_locally
    }

    fn result(&self) -> TransferResult {
        TransferResult {
            bytes_transferred: self.session.transferred(),
            size: self.source_size,
            compressed: self.session.compressed(),
        }
    }
}

/// A destination being filled from the wire.
pub struct Incoming {
    session: TransferSession,
    staged: TempFile,
    destination: PathBuf,
    progress: Option<Progress>,
}

impl Incoming {
    /// Stage a receive of `declared` bytes for `destination`. The temporary
    /// file sits in the destination's directory so the final rename is atomic.
    pub fn stage(
        destination: &Path,
        declared: u64,
        compressed: bool,
        chunk_size: usize,
        operation: Operation,
    ) -> Result<Self, ExchangeError> {
        let label = file_label(destination);
        let staged = TempFile::create_in(staging_dir(destination), &label)
            .map_err(|e| operation.failure(format!("stage {label}: {e}")))?;

        Ok(Self {
            session: TransferSession::new(
                Direction::Receive,
                operation,
                chunk_size,
                compressed,
                declared,
            ),
            staged,
            destination: destination.to_path_buf(),
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: Option<Progress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Verify the byte count, decode if compressed, and rename into place.
    ///
    /// On any failure the temporaries are removed and the destination is
    /// left exactly as it was.
    pub fn commit(self) -> Result<TransferResult, ExchangeError> {
        let Incoming {
            session,
            mut staged,
            destination,
            ..
        } = self;
        session.finish()?;

        let size = if session.compressed() {
            let mut decoded =
                TempFile::create_in(staging_dir(&destination), &file_label(&destination))
                    .map_err(|e| session.failure(format!("stage decoded payload: {e}")))?;

            let encoded = staged
                .file_mut()
                .map_err(|e| session.failure(format!("staged payload: {e}")))?;
            encoded
                .seek(SeekFrom::Start(0))
                .map_err(|e| session.failure(format!("rewind payload: {e}")))?;
            let output = decoded
                .file_mut()
                .map_err(|e| session.failure(format!("decoded payload: {e}")))?;
            zstd::stream::copy_decode(BufReader::new(encoded), &mut *output)
                .map_err(|e| session.failure(format!("corrupt compressed payload: {e}")))?;
            let size = output
                .metadata()
                .map_err(|e| session.failure(format!("stat decoded payload: {e}")))?
                .len();

            decoded
                .persist(&destination)
                .map_err(|e| session.failure(format!("rename into place: {e}")))?;
            size
        } else {
            staged
                .persist(&destination)
                .map_err(|e| session.failure(format!("rename into place: {e}")))?;
            session.declared()
        };

        trace!("committed {} ({size} bytes)", destination.display());
        Ok(TransferResult {
            bytes_transferred: session.transferred(),
            size,
            compressed: session.compressed(),
        })
    }
}

fn staging_dir(destination: &Path) -> &Path {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Bare file name of `path`, used for temporary names and in messages that
/// may reach the peer.
fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transfer".to_string())
}

/// Write the prepared payload to `stream`, chunk by chunk.
pub fn send_payload<W: Write>(
    stream: &mut W,
    outgoing: &mut Outgoing,
) -> Result<TransferResult, ExchangeError> {
    {
        let Outgoing {
            session,
            source,
            progress,
            failed_locally,
            ..
        } = outgoing;
        let source = source
            .as_mut()
            .ok_or_else(|| session.failure("payload was already sent"))?;

        let mut buf = vec![0u8; session.chunk_size()];
        while let Some(len) = session.next_chunk_len() {
            let chunk = &mut buf[..len];
            if let Err(e) = source.read_exact(chunk) {
                *failed_locally = true;
                return Err(session.failure(format!("read source: {e}")));
            }
            write_chunk(stream, chunk).map_err(|e| session.interrupted(e))?;
            session.advance(len);
            report(progress, len);
        }
        stream
            .flush()
            .map_err(|e| session.interrupted(ExchangeError::from_socket(e)))?;
        session.finish()?;
    }
    outgoing.source = None;
    Ok(outgoing.result())
}

/// Fill the staged file from `stream` until the declared size is reached.
pub fn receive_payload<R: Read>(
    stream: &mut R,
    incoming: &mut Incoming,
) -> Result<(), ExchangeError> {
    let Incoming {
        session,
        staged,
        progress,
        ..
    } = incoming;

    let mut buf = vec![0u8; session.chunk_size()];
    while let Some(len) = session.next_chunk_len() {
        let chunk = &mut buf[..len];
        read_exact_into(stream, chunk).map_err(|e| session.interrupted(e))?;
        staged
            .file_mut()
            .and_then(|file| file.write_all(chunk))
            .map_err(|e| session.failure(format!("write to storage: {e}")))?;
        session.advance(len);
        report(progress, len);
    }
    Ok(())
}

/// Send the file at `path`, compressing it first if asked.
pub fn send_file<W: Write>(
    stream: &mut W,
    path: &Path,
    compress: bool,
    chunk_size: usize,
    operation: Operation,
) -> Result<TransferResult, ExchangeError> {
    let mut outgoing = Outgoing::open(path, compress, chunk_size, operation, &std::env::temp_dir())?;
    send_payload(stream, &mut outgoing)
}

/// Receive `declared_size` bytes into `destination`, atomically.
pub fn receive_file<R: Read>(
    stream: &mut R,
    destination: &Path,
    declared_size: u64,
    decompress: bool,
    chunk_size: usize,
    operation: Operation,
) -> Result<TransferResult, ExchangeError> {
    let mut incoming = Incoming::stage(destination, declared_size, decompress, chunk_size, operation)?;
    receive_payload(stream, &mut incoming)?;
    incoming.commit()
}

/// Receive `declared_size` bytes into memory, decoding them if compressed.
pub fn receive_bytes<R: Read>(
    stream: &mut R,
    declared_size: u64,
    decompress: bool,
    chunk_size: usize,
    operation: Operation,
    progress: Option<&Progress>,
) -> Result<Vec<u8>, ExchangeError> {
    let mut session = TransferSession::new(
        Direction::Receive,
        operation,
        chunk_size,
        decompress,
        declared_size,
    );
    let mut payload = Vec::with_capacity(declared_size.min(MAX_PREALLOC) as usize);
    let mut buf = vec![0u8; session.chunk_size()];

    while let Some(len) = session.next_chunk_len() {
        let chunk = &mut buf[..len];
        read_exact_into(stream, chunk).map_err(|e| session.interrupted(e))?;
        payload.extend_from_slice(chunk);
        session.advance(len);
        if let Some(progress) = progress {
            progress(len as u64);
        }
    }
    session.finish()?;

    if decompress {
        zstd::stream::decode_all(payload.as_slice())
            .map_err(|e| session.failure(format!("corrupt compressed payload: {e}")))
    } else {
        Ok(payload)
    }
}

/// Cooperative version of [`send_payload`]. File reads go through
/// `tokio::fs`, so the scheduler is never blocked on disk.
pub async fn send_payload_async<W>(
    stream: &mut W,
    outgoing: &mut Outgoing,
) -> Result<TransferResult, ExchangeError>
where
    W: AsyncWrite + Unpin,
{
    {
        let Outgoing {
            session,
            source,
            progress,
            failed_locally,
            ..
        } = &mut *outgoing;
        let source = source
            .take()
            .ok_or_else(|| session.failure("payload was already sent"))?;
        let mut source = tokio::fs::File::from_std(source);

        let mut buf = vec![0u8; session.chunk_size()];
        while let Some(len) = session.next_chunk_len() {
            let chunk = &mut buf[..len];
            if let Err(e) = source.read_exact(chunk).await {
                *failed_locally = true;
                return Err(session.failure(format!("read source: {e}")));
            }
            write_chunk_async(stream, chunk)
                .await
                .map_err(|e| session.interrupted(e))?;
            session.advance(len);
            report(progress, len);
        }
        stream
            .flush()
            .await
            .map_err(|e| session.interrupted(ExchangeError::from_socket(e)))?;
        session.finish()?;
    }
    Ok(outgoing.result())
}

/// Cooperative version of [`receive_payload`]. Each socket read waits at
/// most `idle_timeout`.
pub async fn receive_payload_async<R>(
    stream: &mut R,
    incoming: &mut Incoming,
    idle_timeout: Duration,
) -> Result<(), ExchangeError>
where
    R: AsyncRead + Unpin,
{
    let Incoming {
        session,
        staged,
        progress,
        ..
    } = incoming;
    let file = staged
        .take_file()
        .ok_or_else(|| session.failure("staging file is unavailable"))?;
    let mut file = tokio::fs::File::from_std(file);

    let mut buf = vec![0u8; session.chunk_size()];
    let outcome: Result<(), ExchangeError> = async {
        while let Some(len) = session.next_chunk_len() {
            let chunk = &mut buf[..len];
            read_exact_async(stream, chunk, idle_timeout)
                .await
                .map_err(|e| session.interrupted(e))?;
            file.write_all(chunk)
                .await
                .map_err(|e| session.failure(format!("write to storage: {e}")))?;
            session.advance(len);
            report(progress, len);
        }
        file.flush()
            .await
            .map_err(|e| session.failure(format!("write to storage: {e}")))
    }
    .await;

    staged.restore_file(file.into_std().await);
    outcome
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        io::Cursor,
        sync::atomic::{AtomicU64, Ordering},
    };

    use tempdir::TempDir;

    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn chunk_lengths_cover_declared_size() {
        let mut session = TransferSession::new(Direction::Receive, Operation::Upload, 4, false, 10);
        let mut lens = Vec::new();
        while let Some(len) = session.next_chunk_len() {
            lens.push(len);
            session.advance(len);
        }
        assert_eq!(lens, vec![4, 4, 2]);
        assert!(session.finish().is_ok());
    }

    #[test]
    fn disconnect_becomes_operation_failure() {
        let mut session =
            TransferSession::new(Direction::Receive, Operation::Download, 4, false, 10);
        session.advance(4);

        let err = session.interrupted(ExchangeError::PeerDisconnected("closed".into()));
        assert_eq!(
            err,
            ExchangeError::ErrorDuringDownload("closed after 4 of 10 bytes".into())
        );
        assert!(matches!(
            session.finish(),
            Err(ExchangeError::ErrorDuringDownload(_))
        ));
    }

    #[test]
    fn compressed_round_trip() {
        let temp = TempDir::new("transfer").unwrap();
        let source = temp.path().join("source.bin");
        let original = sample(10_000);
        fs::write(&source, &original).unwrap();

        let mut wire: Vec<u8> = Vec::new();
        let sent = send_file(&mut wire, &source, true, 512, Operation::Upload).unwrap();
        assert!(sent.compressed);
        assert_eq!(sent.size, original.len() as u64);
        assert_eq!(sent.bytes_transferred, wire.len() as u64);

        let destination = temp.path().join("copy.bin");
        let received = receive_file(
            &mut Cursor::new(&wire),
            &destination,
            wire.len() as u64,
            true,
            512,
            Operation::Upload,
        )
        .unwrap();

        assert_eq!(received.size, original.len() as u64);
        assert_eq!(fs::read(&destination).unwrap(), original);
    }

    #[test]
    fn plain_round_trip_into_memory() {
        let temp = TempDir::new("transfer").unwrap();
        let source = temp.path().join("source.bin");
        let original = sample(4097);
        fs::write(&source, &original).unwrap();

        let mut wire: Vec<u8> = Vec::new();
        send_file(&mut wire, &source, false, DEFAULT_CHUNK_SIZE, Operation::Download).unwrap();
        assert_eq!(wire, original);

        let bytes = receive_bytes(
            &mut Cursor::new(&wire),
            wire.len() as u64,
            false,
            DEFAULT_CHUNK_SIZE,
            Operation::Download,
            None,
        )
        .unwrap();
        assert_eq!(bytes, original);
    }

    #[test]
    fn empty_file_transfers() {
        let temp = TempDir::new("transfer").unwrap();
        let source = temp.path().join("empty");
        fs::write(&source, b"").unwrap();

        let mut wire: Vec<u8> = Vec::new();
        let sent = send_file(&mut wire, &source, false, 8, Operation::Upload).unwrap();
        assert_eq!(sent.bytes_transferred, 0);

        let destination = temp.path().join("empty-copy");
        receive_file(&mut Cursor::new(&wire), &destination, 0, false, 8, Operation::Upload)
            .unwrap();
        assert_eq!(fs::read(&destination).unwrap(), b"");
    }

    #[test]
    fn interrupted_receive_leaves_nothing_behind() {
        let temp = TempDir::new("transfer").unwrap();
        let destination = temp.path().join("partial.bin");

        let err = receive_file(
            &mut Cursor::new(vec![7u8; 100]),
            &destination,
            1000,
            false,
            64,
            Operation::Upload,
        )
        .unwrap_err();

        assert!(matches!(err, ExchangeError::ErrorDuringUpload(_)));
        assert!(!destination.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn corrupt_compressed_payload_is_rejected() {
        let temp = TempDir::new("transfer").unwrap();
        let destination = temp.path().join("bad.bin");
        fs::write(&destination, b"previous").unwrap();
        let garbage = b"definitely not zstd".to_vec();

        let err = receive_file(
            &mut Cursor::new(&garbage),
            &destination,
            garbage.len() as u64,
            true,
            64,
            Operation::Download,
        )
        .unwrap_err();

        assert!(matches!(err, ExchangeError::ErrorDuringDownload(_)));
        assert_eq!(fs::read(&destination).unwrap(), b"previous");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn missing_source_is_file_not_found() {
        let temp = TempDir::new("transfer").unwrap();
        let err = send_file(
            &mut Vec::<u8>::new(),
            &temp.path().join("nope"),
            false,
            16,
            Operation::Upload,
        )
        .unwrap_err();
        assert!(matches!(err, ExchangeError::FileNotFound(_)));
    }

    #[test]
    fn directory_source_is_rejected() {
        let temp = TempDir::new("transfer").unwrap();
        let err = Outgoing::open(temp.path(), false, 16, Operation::Upload, temp.path())
            .err()
            .unwrap();
        assert!(matches!(err, ExchangeError::ErrorDuringUpload(_)));
    }

    #[test]
    fn shrinking_source_is_a_local_failure() {
        let temp = TempDir::new("transfer").unwrap();
        let source = temp.path().join("source.bin");
        fs::write(&source, sample(64)).unwrap();

        let mut outgoing =
            Outgoing::open(&source, false, 16, Operation::Upload, temp.path()).unwrap();
        fs::write(&source, b"").unwrap();

        let err = send_payload(&mut Vec::<u8>::new(), &mut outgoing).unwrap_err();
        assert!(matches!(err, ExchangeError::ErrorDuringUpload(_)));
        assert!(outgoing.failed_locally());
    }

    #[test]
    fn failures_name_the_file_not_its_directory() {
        let temp = TempDir::new("transfer").unwrap();
        let destination = temp.path().join("absent-dir").join("notes.txt");

        let err = Incoming::stage(&destination, 4, false, 16, Operation::Upload)
            .err()
            .unwrap();
        assert!(err.message().contains("notes.txt"), "{err}");
        assert!(!err.message().contains("absent-dir"), "{err}");

        let err = send_file(
            &mut Vec::<u8>::new(),
            &temp.path().join("gone.bin"),
            false,
            16,
            Operation::Download,
        )
        .unwrap_err();
        assert_eq!(err, ExchangeError::FileNotFound("gone.bin".into()));
    }

    #[test]
    fn progress_sees_every_chunk() {
        let temp = TempDir::new("transfer").unwrap();
        let source = temp.path().join("source.bin");
        fs::write(&source, sample(100)).unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let progress: Progress = Arc::new(move |n| {
            counter.fetch_add(n, Ordering::Relaxed);
        });

        let mut outgoing = Outgoing::open(&source, false, 30, Operation::Upload, temp.path())
            .unwrap()
            .with_progress(Some(progress));
        send_payload(&mut Vec::<u8>::new(), &mut outgoing).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 100);
    }

    #[tokio::test]
    async fn async_engine_matches_blocking_engine() {
        let temp = TempDir::new("transfer").unwrap();
        let source = temp.path().join("source.bin");
        let original = sample(9000);
        fs::write(&source, &original).unwrap();

        let mut blocking_wire: Vec<u8> = Vec::new();
        send_file(&mut blocking_wire, &source, true, 1024, Operation::Download).unwrap();

        let mut outgoing =
            Outgoing::open(&source, true, 1024, Operation::Download, temp.path()).unwrap();
        let mut async_wire: Vec<u8> = Vec::new();
        send_payload_async(&mut async_wire, &mut outgoing).await.unwrap();
        assert_eq!(async_wire, blocking_wire);

        let destination = temp.path().join("copy.bin");
        let mut incoming = Incoming::stage(
            &destination,
            async_wire.len() as u64,
            true,
            1024,
            Operation::Upload,
        )
        .unwrap();
        let mut reader: &[u8] = &async_wire;
        receive_payload_async(&mut reader, &mut incoming, Duration::from_secs(5))
            .await
            .unwrap();
        incoming.commit().unwrap();
        assert_eq!(fs::read(&destination).unwrap(), original);
    }
}
