//! Calling side of the protocol.
//!
//! [`ExchangeClient`] drives one connection and reuses the server's codec and
//! transfer engine, so both ends frame, chunk and compress identically.
//! Server failures come back as the [`ExchangeError`] variant named by the
//! `ERROR:<kind>` token.
use std::{
    fs,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    ExchangeError,
    config::ClientConfig,
    protocol::{Command, ProtocolTransport, parse_record, parse_status},
    storage::{FileRecord, validate_filename},
    transfer::{
        DEFAULT_CHUNK_SIZE, Incoming, Operation, Outgoing, Progress, TransferResult,
        receive_bytes, receive_payload, send_payload,
    },
};

/// Streams whose sending half can be closed while replies are still read.
pub trait CloseWrite {
    fn close_write(&mut self) -> io::Result<()>;
}

impl CloseWrite for TcpStream {
    fn close_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

pub struct ExchangeClient<T: Read + Write> {
    transport: ProtocolTransport<T>,
    chunk_size: usize,
    progress: Option<Progress>,
    on_start: Option<Progress>,
}

impl ExchangeClient<TcpStream> {
    pub fn connect(address: SocketAddr) -> Result<Self, ExchangeError> {
        let stream = TcpStream::connect(address).map_err(|e| {
            ExchangeError::PeerDisconnected(format!("could not connect to {address}: {e}"))
        })?;
        debug!("connected to {address}");
        Ok(Self::new(stream))
    }

    pub fn connect_with(config: &ClientConfig) -> Result<Self, ExchangeError> {
        Ok(Self::connect(config.address)?.with_chunk_size(config.chunk_size))
    }
}

impl<T: Read + Write> ExchangeClient<T> {
    pub fn new(stream: T) -> Self {
        Self {
            transport: ProtocolTransport::new(stream),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: None,
            on_start: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Report the size of every chunk moved by later transfers.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Called with the payload size, as sent on the wire, before every
    /// upload or download begins.
    pub fn with_start_hook(mut self, on_start: Progress) -> Self {
        self.on_start = Some(on_start);
        self
    }

    pub fn into_inner(self) -> T {
        self.transport.into_inner()
    }

    fn started(&self, wire_size: u64) {
        if let Some(on_start) = &self.on_start {
            on_start(wire_size);
        }
    }

    /// Download `filename` into memory. With `decompress` the server sends a
    /// compressed payload and it is decoded here.
    pub fn download(&mut self, filename: &str, decompress: bool) -> Result<Vec<u8>, ExchangeError> {
        let size = self.request_download(filename, decompress)?;
        self.started(size);
        let bytes = receive_bytes(
            &mut self.transport,
            size,
            decompress,
            self.chunk_size,
            Operation::Download,
            self.progress.as_ref(),
        )?;
        info!("downloaded {filename} ({} bytes)", bytes.len());
        Ok(bytes)
    }

    /// Download `filename` into `dir`. The local file appears only once the
    /// whole payload arrived and decoded.
    pub fn download_to(
        &mut self,
        filename: &str,
        decompress: bool,
        dir: &Path,
    ) -> Result<TransferResult, ExchangeError> {
        validate_filename(filename)?;
        fs::create_dir_all(dir).map_err(|e| {
            ExchangeError::ErrorDuringDownload(format!("create {}: {e}", dir.display()))
        })?;

        let size = self.request_download(filename, decompress)?;
        self.started(size);
        let mut incoming = Incoming::stage(
            &dir.join(filename),
            size,
            decompress,
            self.chunk_size,
            Operation::Download,
        )?
        .with_progress(self.progress.clone());
        receive_payload(&mut self.transport, &mut incoming)?;
        let result = incoming.commit()?;
        info!("downloaded {filename} into {}", dir.display());
        Ok(result)
    }

    pub fn list_files(&mut self) -> Result<Vec<FileRecord>, ExchangeError> {
        self.transport.write_command(&Command::List)?;
        self.read_listing()
    }

    pub fn search(&mut self, pattern: &str) -> Result<Vec<FileRecord>, ExchangeError> {
        self.transport.write_command(&Command::Search {
            pattern: pattern.to_string(),
        })?;
        self.read_listing()
    }

    fn request_download(&mut self, filename: &str, decompress: bool) -> Result<u64, ExchangeError> {
        self.transport.write_command(&Command::Download {
            filename: filename.to_string(),
            compressed: decompress,
        })?;
        self.read_status()
    }

    fn read_status(&mut self) -> Result<u64, ExchangeError> {
        let line = self.transport.read_line()?;
        parse_status(&line)
    }

    fn read_listing(&mut self) -> Result<Vec<FileRecord>, ExchangeError> {
        let count = self.read_status()?;
        let mut records = Vec::new();
        for _ in 0..count {
            let line = self.transport.read_line()?;
            records.push(parse_record(&line)?);
        }
        Ok(records)
    }
}

impl<T: Read + Write + CloseWrite> ExchangeClient<T> {
    /// Upload the file at `path` under its own file name.
    pub fn upload(&mut self, path: &Path, compress: bool) -> Result<TransferResult, ExchangeError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ExchangeError::ProtocolError(format!("{} has no usable file name", path.display()))
            })?
            .to_string();
        validate_filename(&filename)?;

        let mut outgoing = Outgoing::open(
            path,
            compress,
            self.chunk_size,
            Operation::Upload,
            &std::env::temp_dir(),
        )?
        .with_progress(self.progress.clone());

        self.started(outgoing.wire_size());
        self.transport.write_command(&Command::Upload {
            filename: filename.clone(),
            size: outgoing.wire_size(),
            compressed: compress,
        })?;
        let sent = send_payload(&mut self.transport, &mut outgoing);
        if let Err(e) = &sent {
            if outgoing.failed_locally() {
                // The server still waits for the declared bytes; closing our
                // half ends that wait with an interrupted upload.
                if let Err(close) = self.transport.get_mut().close_write() {
                    debug!("could not close the upload stream: {close}");
                }
                return Err(e.clone());
            }
        }
        let status = self.read_status();

        // The server's own verdict wins over a local write failure: a
        // rejected upload usually shows up here as a broken pipe first.
        match (sent, status) {
            (_, Err(e)) if !e.is_disconnect() => Err(e),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(result), Ok(stored)) => {
                info!("uploaded {filename} ({stored} bytes stored)");
                Ok(TransferResult {
                    size: stored,
                    ..result
                })
            }
        }
    }
}

pub fn upload<T: Read + Write + CloseWrite>(
    conn: &mut ExchangeClient<T>,
    path: &Path,
    compress: bool,
) -> Result<TransferResult, ExchangeError> {
    conn.upload(path, compress)
}

pub fn download<T: Read + Write>(
    conn: &mut ExchangeClient<T>,
    filename: &str,
    decompress: bool,
) -> Result<Vec<u8>, ExchangeError> {
    conn.download(filename, decompress)
}

pub fn list_files<T: Read + Write>(
    conn: &mut ExchangeClient<T>,
) -> Result<Vec<FileRecord>, ExchangeError> {
    conn.list_files()
}

pub fn search<T: Read + Write>(
    conn: &mut ExchangeClient<T>,
    pattern: &str,
) -> Result<Vec<FileRecord>, ExchangeError> {
    conn.search(pattern)
}

/// Upload each file over its own fresh connection, one command per
/// connection. Failures are reported per file and do not stop the rest.
pub fn share<I>(
    config: &ClientConfig,
    paths: I,
    compress: bool,
) -> Vec<(PathBuf, Result<TransferResult, ExchangeError>)>
where
    I: IntoIterator<Item = PathBuf>,
{
    paths
        .into_iter()
        .map(|path| {
            info!("sharing {}", path.display());
            let outcome = ExchangeClient::connect_with(config)
                .and_then(|mut client| client.upload(&path, compress));
            (path, outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::{Arc, Mutex},
    };

    use tempdir::TempDir;

    use super::*;

    /// Canned server: replies are read from `replies`, requests collect in `sent`.
    struct Canned {
        replies: Cursor<Vec<u8>>,
        sent: Vec<u8>,
        write_closed: bool,
    }

    impl Canned {
        fn client(replies: &[u8]) -> ExchangeClient<Canned> {
            ExchangeClient::new(Canned {
                replies: Cursor::new(replies.to_vec()),
                sent: Vec::new(),
                write_closed: false,
            })
        }
    }

    impl CloseWrite for Canned {
        fn close_write(&mut self) -> io::Result<()> {
            self.write_closed = true;
            Ok(())
        }
    }

    impl Read for Canned {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for Canned {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn list_parses_records() {
        let mut client = Canned::client(b"OK 2\na.mp4 3\nc.mp4 9\n");

        let records = list_files(&mut client).unwrap();
        assert_eq!(
            records,
            vec![FileRecord::new("a.mp4", 3), FileRecord::new("c.mp4", 9)]
        );
        assert_eq!(client.into_inner().sent, b"LIST\n");
    }

    #[test]
    fn server_errors_keep_their_kind() {
        let mut client = Canned::client(b"ERROR:FileNotFound nope.txt\n");

        let err = download(&mut client, "nope.txt", false).unwrap_err();
        assert_eq!(err, ExchangeError::FileNotFound("nope.txt".into()));
    }

    #[test]
    fn upload_sends_declared_size_and_payload() {
        let temp = TempDir::new("client").unwrap();
        let path = temp.path().join("notes.txt");
        fs::write(&path, b"hello").unwrap();
        let mut client = Canned::client(b"OK 5\n");

        let result = upload(&mut client, &path, false).unwrap();
        assert_eq!(result.size, 5);
        assert_eq!(client.into_inner().sent, b"UPLOAD notes.txt 5\nhello");
    }

    #[test]
    fn unreadable_source_hangs_up_without_waiting() {
        let temp = TempDir::new("client").unwrap();
        let path = temp.path().join("notes.txt");
        fs::write(&path, b"twelve bytes").unwrap();

        // Empty the file once the first chunk is out.
        let shrink = path.clone();
        let mut client = Canned::client(b"")
            .with_chunk_size(4)
            .with_progress(Arc::new(move |_| {
                fs::write(&shrink, b"").unwrap();
            }));

        let err = upload(&mut client, &path, false).unwrap_err();
        assert!(matches!(err, ExchangeError::ErrorDuringUpload(_)), "{err}");
        assert!(err.message().contains("read source"), "{err}");

        let canned = client.into_inner();
        assert!(canned.write_closed);
        assert_eq!(canned.sent, b"UPLOAD notes.txt 12\ntwel");
    }

    #[test]
    fn start_hook_sees_wire_sizes() {
        let temp = TempDir::new("client").unwrap();
        let path = temp.path().join("notes.txt");
        fs::write(&path, b"hello").unwrap();

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&sizes);
        let mut client = Canned::client(b"OK 5\nOK 3\nabc").with_start_hook(Arc::new(move |n| {
            seen.lock().unwrap().push(n);
        }));

        upload(&mut client, &path, false).unwrap();
        assert_eq!(download(&mut client, "x.bin", false).unwrap(), b"abc");
        assert_eq!(*sizes.lock().unwrap(), vec![5, 3]);
    }

    #[test]
    fn short_download_is_an_error() {
        let mut client = Canned::client(b"OK 10\nabc");

        let err = client.download("a.bin", false).unwrap_err();
        assert!(matches!(err, ExchangeError::ErrorDuringDownload(_)));
    }

    #[test]
    fn download_to_rejects_traversal_locally() {
        let temp = TempDir::new("client").unwrap();
        let mut client = Canned::client(b"");

        let err = client.download_to("../x", false, temp.path()).unwrap_err();
        assert!(matches!(err, ExchangeError::ProtocolError(_)));
        assert!(client.into_inner().sent.is_empty());
    }
}
