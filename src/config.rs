//! Server and client settings.
//!
//! The binaries build these from command-line arguments; library callers and
//! tests construct them directly.
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::PathBuf,
    time::Duration,
};

use crate::transfer::DEFAULT_CHUNK_SIZE;

/// Well-known port used when none is given.
pub const DEFAULT_PORT: u16 = 5050;

/// Default storage directory, relative to the working directory.
pub const DEFAULT_STORAGE_DIR: &str = "database";

/// How long a connection may sit without sending a byte.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Which concurrency adapter drives the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ServeMode {
    /// One blocking worker thread per accepted connection.
    #[default]
    Threaded,
    /// Single-threaded cooperative scheduler multiplexing every connection.
    Cooperative,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub storage_root: PathBuf,
    pub mode: ServeMode,
    pub chunk_size: usize,
    pub idle_timeout: Duration,
}

impl ServerConfig {
    pub fn new(address: SocketAddr, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            address,
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ServeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Zero is not a usable chunk size and falls back to the default.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            storage_root: PathBuf::from(DEFAULT_STORAGE_DIR),
            mode: ServeMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: SocketAddr,
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
