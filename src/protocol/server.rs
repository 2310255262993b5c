use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener},
    path::PathBuf,
    sync::Arc,
};

use log::info;

use crate::{
    ServerError,
    config::{ServeMode, ServerConfig},
    logging::LogContext,
    storage::Catalog,
};

use super::{cooperative, dispatcher::Dispatcher, threaded};

/// A bound, ready-to-run exchange server.
///
/// Binding validates the storage root first; a root that can not be used is
/// fatal and no listener is ever opened.
pub struct ExchangeServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    ctx: LogContext,
}

impl ExchangeServer {
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let ctx = LogContext::new("server");
        let catalog = Catalog::open(&config.storage_root, ctx.child("catalog"))?;
        let listener = TcpListener::bind(config.address).map_err(ServerError::Bind)?;
        let dispatcher = Dispatcher::new(catalog, config.chunk_size, ctx.child("dispatch"));

        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
            config,
            ctx,
        })
    }

    /// Actual listening address; useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn mode(&self) -> ServeMode {
        self.config.mode
    }

    /// Serve connections until the process ends.
    pub fn listen(self) -> Result<(), ServerError> {
        info!(
            "{} starting in {:?} mode, chunk size {} bytes",
            self.ctx, self.config.mode, self.config.chunk_size
        );
        match self.config.mode {
            ServeMode::Threaded => threaded::run(
                self.listener,
                self.dispatcher,
                self.config.idle_timeout,
                self.ctx,
            ),
            ServeMode::Cooperative => cooperative::run(
                self.listener,
                self.dispatcher,
                self.config.idle_timeout,
                self.ctx,
            ),
        }
    }
}

/// Serve `storage_root` on every interface at `port` with the given adapter.
pub fn serve(
    mode: ServeMode,
    port: u16,
    storage_root: impl Into<PathBuf>,
) -> Result<(), ServerError> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let config = ServerConfig::new(address, storage_root).with_mode(mode);
    ExchangeServer::bind(config)?.listen()
}
