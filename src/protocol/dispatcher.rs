//! Command interpretation, shared by both concurrency adapters.
//!
//! The dispatcher never touches a socket. For each command it produces an
//! [`Action`]: a reply to write, a payload to receive, or a payload to send.
//! The adapter performs the I/O with its own primitives and hands uploads
//! back through [`Dispatcher::complete_upload`]. Every wire-visible decision
//! is made here, which keeps the adapters byte-for-byte equivalent.
use log::{debug, info, trace, warn};

use crate::{
    ExchangeError,
    logging::LogContext,
    storage::Catalog,
    transfer::{Incoming, Operation, Outgoing, TransferResult},
};

use super::{Command, Response};

/// What the adapter has to do next for a command.
pub enum Action {
    /// Write this reply; nothing else to transfer.
    Reply(Response),
    /// Read the declared payload into the staged upload, then call
    /// [`Dispatcher::complete_upload`].
    Receive(Incoming),
    /// Write `OK <size>` and then the payload.
    Send(Outgoing),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitCommand,
    UploadInProgress,
    DownloadInProgress,
    ListResponding,
    SearchResponding,
    ResponseSent,
    Closed,
}

impl ConnectionState {
    pub fn for_command(command: &Command) -> Self {
        match command {
            Command::Upload { .. } => ConnectionState::UploadInProgress,
            Command::Download { .. } => ConnectionState::DownloadInProgress,
            Command::List => ConnectionState::ListResponding,
            Command::Search { .. } => ConnectionState::SearchResponding,
        }
    }

    pub fn can_transition(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (
                AwaitCommand,
                UploadInProgress | DownloadInProgress | ListResponding | SearchResponding,
            ) => true,
            (
                UploadInProgress | DownloadInProgress | ListResponding | SearchResponding,
                ResponseSent,
            ) => true,
            (ResponseSent, AwaitCommand) => true,
            _ => false,
        }
    }
}

/// Per-connection state; commands on one connection run strictly one at a time.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    ctx: LogContext,
}

impl Connection {
    pub fn new(ctx: LogContext) -> Self {
        Self {
            state: ConnectionState::AwaitCommand,
            ctx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn ctx(&self) -> &LogContext {
        &self.ctx
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<(), ExchangeError> {
        if !self.state.can_transition(next) {
            return Err(ExchangeError::ProtocolError(format!(
                "illegal connection transition {:?} -> {next:?}",
                self.state
            )));
        }
        trace!("{} {:?} -> {next:?}", self.ctx, self.state);
        self.state = next;
        Ok(())
    }

    pub fn begin(&mut self, command: &Command) -> Result<(), ExchangeError> {
        self.transition(ConnectionState::for_command(command))
    }

    /// Reply written; ready for the next command.
    pub fn responded(&mut self) -> Result<(), ExchangeError> {
        self.transition(ConnectionState::ResponseSent)?;
        self.transition(ConnectionState::AwaitCommand)
    }

    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            info!("{} connection closed", self.ctx);
        }
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    catalog: Catalog,
    chunk_size: usize,
    ctx: LogContext,
}

impl Dispatcher {
    pub fn new(catalog: Catalog, chunk_size: usize, ctx: LogContext) -> Self {
        Self {
            catalog,
            chunk_size,
            ctx,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Decide how to serve `command`. Performs filesystem work (catalog
    /// scans, staging, compression) but no network I/O.
    pub fn plan(&self, command: &Command, peer: &LogContext) -> Result<Action, ExchangeError> {
        debug!("{} planning '{command}' for {peer}", self.ctx);

        match command {
            Command::Upload {
                filename,
                size,
                compressed,
            } => {
                let destination = self.catalog.destination(filename)?;
                let incoming = Incoming::stage(
                    &destination,
                    *size,
                    *compressed,
                    self.chunk_size,
                    Operation::Upload,
                )?;
                Ok(Action::Receive(incoming))
            }
            Command::Download {
                filename,
                compressed,
            } => {
                let path = self.catalog.resolve_path(filename)?;
                let outgoing = Outgoing::open(
                    &path,
                    *compressed,
                    self.chunk_size,
                    Operation::Download,
                    self.catalog.root(),
                )?;
                Ok(Action::Send(outgoing))
            }
            Command::List => Ok(Action::Reply(Response::Listing(self.catalog.list_all()?))),
            Command::Search { pattern } => {
                Ok(Action::Reply(Response::Listing(self.catalog.search(pattern)?)))
            }
        }
    }

    /// Publish a fully received upload and build its reply.
    pub fn complete_upload(
        &self,
        incoming: Incoming,
        peer: &LogContext,
    ) -> Result<Response, ExchangeError> {
        let destination = incoming.destination().display().to_string();
        let result = incoming.commit()?;
        info!(
            "{peer} upload complete: {destination} ({} bytes stored, {} on the wire)",
            result.size, result.bytes_transferred
        );
        Ok(Response::Stored { size: result.size })
    }

    pub fn complete_download(&self, result: &TransferResult, peer: &LogContext) {
        info!(
            "{peer} download complete: {} bytes sent (compressed: {})",
            result.bytes_transferred, result.compressed
        );
    }

    /// Translate a failed command into the reply to send before closing.
    /// A vanished peer gets no reply.
    pub fn failure_reply(&self, err: &ExchangeError, peer: &LogContext) -> Option<Response> {
        if err.is_disconnect() {
            debug!("{peer} {err}");
            None
        } else {
            warn!("{peer} {err}");
            Some(Response::from(err))
        }
    }
}
