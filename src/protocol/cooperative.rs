//! Single-threaded cooperative adapter.
//!
//! One tokio current-thread runtime multiplexes every connection. Socket and
//! file-chunk I/O are awaited directly; dispatcher calls that touch the
//! filesystem in bulk (catalog scans, staging, compression, the final
//! rename) run on tokio's blocking pool and are awaited too, so no handler
//! ever stalls the scheduler.
use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};

use crate::{
    ExchangeError, ServerError,
    logging::LogContext,
    transfer::{TransferResult, receive_payload_async, send_payload_async},
};

use super::{
    AsyncTransport, Command, Response,
    dispatcher::{Action, Connection, ConnectionState, Dispatcher},
};

pub(crate) fn run(
    listener: std::net::TcpListener,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    ctx: LogContext,
) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;
    runtime.block_on(accept_loop(listener, dispatcher, idle_timeout, ctx))
}

async fn accept_loop(
    listener: std::net::TcpListener,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    ctx: LogContext,
) -> Result<(), ServerError> {
    listener.set_nonblocking(true).map_err(ServerError::Bind)?;
    let listener = TcpListener::from_std(listener).map_err(ServerError::Bind)?;
    let address = listener.local_addr().map_err(ServerError::Bind)?;
    info!("{ctx} cooperative server listening at {address}");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let conn_ctx = ctx.child(peer);
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    info!("{conn_ctx} connection opened");
                    if let Err(e) =
                        handle_connection(stream, dispatcher, idle_timeout, conn_ctx.clone()).await
                    {
                        debug!("{conn_ctx} session ended with error: {e}");
                    }
                });
            }
            Err(e) => warn!("{ctx} broken connection: {e:?}"),
        }
    }
}

/// Serve one connection until the peer leaves or a command fails.
pub async fn handle_connection<T>(
    stream: T,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    ctx: LogContext,
) -> Result<(), ExchangeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut transport = AsyncTransport::new(stream, idle_timeout);
    let mut connection = Connection::new(ctx);
    let outcome = command_loop(&mut transport, &dispatcher, &mut connection).await;
    connection.close();
    outcome
}

async fn command_loop<T>(
    transport: &mut AsyncTransport<T>,
    dispatcher: &Arc<Dispatcher>,
    connection: &mut Connection,
) -> Result<(), ExchangeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let result = match transport.read_command().await {
            Ok(command) => execute(transport, dispatcher, connection, command).await,
            Err(e) if e.is_disconnect() && connection.state() == ConnectionState::AwaitCommand => {
                debug!("{} {e}", connection.ctx());
                return Ok(());
            }
            Err(e) => Err(e),
        };

        if let Err(err) = result {
            if let Some(reply) = dispatcher.failure_reply(&err, connection.ctx()) {
                let _ = transport.write_response(&reply).await;
            }
            return Err(err);
        }
        connection.responded()?;
    }
}

async fn execute<T>(
    transport: &mut AsyncTransport<T>,
    dispatcher: &Arc<Dispatcher>,
    connection: &mut Connection,
    command: Command,
) -> Result<(), ExchangeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    info!("{} command received: {command}", connection.ctx());
    connection.begin(&command)?;

    let planner = Arc::clone(dispatcher);
    let peer = connection.ctx().clone();
    let action = off_scheduler(move || planner.plan(&command, &peer)).await?;

    match action {
        Action::Reply(resp) => transport.write_response(&resp).await,
        Action::Receive(mut incoming) => {
            let idle_timeout = transport.idle_timeout();
            let received =
                receive_payload_async(transport.stream_mut(), &mut incoming, idle_timeout).await;
            if let Err(e) = received {
                discard(incoming).await;
                return Err(e);
            }

            let finisher = Arc::clone(dispatcher);
            let peer = connection.ctx().clone();
            let resp = off_scheduler(move || finisher.complete_upload(incoming, &peer)).await?;
            transport.write_response(&resp).await
        }
        Action::Send(mut outgoing) => {
            let sent: Result<TransferResult, ExchangeError> = async {
                transport
                    .write_response(&Response::Payload {
                        size: outgoing.wire_size(),
                    })
                    .await?;
                send_payload_async(transport.stream_mut(), &mut outgoing).await
            }
            .await;
            discard(outgoing).await;

            dispatcher.complete_download(&sent?, connection.ctx());
            Ok(())
        }
    }
}

/// Drop `value` on the blocking pool. Dropping staged transfers deletes
/// their temporary files.
async fn discard<T: Send + 'static>(value: T) {
    if let Err(e) = tokio::task::spawn_blocking(move || drop(value)).await {
        warn!("temporary file cleanup failed: {e}");
    }
}

/// Run filesystem-bound dispatcher work on the blocking pool and await it.
async fn off_scheduler<F, R>(work: F) -> Result<R, ExchangeError>
where
    F: FnOnce() -> Result<R, ExchangeError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ExchangeError::StorageError(format!("storage task failed: {e}")))?
}
