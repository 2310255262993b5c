use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    ExchangeError, ServerError,
    logging::LogContext,
    transfer::{receive_payload, send_payload},
};

use super::{
    Command, ProtocolTransport, Response,
    dispatcher::{Action, Connection, ConnectionState, Dispatcher},
};

/// Accept connections forever, handing each to its own blocking worker.
pub(crate) fn run(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    ctx: LogContext,
) -> Result<(), ServerError> {
    let address = listener.local_addr().map_err(ServerError::Bind)?;
    info!("{ctx} thread-per-connection server listening at {address}");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                let conn_ctx = ctx.child(&peer);
                let dispatcher = Arc::clone(&dispatcher);

                let spawned = thread::Builder::new()
                    .name(format!("conn-{peer}"))
                    .spawn(move || {
                        if let Err(e) =
                            handle_connection(stream, &dispatcher, idle_timeout, conn_ctx.clone())
                        {
                            debug!("{conn_ctx} session ended with error: {e}");
                        }
                    });
                if let Err(e) = spawned {
                    warn!("{ctx} failed to spawn connection worker: {e}");
                }
            }
            Err(e) => warn!("{ctx} broken connection: {e:?}"),
        }
    }
    Ok(())
}

/// Serve one connection until the peer leaves or a command fails.
pub fn handle_connection(
    stream: TcpStream,
    dispatcher: &Dispatcher,
    idle_timeout: Duration,
    ctx: LogContext,
) -> Result<(), ExchangeError> {
    stream
        .set_read_timeout(Some(idle_timeout))
        .map_err(ExchangeError::from_socket)?;
    info!("{ctx} connection opened");

    let mut transport = ProtocolTransport::new(stream);
    serve(&mut transport, dispatcher, ctx)
}

/// Command loop over any blocking stream.
pub fn serve<T: Read + Write>(
    transport: &mut ProtocolTransport<T>,
    dispatcher: &Dispatcher,
    ctx: LogContext,
) -> Result<(), ExchangeError> {
    let mut connection = Connection::new(ctx);
    let outcome = command_loop(transport, dispatcher, &mut connection);
    connection.close();
    outcome
}

fn command_loop<T: Read + Write>(
    transport: &mut ProtocolTransport<T>,
    dispatcher: &Dispatcher,
    connection: &mut Connection,
) -> Result<(), ExchangeError> {
    loop {
        let result = match transport.read_command() {
            Ok(command) => execute(transport, dispatcher, connection, command),
            Err(e) if e.is_disconnect() && connection.state() == ConnectionState::AwaitCommand => {
                debug!("{} {e}", connection.ctx());
                return Ok(());
            }
            Err(e) => Err(e),
        };

        if let Err(err) = result {
            if let Some(reply) = dispatcher.failure_reply(&err, connection.ctx()) {
                let _ = transport.write_response(&reply);
            }
            return Err(err);
        }
        connection.responded()?;
    }
}

fn execute<T: Read + Write>(
    transport: &mut ProtocolTransport<T>,
    dispatcher: &Dispatcher,
    connection: &mut Connection,
    command: Command,
) -> Result<(), ExchangeError> {
    info!("{} command received: {command}", connection.ctx());
    connection.begin(&command)?;

    match dispatcher.plan(&command, connection.ctx())? {
        Action::Reply(resp) => transport.write_response(&resp),
        Action::Receive(mut incoming) => {
            receive_payload(transport, &mut incoming)?;
            let resp = dispatcher.complete_upload(incoming, connection.ctx())?;
            transport.write_response(&resp)
        }
        Action::Send(mut outgoing) => {
            transport.write_response(&Response::Payload {
                size: outgoing.wire_size(),
            })?;
            let result = send_payload(transport, &mut outgoing)?;
            dispatcher.complete_download(&result, connection.ctx());
            Ok(())
        }
    }
}
