//! Wire protocol, command dispatch and the two concurrency adapters.
//!
//! # Overview
//!
//! The control plane is line-oriented text; the payload plane is raw bytes
//! whose length was declared in the preceding control line:
//!
//! ```text
//! UPLOAD <filename> <size> [COMPRESS]\n<size bytes>   ->  OK <stored size>\n
//! DOWNLOAD <filename> [DECOMPRESS]\n                  ->  OK <size>\n<size bytes>
//! LIST\n                                              ->  OK <n>\n<name> <size>\n...
//! SEARCH <pattern>\n                                  ->  OK <n>\n<name> <size>\n...
//! any failure                                         ->  ERROR:<kind> <message>\n, then close
//! ```
//!
//! A connection serves commands one at a time until the peer hangs up or a
//! command fails.
//!
//! # Key Components
//!
//! - [`Command`] / [`Response`]: parsed control lines and their encodings.
//! - [`ProtocolTransport`] / [`AsyncTransport`]: blocking and cooperative framing.
//! - [`Dispatcher`]: turns a command into an [`Action`]; owns every decision that
//!   is visible on the wire.
//! - [`ExchangeServer`]: binds the storage root and a listener, then runs either
//!   the thread-per-connection or the cooperative adapter.
//!
//! Both adapters call the same dispatcher and codec functions; the only
//! difference between them is how they wait.
mod async_transport;
pub mod cooperative;
mod dispatcher;
mod request;
mod response;
mod server;
pub mod threaded;
mod transport;

pub use async_transport::{
    AsyncTransport, decode_command_async, read_exact_async, read_line_async, write_chunk_async,
};
pub use dispatcher::{Action, Connection, ConnectionState, Dispatcher};
pub use request::{COMPRESS_FLAG, Command, DECOMPRESS_FLAG, encode_command};
pub use response::{Response, parse_record, parse_status};
pub use server::{ExchangeServer, serve};
pub use transport::{
    MAX_LINE_LEN, ProtocolTransport, decode_command, read_exact, read_exact_into, read_line,
    write_chunk,
};
