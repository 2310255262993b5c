pub mod client;
pub mod config;
mod error;
pub mod logging;
pub mod protocol;
pub mod storage;
pub mod transfer;

pub use client::ExchangeClient;
pub use config::{ClientConfig, DEFAULT_PORT, ServeMode, ServerConfig};
pub use error::{ErrorKind, ExchangeError, ServerError};
pub use protocol::{ExchangeServer, serve};
pub use storage::{Catalog, FileRecord};
pub use transfer::{TransferResult, TransferSession};
