use std::{
    error::Error,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;
use exchanger::{
    ExchangeServer, ServeMode, ServerConfig,
    config::{DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT, DEFAULT_STORAGE_DIR},
    logging,
    transfer::DEFAULT_CHUNK_SIZE,
};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about = "Serve a directory of files over TCP", long_about = None)]
struct Cli {
    /// Path to storage directory
    #[arg(default_value = DEFAULT_STORAGE_DIR)]
    path: PathBuf,
    /// Concurrency model used to serve connections
    #[arg(long, value_enum, default_value_t = ServeMode::Threaded)]
    mode: ServeMode,
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,
    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Payload chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Seconds a connection may stay silent before it is dropped
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    idle_timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    logging::init();

    let cli = Cli::parse();
    ctrlc::set_handler(|| {
        info!("interrupted, shutting down");
        std::process::exit(130);
    })?;

    let config = ServerConfig::new(SocketAddr::new(cli.host, cli.port), cli.path)
        .with_mode(cli.mode)
        .with_chunk_size(cli.chunk_size)
        .with_idle_timeout(Duration::from_secs(cli.idle_timeout));
    let server = ExchangeServer::bind(config)?;

    server.listen()?;
    Ok(())
}
