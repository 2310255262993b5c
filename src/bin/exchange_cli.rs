use std::{
    error::Error,
    fs,
    net::{IpAddr, SocketAddr, TcpStream},
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use exchanger::{ClientConfig, ExchangeClient, client, config::DEFAULT_PORT, logging};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};

#[derive(Debug, Parser)]
#[command(version, about = "Exchange files with an exchange server", long_about = None)]
struct Cli {
    /// Server address
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: IpAddr,
    /// Server port
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,
    #[command(subcommand)]
    command: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Upload a single file
    Upload {
        file: PathBuf,
        /// Compress the payload before sending
        #[arg(long)]
        compress: bool,
    },
    /// Download a file into a directory
    Download {
        name: String,
        /// Ask for a compressed payload and decompress it locally
        #[arg(long)]
        decompress: bool,
        /// Directory to save the file in
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List every file on the server
    List,
    /// List files matching a wildcard pattern (e.g. '*.txt')
    Search { pattern: String },
    /// Upload every regular file in a directory, one connection per file
    Share {
        directory: PathBuf,
        #[arg(long)]
        compress: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    logging::init();

    let cli = Cli::parse();
    let config = ClientConfig {
        address: SocketAddr::new(cli.host, cli.port),
        ..ClientConfig::default()
    };

    match cli.command {
        Action::Upload { file, compress } => {
            let bar = transfer_bar(&format!("uploading {}", file.display()))?;
            let mut conn = with_bar(ExchangeClient::connect_with(&config)?, &bar);
            match client::upload(&mut conn, &file, compress) {
                Ok(result) => {
                    bar.finish_with_message(format!("uploaded {}", file.display()));
                    info!(
                        "upload complete: {} ({} bytes sent, {} stored)",
                        file.display(),
                        result.bytes_transferred,
                        result.size
                    );
                }
                Err(e) => {
                    bar.abandon();
                    return Err(e.into());
                }
            }
        }
        Action::Download {
            name,
            decompress,
            output_dir,
        } => {
            let bar = transfer_bar(&format!("downloading {name}"))?;
            let mut conn = with_bar(ExchangeClient::connect_with(&config)?, &bar);
            match conn.download_to(&name, decompress, &output_dir) {
                Ok(result) => {
                    bar.finish_with_message(format!("downloaded {name}"));
                    info!("download complete: {name} ({} bytes)", result.size);
                }
                Err(e) => {
                    bar.abandon();
                    return Err(e.into());
                }
            }
        }
        Action::List => {
            let mut conn = ExchangeClient::connect_with(&config)?;
            print_records(&client::list_files(&mut conn)?);
        }
        Action::Search { pattern } => {
            let mut conn = ExchangeClient::connect_with(&config)?;
            print_records(&client::search(&mut conn, &pattern)?);
        }
        Action::Share {
            directory,
            compress,
        } => {
            for (path, outcome) in client::share(&config, regular_files(&directory)?, compress) {
                match outcome {
                    Ok(result) => info!("shared {} ({} bytes)", path.display(), result.size),
                    Err(e) => error!("failed to share {}: {e}", path.display()),
                }
            }
        }
    }

    Ok(())
}

/// Byte progress bar; its length is set once the wire size is known.
fn transfer_bar(message: &str) -> Result<ProgressBar, Box<dyn Error>> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(
                "{msg}\n{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )?
            .progress_chars("#>-"),
    );
    bar.set_message(message.to_string());
    Ok(bar)
}

fn with_bar(conn: ExchangeClient<TcpStream>, bar: &ProgressBar) -> ExchangeClient<TcpStream> {
    let length = bar.clone();
    let position = bar.clone();
    conn.with_start_hook(Arc::new(move |size| {
        length.set_length(size);
        length.set_position(0);
    }))
    .with_progress(Arc::new(move |n| position.inc(n)))
}

fn print_records(records: &[exchanger::FileRecord]) {
    for record in records {
        println!("{}\t{}", record.name, record.size);
    }
}

/// Regular files directly inside `dir`, sorted by name.
fn regular_files(dir: &Path) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
