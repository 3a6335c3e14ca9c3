//! Server process: accept connections and write each to `<dir>/<id>.file`.
//!
//! Owns only process setup — argument parsing, directory creation, signal
//! handling, logging and exit-code mapping.  All protocol work happens in
//! [`udp_file_transfer::server`].
//!
//! SIGTERM and SIGQUIT terminate with status 0; setup failures and
//! unrecoverable socket errors print `ERROR: <message>` to stderr and exit
//! with status 1.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use udp_file_transfer::server::Server;

/// Reliable file transfer over UDP — server.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// UDP port to listen on (1024–65535).
    port: String,
    /// Directory that receives one `<connectionID>.file` per connection
    /// (created if absent).
    file_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let port = parse_port(&cli.port)?;

    tokio::fs::create_dir_all(&cli.file_dir)
        .await
        .map_err(|_| "Unable to create directory.")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let mut server = Server::bind(addr, cli.file_dir).await?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        res = server.run() => res?,
        _ = sigterm.recv() => log::info!("SIGTERM received; shutting down"),
        _ = sigquit.recv() => log::info!("SIGQUIT received; shutting down"),
    }
    Ok(())
}

fn parse_port(raw: &str) -> Result<u16, Box<dyn Error>> {
    match raw.parse::<u32>() {
        Ok(p) if (1024..=65535).contains(&p) => Ok(p as u16),
        _ => Err("Port number needs to be a valid integer greater than 1023.".into()),
    }
}
