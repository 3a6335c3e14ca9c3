//! Client process: stream one file to a server.
//!
//! Owns only process setup — argument parsing, host resolution, logging and
//! exit-code mapping.  All protocol work happens in
//! [`udp_file_transfer::client`].
//!
//! Every setup or fatal protocol error prints `ERROR: <message>` to stderr
//! and exits with status 1.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::lookup_host;

use udp_file_transfer::client;

/// Reliable file transfer over UDP — client.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Server hostname or IPv4 address.
    host: String,
    /// Server UDP port (1024–65535).
    port: String,
    /// File to transfer.
    file: PathBuf,
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
    let server = resolve(&cli.host, port).await?;
    log::info!("sending {} to {server}", cli.file.display());

    client::run(server, &cli.file).await?;
    Ok(())
}

fn parse_port(raw: &str) -> Result<u16, Box<dyn Error>> {
    match raw.parse::<u32>() {
        Ok(p) if (1024..=65535).contains(&p) => Ok(p as u16),
        _ => Err("Port number needs to be a valid integer greater than 1023.".into()),
    }
}

/// Resolve a hostname or dotted-quad address to an IPv4 socket address.
async fn resolve(host: &str, port: u16) -> Result<SocketAddr, Box<dyn Error>> {
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|_| "Host name is invalid.")?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| "Host name is invalid.".into())
}
