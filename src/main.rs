//! Entry point for `rudp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing) and turning errors into exit codes.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rudp::{ConnError, ConnectionConfig, ConnectionRegistry, DEFAULT_TIMEOUT};

/// Reliable Stop-and-Wait messaging over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send one message and wait for it to be acknowledged.
    Send {
        /// Remote IPv4 address.
        #[arg(short, long, default_value = "127.0.0.1")]
        remote: String,
        /// Remote port.
        #[arg(short, long)]
        port: u16,
        /// Local port to send from (ephemeral if omitted).
        #[arg(short, long)]
        local: Option<u16>,
        /// Give up after this many transmissions (retry forever if omitted).
        #[arg(long)]
        retries: Option<u32>,
        /// ACK timeout in milliseconds.
        #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_millis() as u64)]
        timeout_ms: u64,
        /// Message to send.
        message: String,
    },
    /// Bind a port and print incoming messages.
    Recv {
        /// Local port to listen on.
        #[arg(short, long)]
        port: u16,
        /// Stop after this many messages (run forever if omitted).
        #[arg(short, long)]
        count: Option<usize>,
        /// Largest message accepted, in bytes.
        #[arg(long, default_value_t = 64)]
        capacity: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let registry = ConnectionRegistry::new();

    let result = match cli.mode {
        Mode::Send {
            remote,
            port,
            local,
            retries,
            timeout_ms,
            message,
        } => send(&registry, &remote, port, local, retries, timeout_ms, &message).await,
        Mode::Recv {
            port,
            count,
            capacity,
        } => recv(&registry, port, count, capacity).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("rudp: {e}");
            ExitCode::from(u8::try_from(e.code()).unwrap_or(u8::MAX))
        }
    }
}

async fn send(
    registry: &ConnectionRegistry,
    remote: &str,
    port: u16,
    local: Option<u16>,
    retries: Option<u32>,
    timeout_ms: u64,
    message: &str,
) -> Result<(), ConnError> {
    let handle = registry.create(timeout_ms).await?;
    let conn = registry.get(handle)?;
    log::info!("Connection made with handle {handle}");

    if let Some(local) = local {
        conn.set_local_endpoint(local).await?;
    }
    if let Some(retries) = retries {
        conn.set_send_retry_limit(retries).await?;
    }
    let dest = conn.set_remote_endpoint(remote, port).await?;

    let sent = conn.send(message.as_bytes()).await?;
    println!("Sent {sent} bytes to {dest}: {message}");

    registry.remove(handle);
    Ok(())
}

async fn recv(
    registry: &ConnectionRegistry,
    port: u16,
    count: Option<usize>,
    capacity: usize,
) -> Result<(), ConnError> {
    // The ACK timeout only bounds sends; a receiver waits indefinitely.
    let handle = registry.create_with(ConnectionConfig::default()).await?;
    let conn = registry.get(handle)?;
    log::info!("Connection made with handle {handle}");

    let bound = conn.set_local_endpoint(port).await?;
    log::info!("Listening on {bound}");

    let mut buf = vec![0u8; capacity];
    let mut received = 0usize;
    while count.map_or(true, |count| received < count) {
        let (n, peer) = conn.receive(&mut buf).await?;
        println!(
            "Received {n} bytes from {peer}: {}",
            String::from_utf8_lossy(&buf[..n])
        );
        received += 1;
    }

    registry.remove(handle);
    Ok(())
}
