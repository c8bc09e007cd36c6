//! Line-echo server demonstrating graceful restarts.
//!
//! Run it, connect with `nc`, then send the master SIGHUP and watch the
//! serving pid change without dropping the listening socket. The first line
//! each connection receives identifies the worker pid; every following line
//! is echoed back.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::signal::unix::{signal, SignalKind};

use server_starter::{Listener, Starter, StarterConfig};

#[derive(Parser, Debug)]
#[command(about = "Echo server with graceful restart on SIGHUP")]
struct Cli {
    /// Address the master binds the listening socket to.
    #[arg(long, default_value = "127.0.0.1:7878")]
    addr: String,

    /// How long the master waits for an old worker before SIGKILL.
    #[arg(long, default_value_t = 60_000)]
    shutdown_timeout_ms: u64,

    /// Artificial delay before the worker reports readiness.
    #[arg(long, default_value_t = 0)]
    ready_delay_ms: u64,

    /// Make the worker ignore SIGTERM, forcing the master to escalate.
    #[arg(long)]
    ignore_term: bool,

    /// Skip the readiness handshake and treat a spawned worker as ready
    /// immediately.
    #[arg(long)]
    no_ready_handshake: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let starter = Starter::with_config(
        StarterConfig::default()
            .shutdown_wait_timeout(Duration::from_millis(cli.shutdown_timeout_ms))
            .readiness_handshake(!cli.no_ready_handshake),
    );

    if starter.is_master() {
        run_master(starter, &cli).await
    } else {
        run_worker(starter, &cli).await
    }
}

async fn run_master(starter: Starter, cli: &Cli) -> anyhow::Result<()> {
    let listener = std::net::TcpListener::bind(&cli.addr)
        .with_context(|| format!("binding {}", cli.addr))?;
    eprintln!(
        "[master] pid={} listening on {}",
        std::process::id(),
        cli.addr
    );
    starter.run_master(vec![Listener::from(listener)]).await?;
    eprintln!("[master] pid={} stopped", std::process::id());
    Ok(())
}

async fn run_worker(starter: Starter, cli: &Cli) -> anyhow::Result<()> {
    let mut listeners = starter.listeners()?;
    if listeners.len() != 1 {
        bail!("expected exactly one inherited listener, got {}", listeners.len());
    }
    let listener = listeners
        .pop()
        .and_then(Listener::into_tcp)
        .context("inherited listener is not a TCP socket")?;
    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;

    if cli.ready_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(cli.ready_delay_ms)).await;
    }
    starter.signal_ready()?;
    eprintln!("[worker] pid={} accepting connections", std::process::id());

    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                if cli.ignore_term {
                    eprintln!("[worker] pid={} ignoring SIGTERM", std::process::id());
                    continue;
                }
                eprintln!("[worker] pid={} shutting down", std::process::id());
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("accepting connection")?;
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream).await {
                        eprintln!("[worker] connection error: {}", e);
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: TcpStream) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(format!("pid {}\n", std::process::id()).as_bytes())
        .await?;
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        write_half.write_all(line.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
    }
    Ok(())
}
