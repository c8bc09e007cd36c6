//! Graceful restart for long-running network servers.
//!
//! A single binary runs in two roles. The master process binds the listening
//! sockets once and keeps them for its whole lifetime; it then re-executes
//! its own binary to spawn a worker that inherits the sockets and serves
//! traffic on them. On SIGHUP the master spawns a fresh worker, waits until
//! it reports readiness over an inherited pipe, and only then asks the old
//! worker to shut down. Listening sockets stay bound throughout, so clients
//! never see a connection-refused window during a binary upgrade: swap the
//! executable on disk, send SIGHUP, done.
//!
//! SIGINT and SIGTERM stop the worker and return from the supervision loop.
//! A worker that exits on its own is restarted. An old worker that ignores
//! its shutdown signal is killed after a configurable timeout.
//!
//! ```no_run
//! use server_starter::{Listener, Starter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let starter = Starter::new();
//!     if starter.is_master() {
//!         let listener = std::net::TcpListener::bind("127.0.0.1:8080")?;
//!         starter.run_master(vec![Listener::from(listener)]).await?;
//!         return Ok(());
//!     }
//!
//!     let listener = starter
//!         .listeners()?
//!         .pop()
//!         .and_then(Listener::into_tcp)
//!         .ok_or("expected one TCP listener")?;
//!     listener.set_nonblocking(true)?;
//!     let listener = tokio::net::TcpListener::from_std(listener)?;
//!     starter.signal_ready()?;
//!     loop {
//!         let (socket, _) = listener.accept().await?;
//!         drop(socket);
//!     }
//! }
//! ```

mod bootstrap;
pub mod config;
pub mod error;
mod handshake;
mod listener;
mod master;
mod starter;

pub use bootstrap::Role;
pub use config::StarterConfig;
pub use error::StarterError;
pub use listener::Listener;
pub use starter::Starter;
