//! Error taxonomy for starter operations.
//!
//! Configuration, spawn, signal-delivery and protocol failures during
//! startup or during a reload's readiness confirmation are fatal and abort
//! the master loop. An unsolicited worker crash is not an error: the master
//! recovers it by respawning.

use std::process::ExitStatus;

use nix::sys::signal::Signal;

/// Errors surfaced by the starter.
#[derive(Debug)]
pub enum StarterError {
    /// The discriminator environment variable holds something other than a
    /// non-negative decimal integer.
    Configuration { message: String },
    /// A pipe, descriptor or socket operation failed.
    Io {
        context: String,
        source: std::io::Error,
    },
    /// Resolving the binary path or creating the worker process failed.
    Spawn { message: String },
    /// A signal could not be delivered to a worker process.
    SignalDelivery {
        pid: i32,
        signal: Signal,
        source: nix::Error,
    },
    /// The readiness handshake was malformed or missing.
    Protocol { message: String },
    /// The worker exited unsuccessfully while the master was stopping.
    WorkerExit { status: ExitStatus },
}

impl std::fmt::Display for StarterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StarterError::Configuration { message } => {
                write!(f, "configuration error: {}", message)
            }
            StarterError::Io { context, source } => {
                write!(f, "i/o error while {}: {}", context, source)
            }
            StarterError::Spawn { message } => {
                write!(f, "failed to spawn worker: {}", message)
            }
            StarterError::SignalDelivery {
                pid,
                signal,
                source,
            } => {
                write!(
                    f,
                    "failed to deliver {:?} to worker pid={}: {}",
                    signal, pid, source
                )
            }
            StarterError::Protocol { message } => {
                write!(f, "readiness protocol error: {}", message)
            }
            StarterError::WorkerExit { status } => {
                write!(
                    f,
                    "worker exited unsuccessfully during shutdown: {}",
                    status
                )
            }
        }
    }
}

impl std::error::Error for StarterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StarterError::Io { source, .. } => Some(source),
            StarterError::SignalDelivery { source, .. } => Some(source),
            _ => None,
        }
    }
}
