//! One-shot readiness handshake between a worker and the master.
//!
//! The master creates a fresh pipe before each spawn and inherits only the
//! write end into the child, at a fixed descriptor slot. Once the worker is
//! accepting connections it writes a single sentinel byte and closes its
//! end; the master reads exactly that byte before it retires the previous
//! generation, so there is never a moment with no accepting generation.

use std::io::PipeReader;
use std::os::fd::{AsRawFd, OwnedFd};

use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;

use crate::bootstrap::READY_PIPE_FD;
use crate::error::StarterError;

/// Sentinel byte a worker writes once it is accepting connections.
pub(crate) const READY_BYTE: u8 = b'r';

/// Worker side: writes the sentinel to the inherited write end, then closes
/// it.
///
/// The descriptor slot holds the pipe only by protocol, so the write and
/// close go through raw calls; a second call fails with `EBADF` instead of
/// closing an unrelated handle.
pub(crate) fn send_ready() -> Result<(), StarterError> {
    let buf = [READY_BYTE];
    let written = unsafe { nix::libc::write(READY_PIPE_FD, buf.as_ptr().cast(), 1) };
    if written != 1 {
        let source = if written < 0 {
            std::io::Error::last_os_error()
        } else {
            std::io::Error::new(std::io::ErrorKind::WriteZero, "short write")
        };
        return Err(StarterError::Io {
            context: "sending readiness to the master".to_string(),
            source,
        });
    }
    unsafe { nix::libc::close(READY_PIPE_FD) };
    Ok(())
}

/// Master side: waits for the sentinel from a freshly spawned worker.
///
/// Succeeds only when exactly one byte arrives and it matches the sentinel.
/// A closed pipe, a mismatched byte, extra bytes or an i/o error is a
/// protocol failure; the caller must not retire the previous generation in
/// that case.
pub(crate) async fn wait_ready(read_end: PipeReader) -> Result<(), StarterError> {
    let fd = OwnedFd::from(read_end);
    // The runtime expects a nonblocking descriptor; anonymous pipes start
    // out blocking.
    let rc = unsafe {
        nix::libc::fcntl(fd.as_raw_fd(), nix::libc::F_SETFL, nix::libc::O_NONBLOCK)
    };
    if rc == -1 {
        return Err(StarterError::Io {
            context: "switching the readiness pipe to nonblocking mode".to_string(),
            source: std::io::Error::last_os_error(),
        });
    }
    let mut receiver =
        pipe::Receiver::from_owned_fd(fd).map_err(|e| StarterError::Protocol {
            message: format!("failed to register readiness pipe: {}", e),
        })?;

    let mut buf = [0u8; 2];
    let n = receiver
        .read(&mut buf)
        .await
        .map_err(|e| StarterError::Protocol {
            message: format!("failed to read readiness byte: {}", e),
        })?;
    match (n, buf[0]) {
        (1, READY_BYTE) => Ok(()),
        (0, _) => Err(StarterError::Protocol {
            message: "readiness pipe closed before any byte arrived".to_string(),
        }),
        (1, other) => Err(StarterError::Protocol {
            message: format!("unexpected readiness byte {:#04x}", other),
        }),
        (n, _) => Err(StarterError::Protocol {
            message: format!("expected one readiness byte, received {}", n),
        }),
    }
}

#[cfg(test)]
#[path = "handshake_tests.rs"]
mod tests;
