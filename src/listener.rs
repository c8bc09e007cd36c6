//! Listening sockets shared across worker generations.
//!
//! The master creates its listeners once, before the first spawn, and the
//! same underlying sockets are duplicated into every subsequent generation.
//! No generation may close or reconfigure a socket it did not create.

use std::net::TcpListener;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixListener;

use nix::libc;

use crate::error::StarterError;

/// A listening socket owned by the master and handed to every worker
/// generation as an inherited descriptor.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    /// Reconstructs a listener from a descriptor inherited across exec.
    ///
    /// Verifies the descriptor really is a stream socket before taking
    /// ownership, and picks the handle type from the socket's address
    /// family. On failure the descriptor is left untouched.
    pub(crate) fn from_inherited_fd(fd: RawFd) -> Result<Self, StarterError> {
        match socket_family(fd)? {
            libc::AF_INET | libc::AF_INET6 => {
                Ok(Self::Tcp(unsafe { TcpListener::from_raw_fd(fd) }))
            }
            libc::AF_UNIX => Ok(Self::Unix(unsafe { UnixListener::from_raw_fd(fd) })),
            family => Err(StarterError::Io {
                context: format!(
                    "reconstructing descriptor {} with unsupported socket family {}",
                    fd, family
                ),
                source: std::io::Error::from_raw_os_error(libc::EAFNOSUPPORT),
            }),
        }
    }

    pub fn into_tcp(self) -> Option<TcpListener> {
        match self {
            Self::Tcp(listener) => Some(listener),
            Self::Unix(_) => None,
        }
    }

    pub fn into_unix(self) -> Option<UnixListener> {
        match self {
            Self::Unix(listener) => Some(listener),
            Self::Tcp(_) => None,
        }
    }
}

impl From<TcpListener> for Listener {
    fn from(listener: TcpListener) -> Self {
        Self::Tcp(listener)
    }
}

impl From<UnixListener> for Listener {
    fn from(listener: UnixListener) -> Self {
        Self::Unix(listener)
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(listener) => listener.as_raw_fd(),
            Self::Unix(listener) => listener.as_raw_fd(),
        }
    }
}

/// Probes a descriptor with `getsockopt(SO_TYPE)` and `getsockname`.
///
/// `SO_TYPE` distinguishes "not a socket at all" from a socket of the wrong
/// shape; both are i/o errors here.
fn socket_family(fd: RawFd) -> Result<i32, StarterError> {
    let mut sock_type: libc::c_int = 0;
    let mut type_len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            std::ptr::addr_of_mut!(sock_type).cast(),
            &mut type_len,
        )
    };
    if rc != 0 {
        return Err(StarterError::Io {
            context: format!("checking that inherited descriptor {} is a socket", fd),
            source: std::io::Error::last_os_error(),
        });
    }
    if sock_type != libc::SOCK_STREAM {
        return Err(StarterError::Io {
            context: format!("inherited descriptor {} is not a stream socket", fd),
            source: std::io::Error::from_raw_os_error(libc::ESOCKTNOSUPPORT),
        });
    }

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = unsafe { libc::getsockname(fd, std::ptr::addr_of_mut!(storage).cast(), &mut len) };
    if rc != 0 {
        return Err(StarterError::Io {
            context: format!("reading the address family of inherited descriptor {}", fd),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(i32::from(storage.ss_family))
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
