//! Role detection and the worker-side descriptor bootstrap.
//!
//! The discriminator environment variable carries two facts across the exec
//! boundary: its presence marks the process as a worker, and its value is
//! the number of listener descriptors the worker inherited. The environment
//! is read exactly once, at [`crate::Starter`] construction, into a
//! [`BootstrapEnv`] value that the rest of the crate consumes.

use std::ffi::OsString;
use std::os::fd::RawFd;

use crate::error::StarterError;
use crate::listener::Listener;

/// stdin, stdout, stderr.
pub(crate) const STD_FD_COUNT: RawFd = 3;

/// Descriptor slot of the readiness pipe write end in a worker.
pub(crate) const READY_PIPE_FD: RawFd = STD_FD_COUNT;

/// First listener descriptor slot in a worker. The readiness pipe, when
/// enabled, occupies the slot right after the standard streams and pushes
/// the listeners one slot up.
pub(crate) const fn listener_fd_base(handshake: bool) -> RawFd {
    if handshake {
        STD_FD_COUNT + 1
    } else {
        STD_FD_COUNT
    }
}

/// Whether this process is the long-lived master or a spawned worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker,
}

/// Bootstrap state captured from the process environment.
///
/// The raw value is kept unparsed so that a malformed count only fails when
/// listeners are actually acquired; mere presence, whatever the value, is
/// enough to identify a worker.
#[derive(Debug, Clone)]
pub(crate) struct BootstrapEnv {
    value: Option<OsString>,
}

impl BootstrapEnv {
    pub(crate) fn capture(env_name: &str) -> Self {
        Self {
            value: std::env::var_os(env_name),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_value(value: Option<&str>) -> Self {
        Self {
            value: value.map(OsString::from),
        }
    }

    pub(crate) fn role(&self) -> Role {
        if self.value.is_some() {
            Role::Worker
        } else {
            Role::Master
        }
    }

    /// The inherited listener count, or `None` in the master.
    pub(crate) fn listener_count(&self) -> Result<Option<usize>, StarterError> {
        let raw = match &self.value {
            None => return Ok(None),
            Some(raw) => raw,
        };
        let text = raw.to_str().ok_or_else(|| StarterError::Configuration {
            message: "listener count is not valid UTF-8".to_string(),
        })?;
        let count = text
            .parse::<usize>()
            .map_err(|e| StarterError::Configuration {
                message: format!("invalid listener count {:?}: {}", text, e),
            })?;
        Ok(Some(count))
    }
}

/// Reconstructs the listeners a worker inherited, in export order.
///
/// Returns an empty sequence in the master, whose listeners are created
/// directly rather than inherited.
pub(crate) fn acquire_listeners(
    env: &BootstrapEnv,
    handshake: bool,
) -> Result<Vec<Listener>, StarterError> {
    let count = match env.listener_count()? {
        None => return Ok(Vec::new()),
        Some(count) => count,
    };
    let base = listener_fd_base(handshake);
    let mut listeners = Vec::with_capacity(count);
    for i in 0..count {
        listeners.push(Listener::from_inherited_fd(base + i as RawFd)?);
    }
    Ok(listeners)
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
