//! Construction-time options for the starter.
//!
//! All options are fixed when the [`crate::Starter`] is built and read-only
//! afterwards. The worker must be constructed with the same configuration as
//! the master; the re-exec contract guarantees both run the same binary, so
//! sharing one construction path between the roles is enough.

use std::time::Duration;

use nix::sys::signal::Signal;

/// Default environment variable carrying the inherited listener count.
pub const DEFAULT_ENV_LISTEN_FDS: &str = "LISTEN_FDS";

/// Default signal sent to a worker for graceful shutdown.
pub const DEFAULT_GRACEFUL_SHUTDOWN_SIGNAL: Signal = Signal::SIGTERM;

/// Default time to wait for a worker to shut down before forcing termination.
pub const DEFAULT_SHUTDOWN_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for a [`crate::Starter`].
#[derive(Debug, Clone)]
pub struct StarterConfig {
    pub(crate) env_listen_fds: String,
    pub(crate) graceful_shutdown_signal: Signal,
    pub(crate) shutdown_wait_timeout: Duration,
    pub(crate) readiness_handshake: bool,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            env_listen_fds: DEFAULT_ENV_LISTEN_FDS.to_string(),
            graceful_shutdown_signal: DEFAULT_GRACEFUL_SHUTDOWN_SIGNAL,
            shutdown_wait_timeout: DEFAULT_SHUTDOWN_WAIT_TIMEOUT,
            readiness_handshake: true,
        }
    }
}

impl StarterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the environment variable name used to pass the listener
    /// descriptor count to the worker process.
    pub fn env_name(mut self, name: impl Into<String>) -> Self {
        self.env_listen_fds = name.into();
        self
    }

    /// Sets the signal sent to the old worker for graceful shutdown during
    /// a reload.
    pub fn graceful_shutdown_signal(mut self, signal: Signal) -> Self {
        self.graceful_shutdown_signal = signal;
        self
    }

    /// Sets how long the master waits for an old worker to exit before
    /// escalating to SIGKILL.
    pub fn shutdown_wait_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_wait_timeout = timeout;
        self
    }

    /// Enables or disables the readiness handshake.
    ///
    /// With the handshake disabled a freshly spawned worker is treated as
    /// ready the moment its process is running, which can leave a window
    /// with no accepting generation during a reload. Disable only when the
    /// served protocol tolerates that.
    pub fn readiness_handshake(mut self, enabled: bool) -> Self {
        self.readiness_handshake = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = StarterConfig::default();
        assert_eq!(config.env_listen_fds, DEFAULT_ENV_LISTEN_FDS);
        assert_eq!(
            config.graceful_shutdown_signal,
            DEFAULT_GRACEFUL_SHUTDOWN_SIGNAL
        );
        assert_eq!(config.shutdown_wait_timeout, DEFAULT_SHUTDOWN_WAIT_TIMEOUT);
        assert!(config.readiness_handshake);
    }

    #[test]
    fn setters_are_chainable() {
        let config = StarterConfig::new()
            .env_name("MY_FDS")
            .graceful_shutdown_signal(Signal::SIGUSR1)
            .shutdown_wait_timeout(Duration::from_millis(200))
            .readiness_handshake(false);
        assert_eq!(config.env_listen_fds, "MY_FDS");
        assert_eq!(config.graceful_shutdown_signal, Signal::SIGUSR1);
        assert_eq!(config.shutdown_wait_timeout, Duration::from_millis(200));
        assert!(!config.readiness_handshake);
    }
}
