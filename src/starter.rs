use crate::bootstrap::{self, BootstrapEnv, Role};
use crate::config::StarterConfig;
use crate::error::StarterError;
use crate::handshake;
use crate::listener::Listener;
use crate::master::MasterLoop;

/// Entry point for both halves of a gracefully restartable server.
///
/// The same binary runs as master and as worker; the role is decided by the
/// presence of the listener-count environment variable, which only the
/// master sets for the processes it spawns. Construct a [`Starter`] early in
/// `main`, branch on [`Starter::role`], and either hand the listening
/// sockets to [`Starter::run_master`] or collect the inherited ones through
/// [`Starter::listeners`].
pub struct Starter {
    config: StarterConfig,
    bootstrap: BootstrapEnv,
}

impl Starter {
    pub fn new() -> Self {
        Self::with_config(StarterConfig::default())
    }

    /// The environment is read once here; later mutations of the process
    /// environment do not change the detected role.
    pub fn with_config(config: StarterConfig) -> Self {
        let bootstrap = BootstrapEnv::capture(&config.env_listen_fds);
        Self { config, bootstrap }
    }

    pub fn role(&self) -> Role {
        self.bootstrap.role()
    }

    pub fn is_master(&self) -> bool {
        self.role() == Role::Master
    }

    /// The sockets inherited from the master, in the order the master bound
    /// them. Returns an empty vector in the master role.
    pub fn listeners(&self) -> Result<Vec<Listener>, StarterError> {
        bootstrap::acquire_listeners(&self.bootstrap, self.config.readiness_handshake)
    }

    /// Runs the supervision loop until a stop signal arrives. Only returns
    /// once the final worker generation exited, or with the error that made
    /// supervision impossible.
    pub async fn run_master(self, listeners: Vec<Listener>) -> Result<(), StarterError> {
        MasterLoop::new(self.config, listeners)?.run().await
    }

    /// Reports readiness to the supervising master over the inherited pipe.
    ///
    /// Call this once the worker can serve traffic; during a reload the old
    /// generation keeps running until this confirmation arrives. A no-op
    /// when the handshake is disabled in the configuration.
    pub fn signal_ready(&self) -> Result<(), StarterError> {
        if !self.config.readiness_handshake {
            return Ok(());
        }
        match self.role() {
            Role::Worker => handshake::send_ready(),
            Role::Master => Err(StarterError::Protocol {
                message: "signal_ready called in the master role".to_string(),
            }),
        }
    }
}

impl Default for Starter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "starter_tests.rs"]
mod tests;
