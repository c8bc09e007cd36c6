//! The master supervision loop.
//!
//! One long-lived master owns the listening sockets and repeatedly spawns a
//! replaceable worker by re-executing its own binary with the sockets
//! attached as inherited descriptors. SIGHUP starts a new generation and
//! retires the old one only after the new one confirmed readiness;
//! SIGINT/SIGTERM stop the current generation and return; an unsolicited
//! worker exit is answered with an unconditional respawn.
//!
//! The loop processes one event to completion before examining the next. A
//! reload signal arriving while a reload is in flight stays queued in the
//! signal stream until the old generation's teardown finished.

use std::ffi::OsString;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::process::ExitStatus;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::oneshot;

use crate::bootstrap::STD_FD_COUNT;
use crate::config::StarterConfig;
use crate::error::StarterError;
use crate::handshake;
use crate::listener::Listener;

/// Everything needed to re-exec the master's binary, captured once when the
/// master loop starts.
#[derive(Debug, Clone)]
pub(crate) struct RespawnContext {
    argv0: OsString,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    working_directory: PathBuf,
}

impl RespawnContext {
    pub(crate) fn capture() -> Result<Self, StarterError> {
        let mut args = std::env::args_os();
        let argv0 = args.next().ok_or_else(|| StarterError::Spawn {
            message: "empty argument vector".to_string(),
        })?;
        let working_directory =
            std::env::current_dir().map_err(|source| StarterError::Io {
                context: "capturing the working directory".to_string(),
                source,
            })?;
        Ok(Self {
            argv0,
            args: args.collect(),
            env: std::env::vars_os().collect(),
            working_directory,
        })
    }

    /// PATH lookup of the original argv0, repeated for every spawn so that a
    /// symlink updated since master startup points the next generation at
    /// the new binary.
    fn resolve_binary(&self) -> Result<PathBuf, StarterError> {
        which::which(&self.argv0).map_err(|e| StarterError::Spawn {
            message: format!("cannot resolve binary {:?}: {}", self.argv0, e),
        })
    }
}

/// One spawned worker process.
///
/// The exit status is delivered exactly once through the one-shot channel,
/// fed by a background watcher task, so the supervision loop can select over
/// signals while an exit is pending.
pub(crate) struct Generation {
    pub(crate) pid: Pid,
    pub(crate) exit_rx: oneshot::Receiver<std::io::Result<ExitStatus>>,
}

impl Generation {
    pub(crate) fn watch(mut child: Child, pid: Pid) -> Self {
        let (tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            // Receiver dropped means the master already gave up on this
            // generation - safe to ignore.
            let _ = tx.send(child.wait().await);
        });
        Self { pid, exit_rx }
    }
}

/// Drives the supervision state machine for one master process.
pub(crate) struct MasterLoop {
    config: StarterConfig,
    ctx: RespawnContext,
    listeners: Vec<Listener>,
}

impl MasterLoop {
    pub(crate) fn new(
        config: StarterConfig,
        listeners: Vec<Listener>,
    ) -> Result<Self, StarterError> {
        Ok(Self {
            config,
            ctx: RespawnContext::capture()?,
            listeners,
        })
    }

    pub(crate) async fn run(self) -> Result<(), StarterError> {
        let mut sighup = install(SignalKind::hangup())?;
        let mut sigint = install(SignalKind::interrupt())?;
        let mut sigterm = install(SignalKind::terminate())?;

        let mut current = self.spawn_generation().await?;
        tracing::info!(
            "master pid={} running, worker pid={}",
            std::process::id(),
            current.pid.as_raw()
        );

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!(
                        "reload requested, replacing worker pid={}",
                        current.pid.as_raw()
                    );
                    let next = self.spawn_generation().await?;
                    self.retire(current).await?;
                    current = next;
                }
                _ = sigint.recv() => return self.stop(current).await,
                _ = sigterm.recv() => return self.stop(current).await,
                status = &mut current.exit_rx => {
                    log_unsolicited_exit(current.pid, status);
                    current = self.spawn_generation().await?;
                }
            }
        }
    }

    /// Spawns one worker generation and, unless the handshake is disabled,
    /// waits until it confirmed readiness. A readiness failure here is fatal
    /// to the whole loop: without a verified-healthy generation the master
    /// has nothing to fall back to.
    async fn spawn_generation(&self) -> Result<Generation, StarterError> {
        let binary = self.ctx.resolve_binary()?;

        let ready_pipe = if self.config.readiness_handshake {
            let (reader, writer) = std::io::pipe().map_err(|source| StarterError::Io {
                context: "creating the readiness pipe".to_string(),
                source,
            })?;
            Some((reader, writer))
        } else {
            None
        };

        let mut cmd = Command::new(&binary);
        cmd.args(&self.ctx.args)
            .current_dir(&self.ctx.working_directory)
            .env_clear()
            .kill_on_drop(false);
        // Stale discriminator entries are stripped before the fresh count is
        // appended, so a re-exec never carries conflicting declarations.
        let env_name = OsString::from(&self.config.env_listen_fds);
        for (key, value) in &self.ctx.env {
            if *key != env_name {
                cmd.env(key, value);
            }
        }
        cmd.env(&env_name, self.listeners.len().to_string());

        // Inherited descriptor table, in slot order: the readiness pipe
        // write end (when enabled), then every listener.
        let mut fds: Vec<RawFd> = Vec::with_capacity(1 + self.listeners.len());
        if let Some((_, writer)) = &ready_pipe {
            fds.push(writer.as_raw_fd());
        }
        for listener in &self.listeners {
            fds.push(listener.as_raw_fd());
        }
        unsafe {
            cmd.pre_exec(move || remap_inherited_fds(&mut fds));
        }

        let child = cmd.spawn().map_err(|e| StarterError::Spawn {
            message: format!("failed to start worker process: {}", e),
        })?;
        let raw_pid = child.id().ok_or_else(|| StarterError::Spawn {
            message: "worker exited before its pid could be read".to_string(),
        })?;
        let pid = Pid::from_raw(raw_pid as i32);

        // The master's copy of the write end must not outlive the spawn, or
        // the pipe would stay open after the child exits.
        let reader = ready_pipe.map(|(reader, writer)| {
            drop(writer);
            reader
        });

        let generation = Generation::watch(child, pid);
        match reader {
            Some(reader) => {
                handshake::wait_ready(reader).await?;
                tracing::info!("worker pid={} confirmed ready", raw_pid);
            }
            None => {
                tracing::info!("worker pid={} started, handshake disabled", raw_pid);
            }
        }
        Ok(generation)
    }

    /// Retires an old generation after a reload: graceful signal, bounded
    /// wait, then SIGKILL. The exit status is collected on every path so the
    /// process is never left as a zombie.
    pub(crate) async fn retire(&self, old: Generation) -> Result<(), StarterError> {
        deliver(old.pid, self.config.graceful_shutdown_signal)?;

        let mut exit_rx = old.exit_rx;
        tokio::select! {
            status = &mut exit_rx => {
                log_retired_exit(old.pid, status);
            }
            () = tokio::time::sleep(self.config.shutdown_wait_timeout) => {
                tracing::warn!(
                    "worker pid={} did not exit within {:?}, sending SIGKILL",
                    old.pid.as_raw(),
                    self.config.shutdown_wait_timeout
                );
                deliver(old.pid, Signal::SIGKILL)?;
                // The reload already succeeded; a failure while collecting
                // the killed worker's status is reported, not fatal.
                log_retired_exit(old.pid, exit_rx.await);
            }
        }
        Ok(())
    }

    /// Stops the current generation: terminate signal, then wait for its
    /// exit. A non-clean exit is surfaced to the caller.
    pub(crate) async fn stop(&self, current: Generation) -> Result<(), StarterError> {
        tracing::info!("stopping worker pid={}", current.pid.as_raw());
        deliver(current.pid, Signal::SIGTERM)?;
        match current.exit_rx.await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(StarterError::WorkerExit { status }),
            Ok(Err(source)) => Err(StarterError::Io {
                context: format!("waiting for worker pid={} to stop", current.pid.as_raw()),
                source,
            }),
            Err(_) => Err(StarterError::Io {
                context: format!("waiting for worker pid={} to stop", current.pid.as_raw()),
                source: std::io::Error::other("exit watcher dropped"),
            }),
        }
    }
}

fn install(kind: SignalKind) -> Result<tokio::signal::unix::Signal, StarterError> {
    unix_signal(kind).map_err(|source| StarterError::Io {
        context: "installing signal handler".to_string(),
        source,
    })
}

fn deliver(pid: Pid, sig: Signal) -> Result<(), StarterError> {
    signal::kill(pid, sig).map_err(|source| StarterError::SignalDelivery {
        pid: pid.as_raw(),
        signal: sig,
        source,
    })
}

type ExitReport = Result<std::io::Result<ExitStatus>, oneshot::error::RecvError>;

fn log_retired_exit(pid: Pid, status: ExitReport) {
    match status {
        Ok(Ok(status)) if status.success() => {
            tracing::info!("worker pid={} exited cleanly", pid.as_raw());
        }
        Ok(Ok(status)) => {
            tracing::warn!("worker pid={} exited with {}", pid.as_raw(), status);
        }
        Ok(Err(e)) => {
            tracing::warn!("failed waiting for worker pid={}: {}", pid.as_raw(), e);
        }
        Err(_) => {
            tracing::warn!("exit watcher for worker pid={} dropped", pid.as_raw());
        }
    }
}

fn log_unsolicited_exit(pid: Pid, status: ExitReport) {
    match status {
        Ok(Ok(status)) => {
            tracing::warn!(
                "worker pid={} exited unexpectedly ({}), restarting",
                pid.as_raw(),
                status
            );
        }
        Ok(Err(e)) => {
            tracing::warn!(
                "worker pid={} lost ({}), restarting",
                pid.as_raw(),
                e
            );
        }
        Err(_) => {
            tracing::warn!(
                "exit watcher for worker pid={} dropped, restarting",
                pid.as_raw()
            );
        }
    }
}

/// Duplicates `fds` onto the contiguous descriptor slots right after the
/// standard streams, in order. Runs between fork and exec, so only
/// async-signal-safe calls are allowed; the slice is pre-allocated by the
/// parent and mutated in place.
fn remap_inherited_fds(fds: &mut [RawFd]) -> std::io::Result<()> {
    use nix::libc;

    let window_end = STD_FD_COUNT + fds.len() as RawFd;
    let mut i = 0;
    while i < fds.len() {
        let target = STD_FD_COUNT + i as RawFd;
        let source = fds[i];
        if source == target {
            // Already in the right slot; clear close-on-exec for the child.
            if unsafe { libc::fcntl(target, libc::F_SETFD, 0) } == -1 {
                return Err(std::io::Error::last_os_error());
            }
            i += 1;
            continue;
        }
        // A later source occupying this slot is lifted above the window
        // first, with close-on-exec set so the lifted copy vanishes at exec.
        for later in fds.iter_mut().skip(i + 1) {
            if *later == target {
                let lifted = unsafe { libc::fcntl(*later, libc::F_DUPFD_CLOEXEC, window_end) };
                if lifted == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                *later = lifted;
            }
        }
        if unsafe { libc::dup2(source, target) } == -1 {
            return Err(std::io::Error::last_os_error());
        }
        i += 1;
    }
    Ok(())
}

#[cfg(test)]
#[path = "master_tests.rs"]
mod tests;
