use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use super::{Generation, MasterLoop, RespawnContext};
use crate::config::StarterConfig;
use crate::error::StarterError;

fn test_loop(timeout: Duration) -> MasterLoop {
    MasterLoop::new(
        StarterConfig::default().shutdown_wait_timeout(timeout),
        Vec::new(),
    )
    .unwrap()
}

fn spawn_sh(script: &str) -> Generation {
    let child = Command::new("sh")
        .arg("-c")
        .arg(script)
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let pid = Pid::from_raw(child.id().unwrap() as i32);
    Generation::watch(child, pid)
}

#[tokio::test]
async fn stop_returns_ok_for_clean_exit() {
    let master = test_loop(Duration::from_secs(5));
    let gen = spawn_sh(r#"trap "exit 0" TERM; while :; do sleep 0.05; done"#);
    // Give the shell a moment to install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;
    master.stop(gen).await.unwrap();
}

#[tokio::test]
async fn stop_surfaces_non_clean_exit() {
    let master = test_loop(Duration::from_secs(5));
    // Plain `sleep` dies to the default SIGTERM disposition.
    let gen = spawn_sh("sleep 30");
    tokio::time::sleep(Duration::from_millis(100)).await;
    match master.stop(gen).await {
        Err(StarterError::WorkerExit { status }) => assert!(!status.success()),
        other => panic!("expected WorkerExit, got {:?}", other.map(|()| "ok")),
    }
}

#[tokio::test]
async fn retire_completes_within_timeout_for_cooperative_worker() {
    let master = test_loop(Duration::from_secs(5));
    let gen = spawn_sh(r#"trap "exit 0" TERM; while :; do sleep 0.05; done"#);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let started = Instant::now();
    master.retire(gen).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn retire_escalates_to_sigkill() {
    let master = test_loop(Duration::from_millis(200));
    let gen = spawn_sh(r#"trap "" TERM; while :; do sleep 0.05; done"#);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let pid = gen.pid;
    let started = Instant::now();
    master.retire(gen).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
    // The worker was killed and reaped; signalling it again must fail.
    assert_eq!(signal::kill(pid, None), Err(Errno::ESRCH));
}

#[tokio::test]
async fn exit_watcher_reports_exit_code() {
    let gen = spawn_sh("exit 7");
    let status = gen.exit_rx.await.unwrap().unwrap();
    assert_eq!(status.code(), Some(7));
}

#[tokio::test]
async fn stop_reports_signal_delivery_failure_for_gone_worker() {
    let master = test_loop(Duration::from_secs(5));
    let mut gen = spawn_sh("exit 0");
    // Wait until the worker is reaped, so the pid no longer exists.
    (&mut gen.exit_rx).await.unwrap().unwrap();
    match master.stop(gen).await {
        Err(StarterError::SignalDelivery { signal, .. }) => {
            assert_eq!(signal, Signal::SIGTERM);
        }
        other => panic!("expected SignalDelivery, got {:?}", other.map(|()| "ok")),
    }
}

#[tokio::test]
async fn remap_preserves_export_order_across_slot_collisions() {
    use std::io::Read;
    use std::os::fd::{AsRawFd, RawFd};

    let (mut first_read, first_write) = std::io::pipe().unwrap();
    let (mut second_read, second_write) = std::io::pipe().unwrap();
    let first_fd = first_write.as_raw_fd();
    let second_fd = second_write.as_raw_fd();

    // Staged in the child so the second source sits exactly on the first
    // target slot, forcing the lift-then-duplicate path.
    let mut fds: Vec<RawFd> = vec![0, 3];
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("printf A >&3 && printf B >&4");
    unsafe {
        cmd.pre_exec(move || {
            let staged_first = nix::libc::fcntl(first_fd, nix::libc::F_DUPFD, 64);
            let staged_second = nix::libc::fcntl(second_fd, nix::libc::F_DUPFD, 64);
            if staged_first == -1 || staged_second == -1 {
                return Err(std::io::Error::last_os_error());
            }
            if nix::libc::dup2(staged_second, 3) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            fds[0] = staged_first;
            super::remap_inherited_fds(&mut fds)
        });
    }
    let status = cmd.spawn().unwrap().wait().await.unwrap();
    assert!(status.success());
    drop(first_write);
    drop(second_write);

    let mut byte = [0u8; 1];
    first_read.read_exact(&mut byte).unwrap();
    assert_eq!(byte[0], b'A');
    second_read.read_exact(&mut byte).unwrap();
    assert_eq!(byte[0], b'B');
}

#[test]
fn respawn_context_resolves_current_binary() {
    let ctx = RespawnContext::capture().unwrap();
    let resolved = ctx.resolve_binary().unwrap();
    assert!(resolved.is_absolute());
}
