//! Process supervision - spawning the application server and tearing it down

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Handle to a spawned child process
///
/// Owned by the [`ProcessSupervisor`] caller for one run. The process group
/// id is only read by the supervisor itself.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
    pid: u32,
    process_group_id: Option<i32>,
    exit_status: Option<ExitStatus>,
}

impl ChildHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status, once the child has been reaped
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Whether the child has been reaped
    pub fn is_terminated(&self) -> bool {
        self.exit_status.is_some()
    }
}

/// Spawns a child in its own process group and escalates signals on shutdown
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    new_process_group: bool,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            new_process_group: true,
        }
    }

    /// Keep the child in the parent's process group
    pub fn without_process_group(mut self) -> Self {
        self.new_process_group = false;
        self
    }

    /// Spawn `argv` with extra environment `env`
    ///
    /// stdout/stderr are passed straight through to the parent's streams.
    pub fn spawn(&self, argv: &[String], env: &[(String, String)]) -> E2eResult<ChildHandle> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| E2eError::SpawnFailure("empty server command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(unix)]
        if self.new_process_group {
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .map_err(|e| E2eError::SpawnFailure(format!("Failed to spawn {}: {}", program, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| E2eError::SpawnFailure(format!("{} exited before it could be tracked", program)))?;

        let process_group_id = if self.new_process_group {
            lookup_process_group(pid)
        } else {
            None
        };

        info!("Spawned {} (pid: {}, pgid: {:?})", argv.join(" "), pid, process_group_id);

        Ok(ChildHandle {
            child,
            pid,
            process_group_id,
            exit_status: None,
        })
    }

    /// Stop the child: graceful signal, bounded wait, then a forced kill
    ///
    /// Never fails. A child that is already gone (or was already reaped by a
    /// previous call) is reported through its recorded exit status.
    pub async fn terminate(&self, handle: &mut ChildHandle, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = handle.exit_status {
            return Some(status);
        }

        if let Ok(Some(status)) = handle.child.try_wait() {
            debug!("Process {} already exited: {}", handle.pid, status);
            handle.exit_status = Some(status);
            return Some(status);
        }

        info!("Stopping server (pid: {})", handle.pid);
        send_graceful(handle);

        match timeout(grace, handle.child.wait()).await {
            Ok(Ok(status)) => {
                handle.exit_status = Some(status);
            }
            Ok(Err(e)) => {
                warn!("Failed waiting for pid {}: {}", handle.pid, e);
            }
            Err(_) => {
                warn!(
                    "Process {} did not exit within {:?}, killing it",
                    handle.pid, grace
                );
                if let Err(e) = handle.child.start_kill() {
                    debug!("Kill of pid {} skipped: {}", handle.pid, e);
                }
                match handle.child.wait().await {
                    Ok(status) => handle.exit_status = Some(status),
                    Err(e) => warn!("Failed reaping pid {}: {}", handle.pid, e),
                }
            }
        }

        if let Some(status) = handle.exit_status {
            debug!("Process {} exited: {}", handle.pid, status);
        }
        handle.exit_status
    }
}

#[cfg(unix)]
fn lookup_process_group(pid: u32) -> Option<i32> {
    use nix::errno::Errno;
    use nix::unistd::{getpgid, Pid};

    match getpgid(Some(Pid::from_raw(pid as i32))) {
        Ok(pgid) => Some(pgid.as_raw()),
        Err(Errno::ESRCH) => {
            info!("Process {} exited before its group could be read", pid);
            None
        }
        Err(e) => {
            warn!("Could not read process group of {}: {}", pid, e);
            None
        }
    }
}

#[cfg(not(unix))]
fn lookup_process_group(_pid: u32) -> Option<i32> {
    None
}

#[cfg(unix)]
fn send_graceful(handle: &mut ChildHandle) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgrp, Pid};

    let pid = Pid::from_raw(handle.pid as i32);
    let own_group = getpgrp().as_raw();

    // Signal the whole group so servers that fork workers are reached too.
    // Never signal our own group.
    let result = match handle.process_group_id {
        Some(pgid) if pgid != own_group && process_exists(pid) => {
            debug!("Sending SIGTERM to process group {}", pgid);
            killpg(Pid::from_raw(pgid), Signal::SIGTERM)
        }
        _ => {
            debug!("Sending SIGTERM to pid {}", pid);
            kill(pid, Signal::SIGTERM)
        }
    };

    match result {
        Ok(()) => {}
        Err(Errno::ESRCH) => debug!("Process {} already terminated", pid),
        Err(e) => warn!("Failed to signal {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn send_graceful(handle: &mut ChildHandle) {
    if let Err(e) = handle.child.start_kill() {
        debug!("Kill of pid {} skipped: {}", handle.pid, e);
    }
}

#[cfg(unix)]
fn process_exists(pid: nix::unistd::Pid) -> bool {
    nix::sys::signal::kill(pid, None).is_ok()
}

/// Find a free local port by binding an ephemeral one and releasing it
///
/// Another process may grab the port between release and the child binding it.
pub fn find_free_port() -> std::io::Result<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
