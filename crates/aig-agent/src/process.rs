use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use aig_core::TaskError;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A child process managed within its own process group.
/// Enables killing the entire process tree (including any orphaned children
/// that inherit pipe file descriptors).
pub struct ManagedChild {
    child: tokio::process::Child,
    pgid: i32,
}

impl ManagedChild {
    /// Spawn `cmd` in a new session via setsid, with piped stdout/stderr.
    pub fn spawn(cmd: &mut Command) -> std::io::Result<(Self, ChildStdout, ChildStderr)> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // New process group so the whole tree can be signalled at once.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("child exited before its pid was read"))?
            as i32;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr not captured"))?;

        Ok((ManagedChild { child, pgid: pid }, stdout, stderr))
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kill the entire process group.
    /// Sends SIGTERM first, waits grace_period, then SIGKILL.
    pub async fn kill_group(&mut self, grace_period: Duration) {
        if let Err(e) = kill(Pid::from_raw(-self.pgid), Signal::SIGTERM) {
            // ESRCH: the group is already gone
            if e != nix::errno::Errno::ESRCH {
                warn!("SIGTERM to process group {} failed: {e}", self.pgid);
            }
            let _ = self.child.wait().await;
            return;
        }

        if tokio::time::timeout(grace_period, self.child.wait())
            .await
            .is_err()
        {
            if let Err(e) = kill(Pid::from_raw(-self.pgid), Signal::SIGKILL) {
                if e != nix::errno::Errno::ESRCH {
                    warn!("SIGKILL to process group {} failed: {e}", self.pgid);
                }
            }
            let _ = self.child.wait().await;
        }
    }
}

/// Run `program args…` in `work_dir`, handing every complete stdout line to
/// `on_line` in emission order.
///
/// Lines are delivered without their `\n` / `\r\n` terminator and decoded
/// lossily. Bytes after the last newline are never delivered. Cancelling
/// `cancel` kills the process group (SIGTERM, then SIGKILL after
/// `kill_grace`) and returns [`TaskError::Cancelled`].
pub async fn run_streaming<F>(
    work_dir: &Path,
    program: &Path,
    args: &[String],
    cancel: &CancellationToken,
    kill_grace: Duration,
    mut on_line: F,
) -> Result<(), TaskError>
where
    F: FnMut(&str),
{
    if cancel.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(work_dir);

    let (mut managed, stdout, stderr) =
        ManagedChild::spawn(&mut cmd).map_err(|e| TaskError::Spawn {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;
    info!(
        "spawned {} (pgid {}) in {}",
        program.display(),
        managed.pgid,
        work_dir.display()
    );

    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("tool stderr: {line}");
        }
    });

    let result = pump_stdout(&mut managed, stdout, cancel, kill_grace, &mut on_line).await;
    stderr_task.abort();
    result
}

async fn pump_stdout<F>(
    managed: &mut ManagedChild,
    stdout: ChildStdout,
    cancel: &CancellationToken,
    kill_grace: Duration,
    on_line: &mut F,
) -> Result<(), TaskError>
where
    F: FnMut(&str),
{
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => None,
            read = reader.read_until(b'\n', &mut buf) => Some(read),
        };
        match read {
            None => {
                info!("cancelling tool process group {}", managed.pgid);
                managed.kill_group(kill_grace).await;
                return Err(TaskError::Cancelled);
            }
            Some(Ok(0)) => break,
            Some(Ok(_)) => {
                if buf.last() != Some(&b'\n') {
                    debug!("dropping unterminated trailing output ({} bytes)", buf.len());
                    continue;
                }
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(&['\n', '\r'][..]));
            }
            Some(Err(e)) => {
                warn!("reading tool stdout failed: {e}");
                managed.kill_group(kill_grace).await;
                return Err(TaskError::Io(e));
            }
        }
    }

    let status = tokio::select! {
        status = managed.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };
    match status {
        None => {
            managed.kill_group(kill_grace).await;
            Err(TaskError::Cancelled)
        }
        Some(Ok(status)) if status.success() => Ok(()),
        Some(Ok(status)) => Err(TaskError::Exited {
            code: status.code(),
        }),
        Some(Err(e)) => Err(TaskError::Io(e)),
    }
}
