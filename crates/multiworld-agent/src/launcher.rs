use std::{path::Path, process::ExitStatus, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};

use crate::{
    error::SupervisorError,
    retry::retry,
    settings::{PARENT_ENV, SupervisorSettings},
};

const WORLD_LOG_TARGET: &str = "multiworld::world";
const STDERR_TAIL_LINES: usize = 5;
const STDERR_TAIL_WAIT: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

pub fn line_prefix(world: &str, stream: OutputStream) -> String {
    match stream {
        OutputStream::Stdout => format!("[{world}] "),
        OutputStream::Stderr => format!("[{world}][ERR] "),
    }
}

/// A child's stdin, shared so callers can write without holding the registry.
#[derive(Debug, Clone)]
pub struct Console(Arc<Mutex<Option<ChildStdin>>>);

impl Console {
    fn new(stdin: Option<ChildStdin>) -> Self {
        Self(Arc::new(Mutex::new(stdin)))
    }

    /// Write one console line. No acknowledgement is read back.
    pub async fn send_line(&self, text: &str) -> std::io::Result<()> {
        let mut guard = self.0.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed"))?;
        let mut line = text.trim_end_matches(['\r', '\n']).to_string();
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    /// Drop stdin so the child sees EOF.
    pub async fn close(&self) {
        self.0.lock().await.take();
    }
}

/// A running child. Owns the process and its console; stdout/stderr are
/// handed to the forwarders right after launch.
#[derive(Debug)]
pub struct WorldProcess {
    child: Child,
    console: Console,
    pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyExited,
    Graceful(Option<i32>),
    Killed,
    /// Kill was sent but the process still had not been reaped.
    Unconfirmed,
}

impl WorldProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    pub fn console(&self) -> Console {
        self.console.clone()
    }

    fn force_kill(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // The child leads its own process group (setsid in pre_exec).
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
        let _ = self.child.start_kill();
    }

    /// Ask the child to stop through its console, then escalate to a kill
    /// once `grace` has elapsed.
    pub async fn shutdown(mut self, stop_command: &str, grace: Duration) -> StopOutcome {
        if self.has_exited() {
            return StopOutcome::AlreadyExited;
        }

        // A writer stuck on a full pipe keeps the console locked; the kill
        // below unblocks it.
        let console = self.console.clone();
        let delivered = tokio::time::timeout(grace, async {
            let res = console.send_line(stop_command).await;
            console.close().await;
            res
        })
        .await;
        match delivered {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(pid = ?self.pid, error = %e, "stop directive not delivered"),
            Err(_) => tracing::debug!(pid = ?self.pid, "console busy; stop directive not delivered"),
        }

        if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
            return StopOutcome::Graceful(status.code());
        }

        tracing::warn!(pid = ?self.pid, grace_ms = grace.as_millis() as u64, "graceful stop timed out; killing");
        self.force_kill();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => StopOutcome::Killed,
            _ => StopOutcome::Unconfirmed,
        }
    }
}

pub struct Launched {
    pub process: WorldProcess,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal() -> std::io::Result<()> {
    // If the host dies, take the child with it.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

fn build_command(settings: &SupervisorSettings, world_dir: &Path, parent: &str) -> Command {
    let mut cmd = Command::new(&settings.server_exec);
    cmd.current_dir(world_dir)
        .args(&settings.server_args)
        .env(PARENT_ENV, parent)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        unsafe {
            cmd.pre_exec(|| {
                set_parent_death_signal()?;
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
    cmd
}

/// Last few non-empty stderr lines of a child that already exited.
async fn stderr_tail(child: &mut Child) -> Option<String> {
    let mut stderr = child.stderr.take()?;
    let mut buf = Vec::new();
    // A grandchild may still hold the pipe open; take what is there.
    let _ = tokio::time::timeout(STDERR_TAIL_WAIT, stderr.read_to_end(&mut buf)).await;

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    Some(lines[start..].join(" | "))
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited immediately with code {code}"),
        None => "exited immediately (killed by signal)".to_string(),
    }
}

async fn spawn_once(
    settings: &SupervisorSettings,
    world: &str,
    world_dir: &Path,
    parent: &str,
    attempt: u32,
) -> Result<Launched, String> {
    let mut child = build_command(settings, world_dir, parent)
        .spawn()
        .map_err(|e| format!("spawn {}: {e}", settings.server_exec))?;
    let pid = child.id();
    tracing::debug!(world, ?pid, attempt, "child spawned; checking liveness");

    tokio::time::sleep(settings.post_spawn_wait).await;
    match child.try_wait() {
        Ok(None) => {}
        Ok(Some(status)) => {
            let mut reason = describe_exit(status);
            if let Some(tail) = stderr_tail(&mut child).await {
                reason = format!("{reason}: {tail}");
            }
            tracing::warn!(world, attempt, %reason, "launch attempt failed");
            return Err(reason);
        }
        Err(e) => return Err(format!("wait: {e}")),
    }

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    Ok(Launched {
        process: WorldProcess {
            child,
            console: Console::new(stdin),
            pid,
        },
        stdout,
        stderr,
    })
}

/// Start the dedicated server for one world directory, retrying while the
/// child dies right after spawn.
pub async fn launch(
    settings: &SupervisorSettings,
    world: &str,
    world_dir: &Path,
    parent: &str,
) -> Result<Launched, SupervisorError> {
    let policy = settings.launch_policy();
    let launched = retry(policy, |attempt| {
        spawn_once(settings, world, world_dir, parent, attempt)
    })
    .await
    .map_err(|reason| SupervisorError::LaunchFailed {
        world: world.to_string(),
        attempts: policy.attempts,
        reason,
    })?;

    tracing::info!(world, pid = ?launched.process.pid, dir = %world_dir.display(), "world launched");
    Ok(launched)
}

/// Copy `reader` line by line into `emit`, prefixed. Returns the number of
/// lines forwarded once the stream closes.
pub async fn forward_lines<R, F>(reader: R, prefix: &str, mut emit: F) -> usize
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut lines = BufReader::new(reader).lines();
    let mut n = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        emit(format!("{prefix}{line}"));
        n += 1;
    }
    n
}

pub fn spawn_output_forwarders(
    world: &str,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) {
    if let Some(out) = stdout {
        let prefix = line_prefix(world, OutputStream::Stdout);
        let world = world.to_string();
        tokio::spawn(async move {
            let n = forward_lines(out, &prefix, |line| {
                tracing::info!(target: WORLD_LOG_TARGET, "{line}");
            })
            .await;
            tracing::debug!(world = %world, lines = n, "stdout closed");
        });
    }
    if let Some(err) = stderr {
        let prefix = line_prefix(world, OutputStream::Stderr);
        let world = world.to_string();
        tokio::spawn(async move {
            let n = forward_lines(err, &prefix, |line| {
                tracing::warn!(target: WORLD_LOG_TARGET, "{line}");
            })
            .await;
            tracing::debug!(world = %world, lines = n, "stderr closed");
        });
    }
}
