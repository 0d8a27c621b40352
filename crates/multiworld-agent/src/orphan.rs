//! Best-effort cleanup for children the registry no longer knows about, e.g.
//! after the host restarted while worlds kept running. Processes are matched
//! by working directory, which only Linux exposes reliably (via `procfs`);
//! elsewhere the scan finds nothing.

use std::{path::Path, time::Duration};

#[cfg(target_os = "linux")]
fn canonical(p: &Path) -> std::path::PathBuf {
    std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

#[cfg(target_os = "linux")]
pub fn find_by_cwd(dir: &Path) -> Vec<u32> {
    let want = canonical(dir);
    let me = std::process::id();
    let Ok(procs) = procfs::process::all_processes() else {
        return Vec::new();
    };

    let mut out: Vec<u32> = procs
        .filter_map(|p| p.ok())
        .filter_map(|proc| {
            let pid = u32::try_from(proc.pid()).ok()?;
            // Permission errors for other users' processes are expected.
            let cwd = proc.cwd().ok()?;
            (pid != me && cwd == want).then_some(pid)
        })
        .collect();
    out.sort_unstable();
    out
}

#[cfg(not(target_os = "linux"))]
pub fn find_by_cwd(_dir: &Path) -> Vec<u32> {
    Vec::new()
}

#[cfg(target_os = "linux")]
pub fn is_alive(pid: u32) -> bool {
    use procfs::process::{ProcState, Process};

    // Zombies still answer kill(pid, 0); ask for the state instead.
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    let Some(state) = Process::new(pid)
        .and_then(|p| p.stat())
        .and_then(|stat| stat.state())
        .ok()
    else {
        return false;
    };
    !matches!(state, ProcState::Zombie | ProcState::Dead)
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn signal(pid: u32, sig: libc::c_int) {
    unsafe {
        libc::kill(pid as i32, sig);
    }
}

/// Terminate every process whose working directory is `dir`: SIGTERM, then
/// SIGKILL for anything still alive after `grace`. Returns the pids signalled.
#[cfg(unix)]
pub async fn reap(dir: &Path, grace: Duration) -> Vec<u32> {
    let dir_owned = dir.to_path_buf();
    let pids = tokio::task::spawn_blocking(move || find_by_cwd(&dir_owned))
        .await
        .unwrap_or_default();
    if pids.is_empty() {
        return pids;
    }

    for &pid in &pids {
        tracing::warn!(pid, dir = %dir.display(), "terminating orphaned world process");
        signal(pid, libc::SIGTERM);
    }

    let deadline = tokio::time::Instant::now() + grace;
    while pids.iter().any(|&p| is_alive(p)) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for &pid in &pids {
        if is_alive(pid) {
            tracing::warn!(pid, "orphan ignored SIGTERM; killing");
            signal(pid, libc::SIGKILL);
        }
    }
    pids
}

#[cfg(not(unix))]
pub async fn reap(_dir: &Path, _grace: Duration) -> Vec<u32> {
    Vec::new()
}
