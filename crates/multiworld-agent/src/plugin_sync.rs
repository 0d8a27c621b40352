use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;

use crate::retry::{RetryPolicy, retry};

pub const WORLD_PLUGIN_DIR: &str = "plugins";

/// Top-level entries of the shared payload; these are the names a world's
/// plugin directory must contain after a sync.
fn payload_names(payload_dir: &Path) -> anyhow::Result<Vec<OsString>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(payload_dir)
        .with_context(|| format!("read plugin payload {}", payload_dir.display()))?
    {
        names.push(entry?.file_name());
    }
    names.sort();
    Ok(names)
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn copy_entry(src: &Path, dst: &Path) -> anyhow::Result<()> {
    // Follow symlinks: the world gets real files, not links back into the host.
    let meta = fs::metadata(src).with_context(|| format!("stat {}", src.display()))?;
    if meta.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_entry(&entry.path(), &dst.join(entry.file_name()))?;
        }
        return Ok(());
    }
    if meta.is_file() {
        fs::copy(src, dst).with_context(|| format!("copy {}", src.display()))?;
        return Ok(());
    }
    anyhow::bail!("unsupported payload entry at {}", src.display());
}

fn replace_payload(payload_dir: &Path, dest_dir: &Path, names: &[OsString]) -> anyhow::Result<()> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("create {}", dest_dir.display()))?;
    for name in names {
        let dst = dest_dir.join(name);
        remove_any(&dst).with_context(|| format!("remove stale {}", dst.display()))?;
        copy_entry(&payload_dir.join(name), &dst)?;
    }
    Ok(())
}

fn missing_names(dest_dir: &Path, names: &[OsString]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|n| dest_dir.join(n))
        .filter(|p| !p.exists())
        .collect()
}

/// Mirror the host's plugin payload into `dest_dir` and wait until every
/// payload entry is visible there. Returns `false` if the copy failed or the
/// poll timed out; partial copies are left in place.
pub async fn sync(payload_dir: &Path, dest_dir: &Path, policy: RetryPolicy) -> bool {
    if !payload_dir.is_dir() {
        tracing::debug!(payload = %payload_dir.display(), "no plugin payload to sync");
        return true;
    }

    let payload = payload_dir.to_path_buf();
    let dest = dest_dir.to_path_buf();
    let copied = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<OsString>> {
        let names = payload_names(&payload)?;
        replace_payload(&payload, &dest, &names)?;
        Ok(names)
    })
    .await;

    let names = match copied {
        Ok(Ok(names)) => names,
        Ok(Err(e)) => {
            tracing::warn!(dest = %dest_dir.display(), error = %format!("{e:#}"), "plugin copy failed");
            return false;
        }
        Err(e) => {
            tracing::warn!(dest = %dest_dir.display(), error = %e, "plugin copy task panicked");
            return false;
        }
    };

    let res = retry(policy, |_| {
        let missing = missing_names(dest_dir, &names);
        async move { if missing.is_empty() { Ok(()) } else { Err(missing) } }
    })
    .await;

    match res {
        Ok(()) => {
            tracing::debug!(dest = %dest_dir.display(), count = names.len(), "plugins synchronized");
            true
        }
        Err(missing) => {
            tracing::warn!(
                dest = %dest_dir.display(),
                missing = missing.len(),
                "plugin payload incomplete after timeout"
            );
            false
        }
    }
}
