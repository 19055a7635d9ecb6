//! File locking for `pommel index`/`pommel watch` (prevents concurrent indexers).

use std::path::Path;

use anyhow::{bail, Context, Result};

/// Check if a process with the given PID exists.
#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    // kill(pid, 0) checks existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(windows)]
fn process_exists(pid: u32) -> bool {
    use std::process::Command;
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

/// Acquire an exclusive lock over the index directory to prevent concurrent
/// indexing. The lock file holds the owning PID so a crashed holder's stale lock
/// can be detected and reclaimed.
pub(crate) fn acquire_index_lock(index_dir: &Path) -> Result<std::fs::File> {
    use fs4::fs_std::FileExt;
    use std::io::Write;

    let lock_path = index_dir.join("index.lock");

    #[cfg(unix)]
    let lock_file = {
        use std::os::unix::fs::OpenOptionsExt;
        std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .mode(0o600)
            .open(&lock_path)
            .context("failed to create lock file")?
    };

    #[cfg(not(unix))]
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(&lock_path)
        .context("failed to create lock file")?;

    match lock_file.try_lock_exclusive() {
        Ok(()) => {
            let mut file = lock_file;
            writeln!(file, "{}", std::process::id())?;
            file.sync_all()?;
            Ok(file)
        }
        Err(_) => {
            if let Ok(content) = std::fs::read_to_string(&lock_path) {
                if let Ok(pid) = content.trim().parse::<u32>() {
                    if !process_exists(pid) {
                        tracing::warn!(pid, "removing stale index lock");
                        drop(lock_file);
                        std::fs::remove_file(&lock_path)?;
                        return acquire_index_lock(index_dir);
                    }
                }
            }
            bail!(
                "another pommel process is indexing (see {}). \
                 Wait for it to finish, or delete the lock file if that process crashed.",
                lock_path.display()
            )
        }
    }
}
