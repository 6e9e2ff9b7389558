//! Cross-process session lock around one command invocation.
//!
//! The lock is a file created with exclusive-create next to the registry.
//! It holds `"<identity> <pid> <host>"` and is removed when the guard drops,
//! so every exit path that unwinds releases it.
//!
//! A lock left behind by a dead process on this host is reclaimed. The
//! reclaim runs under an OS advisory lock on a sidecar guard file, so two
//! invocations that both saw the same dead holder cannot both remove the
//! file: the second one re-reads it under the guard and finds the first
//! one's live lock.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::NodeError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to do when another invocation holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Fail immediately with `LockBusy`.
    NoWait,
    /// Poll until the timeout, then fail with `LockTimeout`.
    Bounded(Duration),
}

/// Who holds a lock, as recorded in the lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub identity: String,
    pub pid: u32,
    /// `None` for lock files that predate host recording.
    pub host: Option<String>,
}

impl LockHolder {
    fn parse(contents: &str) -> Option<Self> {
        let contents = contents.trim();

        // "<identity> <pid> <host>"; identity may contain spaces.
        if let Some((rest, host)) = contents.rsplit_once(' ')
            && let Some((identity, pid)) = rest.rsplit_once(' ')
            && let Ok(pid) = pid.parse()
        {
            return Some(Self {
                identity: identity.to_string(),
                pid,
                host: Some(host.to_string()),
            });
        }

        let (identity, pid) = contents.rsplit_once(' ')?;
        Some(Self {
            identity: identity.to_string(),
            pid: pid.parse().ok()?,
            host: None,
        })
    }

    fn describe(holder: Option<&LockHolder>) -> String {
        match holder {
            Some(LockHolder {
                identity,
                pid,
                host: Some(host),
            }) => format!("{identity} (pid {pid} on {host})"),
            Some(h) => format!("{} (pid {})", h.identity, h.pid),
            None => "another invocation".to_string(),
        }
    }

    /// Only a holder recorded on this host can be proven dead.
    fn is_stale(&self, local_host: Option<&str>) -> bool {
        match (self.host.as_deref(), local_host) {
            (Some(host), Some(local)) if host == local => !pid_alive(self.pid),
            _ => false,
        }
    }
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}

fn local_host() -> Option<String> {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
        .filter(|h| !h.is_empty() && !h.contains(char::is_whitespace))
}

/// Held lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    pub fn acquire(path: &Path, identity: &str, policy: WaitPolicy) -> Result<Self, NodeError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| NodeError::Io {
                context: format!("creating directory {}", parent.display()),
                source: e,
            })?;
        }

        let host = local_host();
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(file) => return Self::claim(path, file, identity, host.as_deref()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_holder(path);
                    if let Some(h) = &holder
                        && h.is_stale(host.as_deref())
                    {
                        reclaim_stale(path, h, host.as_deref())?;
                        continue;
                    }

                    let holder = LockHolder::describe(holder.as_ref());
                    match policy {
                        WaitPolicy::NoWait => return Err(NodeError::LockBusy { holder }),
                        WaitPolicy::Bounded(timeout) => {
                            if started.elapsed() >= timeout {
                                return Err(NodeError::LockTimeout {
                                    holder,
                                    waited_s: timeout.as_secs(),
                                });
                            }
                            std::thread::sleep(POLL_INTERVAL);
                        }
                    }
                }
                Err(e) => {
                    return Err(NodeError::Io {
                        context: format!("creating lock file {}", path.display()),
                        source: e,
                    });
                }
            }
        }
    }

    /// Record the holder in a freshly created lock file. The guard exists
    /// before the write, so a failed write still removes the file.
    fn claim(
        path: &Path,
        mut file: impl Write,
        identity: &str,
        host: Option<&str>,
    ) -> Result<Self, NodeError> {
        let lock = Self {
            path: path.to_path_buf(),
        };
        let pid = std::process::id();
        let line = match host {
            Some(host) => format!("{identity} {pid} {host}\n"),
            None => format!("{identity} {pid}\n"),
        };
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| NodeError::Io {
                context: format!("writing lock file {}", path.display()),
                source: e,
            })?;
        tracing::debug!(path = %path.display(), identity, pid, "acquired session lock");
        Ok(lock)
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "released session lock"),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file")
            }
        }
    }
}

fn read_holder(path: &Path) -> Option<LockHolder> {
    fs::read_to_string(path)
        .ok()
        .and_then(|c| LockHolder::parse(&c))
}

fn guard_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".guard");
    PathBuf::from(name)
}

/// Remove `path` only if it still names the dead `seen` holder. Runs under
/// an exclusive OS lock on the guard file, which the kernel drops if this
/// process dies mid-reclaim.
fn reclaim_stale(path: &Path, seen: &LockHolder, host: Option<&str>) -> Result<(), NodeError> {
    let guard_path = guard_path(path);
    let io_err = |context: String| move |source: std::io::Error| NodeError::Io { context, source };
    let guard = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&guard_path)
        .map_err(io_err(format!("opening {}", guard_path.display())))?;
    guard
        .lock()
        .map_err(io_err(format!("locking {}", guard_path.display())))?;

    let result = match read_holder(path) {
        Some(current) if current == *seen && current.is_stale(host) => {
            tracing::warn!(identity = %seen.identity, pid = seen.pid, "removing stale session lock");
            match fs::remove_file(path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(NodeError::Io {
                    context: format!("removing stale lock file {}", path.display()),
                    source: e,
                }),
                _ => Ok(()),
            }
        }
        // Gone, or replaced by a new holder: let the caller retry.
        _ => Ok(()),
    };
    unlock(guard);
    result
}

fn unlock(guard: File) {
    if let Err(e) = guard.unlock() {
        tracing::debug!(error = %e, "unlocking reclaim guard");
    }
}

/// Operator identity: explicit value, else `$USER`, else `$LOGNAME`.
pub fn operator_identity(configured: Option<&str>) -> String {
    configured
        .map(String::from)
        .or_else(|| std::env::var("USER").ok())
        .or_else(|| std::env::var("LOGNAME").ok())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
