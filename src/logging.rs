//! Audit log sink for the tracing subscriber.
//!
//! The subscriber is installed before the config is read, so the log's
//! location is unknown at that point. [`AuditLog`] is the layer's writer and
//! drops events until [`AuditSwitch::open`] points it at the registry's
//! `audit.log`, which happens only for mutating commands.
//!
//! Several invocations append to the same file while one of them holds the
//! session lock and the others wait. Each event is buffered and appended
//! with a single write so lines from different processes never interleave.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;

#[derive(Default)]
struct Sink(Mutex<Option<File>>);

impl Sink {
    fn file(&self) -> MutexGuard<'_, Option<File>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `MakeWriter` for the audit layer.
#[derive(Clone, Default)]
pub struct AuditLog {
    sink: Arc<Sink>,
}

/// Turns an [`AuditLog`] on once the command is known to mutate.
#[derive(Clone)]
pub struct AuditSwitch {
    sink: Arc<Sink>,
}

impl AuditLog {
    pub fn new() -> (Self, AuditSwitch) {
        let log = Self::default();
        let switch = AuditSwitch {
            sink: log.sink.clone(),
        };
        (log, switch)
    }
}

impl AuditSwitch {
    /// Append to `path` from now on, starting with a line naming who runs
    /// which command.
    pub fn open(&self, path: &Path, identity: &str, command: &str) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let header = format!(
            "# {command} by {identity} (pid {})\n",
            std::process::id()
        );
        file.write_all(header.as_bytes())?;
        *self.sink.file() = Some(file);
        Ok(())
    }
}

/// One formatted event, appended when dropped.
pub struct AuditEvent {
    sink: Arc<Sink>,
    buf: Vec<u8>,
}

impl Write for AuditEvent {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.buf);
        match self.sink.file().as_mut() {
            Some(file) => file.write_all(&line),
            None => Ok(()),
        }
    }
}

impl Drop for AuditEvent {
    fn drop(&mut self) {
        // Nowhere to report a failed audit write from inside the subscriber.
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for AuditLog {
    type Writer = AuditEvent;

    fn make_writer(&'a self) -> Self::Writer {
        AuditEvent {
            sink: self.sink.clone(),
            buf: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(log: &AuditLog, line: &str) {
        log.make_writer().write_all(line.as_bytes()).unwrap();
    }

    #[test]
    fn events_before_open_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.log");
        let (log, switch) = AuditLog::new();

        emit(&log, "too early\n");
        assert!(!path.exists());

        switch.open(&path, "alice", "set").unwrap();
        emit(&log, "set vm1\n");
        let pid = std::process::id();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("# set by alice (pid {pid})\nset vm1\n")
        );
    }

    #[test]
    fn appends_to_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        fs::write(&path, "earlier\n").unwrap();

        let (log, switch) = AuditLog::new();
        switch.open(&path, "bob", "delete").unwrap();
        emit(&log, "later\n");

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "earlier");
        assert!(lines[1].starts_with("# delete by bob"));
        assert_eq!(lines[2], "later");
    }

    #[test]
    fn event_is_written_whole_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let (log, switch) = AuditLog::new();
        switch.open(&path, "alice", "new").unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let mut event = log.make_writer();
        event.write_all(b"created ").unwrap();
        event.write_all(b"vm1\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), before);

        drop(event);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{before}created vm1\n")
        );
    }
}
