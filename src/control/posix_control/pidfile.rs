//! PID file: presence means "running", content is the daemon's process id.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::file_ops::write_file_atomic;
use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{name}.pid")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Record `pid` as decimal text plus newline.
    pub fn write(&self, pid: u32) -> Result<()> {
        write_file_atomic(&self.path, &format!("{pid}\n"), 0o644)
    }

    pub fn read(&self) -> Result<i32> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| ServiceError::io(format!("reading {}", self.path.display()), e))?;
        parse_pid(&raw).ok_or_else(|| {
            ServiceError::OperationFailed(format!(
                "{} does not contain a valid process id",
                self.path.display()
            ))
        })
    }

    /// Remove the file; returns whether it was present.
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ServiceError::io(
                format!("removing {}", self.path.display()),
                e,
            )),
        }
    }
}

fn parse_pid(raw: &str) -> Option<i32> {
    raw.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_trailing_newline_only_positive() {
        assert_eq!(parse_pid("4242\n"), Some(4242));
        assert_eq!(parse_pid("  17 "), Some(17));
        assert_eq!(parse_pid(""), None);
        assert_eq!(parse_pid("0\n"), None);
        assert_eq!(parse_pid("-1"), None);
        assert_eq!(parse_pid("12ab"), None);
    }

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path(), "svc");
        assert_eq!(pid_file.path(), dir.path().join("svc.pid"));
        assert!(!pid_file.exists());

        pid_file.write(31337).unwrap();
        assert_eq!(fs::read_to_string(pid_file.path()).unwrap(), "31337\n");
        assert_eq!(pid_file.read().unwrap(), 31337);

        assert!(pid_file.remove().unwrap());
        assert!(!pid_file.remove().unwrap());
    }
}
