//! Atomic file writes for the control script and the PID file.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::{Result, ServiceError};

/// Write `content` next to `path` and rename it into place, then apply `mode`.
/// Readers never observe a half-written file.
pub(super) fn write_file_atomic(path: &Path, content: &str, mode: u32) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&temp_path)
            .map_err(|e| ServiceError::io(format!("creating {}", temp_path.display()), e))?;

        file.write_all(content.as_bytes())
            .map_err(|e| ServiceError::io(format!("writing {}", temp_path.display()), e))?;

        file.sync_all()
            .map_err(|e| ServiceError::io(format!("syncing {}", temp_path.display()), e))?;
    }

    // umask may have stripped bits from the create mode.
    fs::set_permissions(&temp_path, fs::Permissions::from_mode(mode))
        .map_err(|e| ServiceError::io(format!("chmod {}", temp_path.display()), e))?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        ServiceError::io(format!("renaming into {}", path.display()), e)
    })
}
