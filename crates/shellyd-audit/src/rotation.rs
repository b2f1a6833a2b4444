//! Age-based rotation for the audit log.

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Archive name prefix, e.g. `audit-20260802T101500.log`.
const ARCHIVE_PREFIX: &str = "audit-";
const ARCHIVE_SUFFIX: &str = ".log";

/// Rename the active file to a timestamped archive if its mtime is older
/// than the retention window. Returns whether a rotation happened.
pub fn rotate_if_stale(path: &Path, retention_days: u32) -> std::io::Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    let mtime = std::fs::metadata(path)?.modified()?;
    if !older_than(mtime, retention_days) {
        return Ok(false);
    }

    let stamp = chrono::DateTime::<chrono::Utc>::from(mtime)
        .format("%Y%m%dT%H%M%S")
        .to_string();
    let archive_name = format!("{}{}{}", ARCHIVE_PREFIX, stamp, ARCHIVE_SUFFIX);
    let archive = path.with_file_name(archive_name);

    std::fs::rename(path, &archive)?;
    info!(archive = %archive.display(), "Rotated audit log");
    Ok(true)
}

/// Delete archives older than the retention window.
pub fn prune_archives(path: &Path, retention_days: u32) -> std::io::Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    if !dir.exists() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(ARCHIVE_PREFIX) || !name.ends_with(ARCHIVE_SUFFIX) {
            continue;
        }

        let mtime = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(err) => {
                warn!(file = %name, error = %err, "Could not stat audit archive");
                continue;
            }
        };

        if older_than(mtime, retention_days) {
            if let Err(err) = std::fs::remove_file(entry.path()) {
                warn!(file = %name, error = %err, "Could not delete audit archive");
            } else {
                info!(file = %name, "Deleted expired audit archive");
            }
        }
    }

    Ok(())
}

fn older_than(mtime: SystemTime, retention_days: u32) -> bool {
    let window = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    match SystemTime::now().duration_since(mtime) {
        Ok(age) => age > window,
        // Clock skew into the future counts as fresh.
        Err(_) => false,
    }
}
