//! Free space check for the download directory.

use anyhow::Result;
use std::path::Path;

/// Bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
pub fn free_bytes(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if r != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn free_bytes(_path: &Path) -> Result<u64> {
    anyhow::bail!("free space check is not supported on this platform")
}

/// Log a warning when `dir` has less than `min_free` bytes. Returns the free byte count if known.
pub fn warn_if_low(dir: &Path, min_free: u64) -> Option<u64> {
    // The directory may not exist yet; its parent is on the same filesystem.
    let probe = if dir.exists() {
        dir
    } else {
        dir.parent().unwrap_or(dir)
    };
    match free_bytes(probe) {
        Ok(free) => {
            if free < min_free {
                tracing::warn!(
                    dir = %dir.display(),
                    free_mib = free / (1024 * 1024),
                    "low free space for downloads"
                );
            }
            Some(free)
        }
        Err(e) => {
            tracing::debug!(dir = %dir.display(), "free space unknown: {:#}", e);
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_has_some_space() {
        let dir = tempfile::tempdir().unwrap();
        assert!(free_bytes(dir.path()).unwrap() > 0);
    }

    #[test]
    fn missing_path_is_error() {
        assert!(free_bytes(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn warn_if_low_probes_parent_of_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(warn_if_low(&dir.path().join("later"), u64::MAX).is_some());
    }
}
