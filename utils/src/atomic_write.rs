//! Atomic file write helpers.
//!
//! Writes go to a temp file in the target directory which is then renamed over
//! the destination. Where rename-over-existing fails (Windows), the old file is
//! moved to `<name>.bak` first and restored if the second rename fails.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Allow the file to inherit the default umask.
    #[default]
    Default,
    /// Owner-only read/write (0o600 on Unix). Used for files that may hold
    /// prompt text or credentials.
    OwnerOnly,
}

impl PersistMode {
    #[cfg(unix)]
    fn mode(self) -> Option<u32> {
        match self {
            Self::Default => None,
            Self::OwnerOnly => Some(0o600),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// `fsync` the temp file before the rename.
    pub sync: bool,
    pub mode: PersistMode,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            sync: true,
            mode: PersistMode::OwnerOnly,
        }
    }
}

/// Sibling path used while an overwrite is in flight.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// Restore `<path>.bak` when `path` itself is missing.
///
/// That combination only happens after a crash between the two renames of the
/// fallback path in [`atomic_write_with_options`]. Returns true if a backup
/// was restored.
pub fn recover_bak_file(path: &Path) -> bool {
    let backup = backup_path(path);
    if path.exists() || !backup.exists() {
        return false;
    }
    match fs::rename(&backup, path) {
        Ok(()) => {
            warn!(path = %path.display(), "Recovered .bak file from interrupted write");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), "Failed to recover .bak file: {e}");
            false
        }
    }
}

pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    atomic_write_with_options(path, bytes, WriteOptions::default())
}

pub fn atomic_write_with_options(
    path: impl AsRef<Path>,
    bytes: &[u8],
    options: WriteOptions,
) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    set_mode(tmp.path(), options.mode)?;

    tmp.write_all(bytes)?;
    if options.sync {
        tmp.as_file().sync_all()?;
    }

    if let Err(err) = tmp.persist(path) {
        if !path.exists() {
            return Err(err.error);
        }
        let backup = backup_path(path);
        let _ = fs::remove_file(&backup);
        fs::rename(path, &backup)?;

        if let Err(retry) = err.file.persist(path) {
            let _ = fs::rename(&backup, path);
            return Err(retry.error);
        }
        if let Err(e) = fs::remove_file(&backup) {
            debug!(path = %backup.display(), "Failed to remove .bak after write: {e}");
        }
    }

    set_mode(path, options.mode)
}

/// Create `dir` and its parents, restricting the leaf to the owner on Unix.
pub fn create_private_dir_all(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: PersistMode) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode.mode() {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: PersistMode) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        PersistMode, WriteOptions, atomic_write_with_options, backup_path, recover_bak_file,
    };

    fn fast(mode: PersistMode) -> WriteOptions {
        WriteOptions { sync: false, mode }
    }

    #[test]
    fn overwrites_existing_and_leaves_no_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");

        atomic_write_with_options(&path, b"one", fast(PersistMode::Default)).expect("write one");
        atomic_write_with_options(&path, b"two", fast(PersistMode::Default)).expect("write two");

        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn backup_path_appends_suffix() {
        let path = std::path::Path::new("/tmp/sessions/default.json");
        assert_eq!(
            backup_path(path),
            std::path::PathBuf::from("/tmp/sessions/default.json.bak")
        );
    }

    #[test]
    fn recover_restores_orphaned_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        fs::write(backup_path(&path), b"saved").expect("write bak");

        assert!(recover_bak_file(&path));
        assert_eq!(fs::read_to_string(&path).expect("read"), "saved");
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn recover_ignores_backup_when_primary_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        fs::write(&path, b"current").expect("write");
        fs::write(backup_path(&path), b"stale").expect("write bak");

        assert!(!recover_bak_file(&path));
        assert_eq!(fs::read_to_string(&path).expect("read"), "current");
    }

    #[cfg(unix)]
    #[test]
    fn owner_only_sets_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("secure.json");

        atomic_write_with_options(&path, b"secret", fast(PersistMode::OwnerOnly)).expect("write");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn private_dir_is_0700() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("sessions");
        super::create_private_dir_all(&nested).expect("create");

        let mode = fs::metadata(&nested).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }
}
