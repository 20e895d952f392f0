//! On-disk session file format.
//!
//! Each session is a single JSON document holding the draft, the outgoing
//! queue (with statuses), and the bounded sent history.
//!
//! # Version Compatibility
//!
//! A file written with a different `version` is ignored and the session
//! starts fresh; the old file is moved aside rather than overwritten.

use std::fs;
use std::path::{Path, PathBuf};

use promptq_types::{EntryStatus, QueueEntry};
use promptq_utils::{PersistMode, WriteOptions, atomic_write_with_options, recover_bak_file};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("session file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("session file {} has version {found}, expected {}", path.display(), SessionFile::CURRENT_VERSION)]
    Incompatible { path: PathBuf, found: u32 },
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persisted state for one session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFile {
    #[serde(default)]
    pub draft: String,
    /// Entries not yet sent, in enqueue order.
    #[serde(default)]
    pub queue: Vec<QueueEntry>,
    /// Sent entries, oldest first.
    #[serde(default)]
    pub history: Vec<QueueEntry>,
    /// Schema version. Increment on breaking changes.
    pub version: u32,
}

impl SessionFile {
    pub const CURRENT_VERSION: u32 = 1;

    #[must_use]
    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_compatible(&self) -> bool {
        self.version == Self::CURRENT_VERSION
    }

    /// Repair state left behind by a crash.
    ///
    /// An entry persisted as `sending` never got its result recorded, so it
    /// goes back to `pending` and will be delivered again. A `sent` entry
    /// still in the queue is moved to history.
    pub(crate) fn recover(&mut self) -> usize {
        let mut requeued = 0;
        let mut delivered = Vec::new();
        self.queue.retain_mut(|entry| match entry.status {
            EntryStatus::Sending => {
                entry.status = EntryStatus::Pending;
                requeued += 1;
                true
            }
            EntryStatus::Sent => {
                delivered.push(entry.clone());
                false
            }
            EntryStatus::Pending | EntryStatus::Failed => true,
        });
        self.history.extend(delivered);
        requeued
    }

    /// Read a session file. `Ok(None)` means there is nothing on disk yet.
    pub(crate) fn read(path: &Path) -> Result<Option<Self>, StoreError> {
        recover_bak_file(path);
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: Self = serde_json::from_str(&data).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if !file.is_compatible() {
            return Err(StoreError::Incompatible {
                path: path.to_path_buf(),
                found: file.version,
            });
        }
        Ok(Some(file))
    }

    pub(crate) fn write(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            promptq_utils::create_private_dir_all(parent).map_err(|source| {
                StoreError::Write {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        }
        atomic_write_with_options(
            path,
            json.as_bytes(),
            WriteOptions {
                sync: true,
                mode: PersistMode::OwnerOnly,
            },
        )
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// File name for a session, with anything outside `[A-Za-z0-9_-]` replaced.
#[must_use]
pub fn session_file_name(session: &str) -> String {
    let mut name: String = session
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        name.push_str("default");
    }
    name.push_str(".json");
    name
}

#[cfg(test)]
mod tests {
    use super::{SessionFile, StoreError, session_file_name};
    use promptq_types::{EntryId, EntryStatus, NonEmptyString, QueueEntry, UnixMillis};

    fn entry(id: &str, status: EntryStatus) -> QueueEntry {
        let mut e = QueueEntry::new(
            EntryId::new(id),
            NonEmptyString::new(format!("prompt {id}")).unwrap(),
            UnixMillis(1),
        );
        e.status = status;
        e
    }

    #[test]
    fn default_version_is_incompatible() {
        assert!(!SessionFile::default().is_compatible());
        assert!(SessionFile::new().is_compatible());
    }

    #[test]
    fn recover_requeues_sending_and_moves_sent() {
        let mut file = SessionFile::new();
        file.queue = vec![
            entry("a", EntryStatus::Sending),
            entry("b", EntryStatus::Sent),
            entry("c", EntryStatus::Failed),
        ];

        assert_eq!(file.recover(), 1);
        let statuses: Vec<_> = file.queue.iter().map(|e| (e.id.as_str(), e.status)).collect();
        assert_eq!(
            statuses,
            vec![("a", EntryStatus::Pending), ("c", EntryStatus::Failed)]
        );
        assert_eq!(file.history.len(), 1);
        assert_eq!(file.history[0].id.as_str(), "b");
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions").join("s.json");

        let mut file = SessionFile::new();
        file.draft = "half typed".to_string();
        file.queue.push(entry("a", EntryStatus::Failed));
        file.write(&path).unwrap();

        let loaded = SessionFile::read(&path).unwrap().unwrap();
        assert_eq!(loaded, file);
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SessionFile::read(&dir.path().join("nope.json")).unwrap().is_none());
    }

    #[test]
    fn read_rejects_other_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, r#"{"draft":"x","queue":[],"history":[],"version":99}"#).unwrap();

        let err = SessionFile::read(&path).unwrap_err();
        assert!(matches!(err, StoreError::Incompatible { found: 99, .. }));
    }

    #[test]
    fn read_reports_garbage_as_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            SessionFile::read(&path).unwrap_err(),
            StoreError::Parse { .. }
        ));
    }

    #[test]
    fn session_file_name_is_path_safe() {
        assert_eq!(session_file_name("work"), "work.json");
        assert_eq!(session_file_name("../etc/passwd"), "___etc_passwd.json");
        assert_eq!(session_file_name("  "), "default.json");
    }
}
