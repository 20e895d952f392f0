//! Shared infrastructure utilities for promptq.
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename) and
//!   owner-only directory creation for session and config files.

pub mod atomic_write;

pub use atomic_write::{
    PersistMode, WriteOptions, atomic_write, atomic_write_with_options, backup_path,
    create_private_dir_all, recover_bak_file,
};
