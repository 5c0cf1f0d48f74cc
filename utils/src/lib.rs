//! Shared filesystem utilities for Stride.
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)
//! - **`secure_fs`**: Owner-only directory and file permissions on Unix

pub mod atomic_write;
pub mod secure_fs;

pub use atomic_write::{AtomicWriteOptions, FileSyncPolicy, atomic_write, atomic_write_with_options};
pub use secure_fs::{ensure_owner_only_file, ensure_secure_dir};
