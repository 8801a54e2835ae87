//! Shared test utilities for the quire test suite.
//!
//! Source directories are built file by file in a `TempDir`. Staleness is
//! decided by modification times, so every helper that writes a file pins its
//! mtime explicitly instead of trusting the clock.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_doc(tmp.path(), "a.md", "hello\n", at(1_000));
//! // ... build ...
//! let page = read_output(tmp.path(), "a.html");
//! ```

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A fixed point in time, `secs` after the epoch.
pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// Write `dir/name` and set its modification time.
pub fn write_doc(dir: &Path, name: &str, content: &str, modified: SystemTime) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    set_mtime(&path, modified);
    path
}

pub fn set_mtime(path: &Path, modified: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
}

/// Read a generated file, panicking with its name if it is missing.
pub fn read_output(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap_or_else(|e| panic!("{name}: {e}"))
}
