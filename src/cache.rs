//! Staleness checks for incremental builds.
//!
//! Rendering is cheap compared to rewriting every page of a large site on each
//! run, and rewriting bumps modification times that downstream sync tools key
//! off. A page is therefore only regenerated when its source is newer than the
//! page already on disk.
//!
//! # Policy
//!
//! ```text
//! destination missing             → rebuild
//! destination stat fails          → error
//! destination mtime >  source     → up to date (skip)
//! destination mtime <= source     → rebuild
//! ```
//!
//! Equal timestamps rebuild: filesystems with coarse mtime resolution can give
//! a source edited right after the last build the same stamp as its page.
//!
//! The check is timestamp-only. A destination touched without its content
//! changing counts as up to date, and clock skew between machines can force
//! unnecessary rebuilds. Templates and site data are not tracked either;
//! delete the generated pages to force a full rebuild.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use crate::types::BuildStatus;

/// Decide whether `dst` must be regenerated from a source modified at `src_modified`.
pub fn should_rebuild(src_modified: SystemTime, dst: &Path) -> io::Result<bool> {
    let dst_modified = match std::fs::metadata(dst) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %dst.display(), "destination missing, rebuilding");
            return Ok(true);
        }
        Err(e) => return Err(e),
    };
    let rebuild = dst_modified <= src_modified;
    tracing::debug!(path = %dst.display(), rebuild, "staleness check");
    Ok(rebuild)
}

/// Summary of a generate phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    pub written: u32,
    pub up_to_date: u32,
}

impl BuildStats {
    pub fn record(&mut self, status: BuildStatus) {
        match status {
            BuildStatus::Written => self.written += 1,
            BuildStatus::UpToDate => self.up_to_date += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.written + self.up_to_date
    }
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.up_to_date > 0 {
            write!(
                f,
                "{} written, {} up to date ({} total)",
                self.written,
                self.up_to_date,
                self.total()
            )
        } else {
            write!(f, "{} written", self.written)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn write_with_mtime(path: &Path, modified: SystemTime) {
        fs::write(path, "<p>page</p>").unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    // =========================================================================
    // should_rebuild
    // =========================================================================

    #[test]
    fn missing_destination_rebuilds() {
        let tmp = TempDir::new().unwrap();
        assert!(should_rebuild(at(1_000), &tmp.path().join("a.html")).unwrap());
    }

    #[test]
    fn newer_destination_is_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("a.html");
        write_with_mtime(&dst, at(2_000));
        assert!(!should_rebuild(at(1_000), &dst).unwrap());
    }

    #[test]
    fn equal_mtime_rebuilds() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("a.html");
        write_with_mtime(&dst, at(1_000));
        assert!(should_rebuild(at(1_000), &dst).unwrap());
    }

    #[test]
    fn older_destination_rebuilds() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("a.html");
        write_with_mtime(&dst, at(500));
        assert!(should_rebuild(at(1_000), &dst).unwrap());
    }

    #[test]
    fn stat_failure_is_surfaced() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, "x").unwrap();
        // a path through a regular file fails with something other than NotFound
        let result = should_rebuild(at(1_000), &file.join("a.html"));
        assert!(result.is_err());
    }

    // =========================================================================
    // BuildStats
    // =========================================================================

    #[test]
    fn stats_record_each_status() {
        let mut s = BuildStats::default();
        s.record(BuildStatus::Written);
        s.record(BuildStatus::Written);
        s.record(BuildStatus::UpToDate);
        assert_eq!(s.written, 2);
        assert_eq!(s.up_to_date, 1);
        assert_eq!(s.total(), 3);
    }

    #[test]
    fn stats_display_with_up_to_date() {
        let s = BuildStats {
            written: 2,
            up_to_date: 3,
        };
        assert_eq!(format!("{}", s), "2 written, 3 up to date (5 total)");
    }

    #[test]
    fn stats_display_all_written() {
        let s = BuildStats {
            written: 4,
            up_to_date: 0,
        };
        assert_eq!(format!("{}", s), "4 written");
    }
}
