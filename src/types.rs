//! Shared types passed between pipeline stages.
//!
//! Results flow from per-document workers through the
//! [`Collector`](crate::collect::Collector) into index generation, so they are
//! plain owned values with no borrows into worker state.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::metadata::Metadata;

/// Anything the ordered collector can sort: newest first by this timestamp.
pub trait Dated {
    fn time(&self) -> DateTime<Utc>;
}

/// What the generate phase did with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// The page was rendered and written this run.
    Written,
    /// The page on disk was newer than its source and was left alone.
    UpToDate,
}

/// Record of one document that made it through the generate phase.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub source_modified: SystemTime,
    /// Modification time of the page on disk after this run.
    pub destination_modified: SystemTime,
    /// Resolved metadata, defaults applied.
    pub meta: Metadata,
    pub title: String,
    pub time: DateTime<Utc>,
    pub status: BuildStatus,
}

impl BuildResult {
    /// Output filename relative to the destination directory.
    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Dated for BuildResult {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}
