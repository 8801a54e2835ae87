//! CLI output formatting for a build.
//!
//! Output names documents by title first, with the source file as context,
//! so a run reads as an inventory of the site rather than a list of paths.
//!
//! # Output Format
//!
//! ## Progress
//!
//! One line per document as the generate phase finishes it, in completion
//! order:
//!
//! ```text
//! hello.md → hello-world.html
//! notes.md → notes.html (up to date)
//! ```
//!
//! ## Summary
//!
//! After a successful build, the documents in index order:
//!
//! ```text
//! 001 Hello World → hello-world.html
//!     Source: hello.md
//!     Time: 2024-03-01 09:30
//! 002 notes → notes.html (up to date)
//!     Source: notes.md
//!     Time: 2024-02-11 18:02
//!
//! Index → index.html
//! Built 1 written, 1 up to date (2 total)
//! ```
//!
//! ## Errors
//!
//! A failed phase lists every error under one heading:
//!
//! ```text
//! 2 error(s) while loading:
//!     broken.md: invalid YAML metadata: ...
//!     same.html would be written by one.md and two.md
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes it out. Format functions are pure.

use std::path::Path;

use crate::pipeline::{BuildEvent, BuildFailure, BuildReport};
use crate::types::BuildStatus;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn status_suffix(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Written => "",
        BuildStatus::UpToDate => " (up to date)",
    }
}

// ============================================================================
// Progress
// ============================================================================

pub fn format_build_event(event: &BuildEvent) -> Vec<String> {
    vec![format!(
        "{} → {}{}",
        file_label(&event.source),
        event.output,
        status_suffix(event.status)
    )]
}

// ============================================================================
// Summary
// ============================================================================

pub fn format_build_output(report: &BuildReport) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, result) in report.results.iter().enumerate() {
        lines.push(format!(
            "{} {} → {}{}",
            format_index(i + 1),
            result.title,
            result.file_name(),
            status_suffix(result.status)
        ));
        lines.push(format!("{}Source: {}", indent(1), file_label(&result.source)));
        lines.push(format!(
            "{}Time: {}",
            indent(1),
            result.time.format(TIME_FORMAT)
        ));
    }

    if let Some(index) = &report.index {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("Index → {}", file_label(index)));
    }

    if report.results.is_empty() {
        lines.push("No documents found".to_string());
    } else {
        lines.push(format!("Built {}", report.stats));
    }
    lines
}

pub fn print_build_output(report: &BuildReport) {
    for line in format_build_output(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Errors
// ============================================================================

pub fn format_build_failure(failure: &BuildFailure) -> Vec<String> {
    match failure {
        BuildFailure::Setup(e) => vec![format!("error: {e}")],
        BuildFailure::Phase { errors, .. } => {
            let mut lines = vec![format!("{failure}:")];
            lines.extend(errors.iter().map(|e| format!("{}{e}", indent(1))));
            lines
        }
    }
}

pub fn print_build_failure(failure: &BuildFailure) {
    for line in format_build_failure(failure) {
        eprintln!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
