//! The build: list, load, check, generate, index.
//!
//! ```text
//! list_sources ─▶ load phase ──▶ destination check ─▶ generate phase ──▶ index
//!                 (TaskGroup +                        (TaskGroup +
//!                  Collector)                          Collector)
//! ```
//!
//! ## Load phase
//!
//! One unit per markdown file: stat, read (into an arena buffer), parse,
//! extract and detach the metadata block, back-fill defaults, resolve the
//! content-pass delimiters. Loaded documents go to a collector.
//!
//! ## Destination check
//!
//! Output filenames come from titles, so two documents can collide on one
//! page, and a document titled "Index" would overwrite the index. Both are
//! reported before anything is written.
//!
//! ## Generate phase
//!
//! One unit per loaded document:
//!
//! 1. Staleness check against the existing page. An up-to-date page is left
//!    alone but still reported, so it stays in the index.
//! 2. Render all three passes in memory.
//! 3. Write the page, stat it, hand the [`BuildResult`] to the collector.
//!
//! A page is only written once it rendered completely, so a failing document
//! never leaves a file behind. Units check the phase's cancel token between
//! steps and stop early once a sibling failed.
//!
//! ## Errors
//!
//! Each phase reports every error its units produced, not just the first.
//! Phases are sequential: if loading fails nothing is generated, and if
//! generating fails no index is written.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::SystemTime;
use thiserror::Error;

use crate::arena::BufferArena;
use crate::cache::{self, BuildStats};
use crate::collect::Collector;
use crate::config::{self, BuildConfig, ConfigError};
use crate::document::Document;
use crate::metadata::{self, MetaValue, Metadata, MetadataError};
use crate::naming;
use crate::render::{BodyRenderer, PageRenderer, RenderError};
use crate::task::{CancelToken, TaskGroup, TaskPanic};
use crate::templates::{Delimiters, PageContext, PageInfo, Templates};
use crate::types::{BuildResult, BuildStatus, Dated};

/// Name of the generated index page.
pub const INDEX_FILE: &str = "index.html";

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: MetadataError,
    },
    #[error("{path}: {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: RenderError,
    },
    #[error("{output} would be written by {}", display_paths(.sources))]
    DuplicateDestination { output: String, sources: Vec<PathBuf> },
    #[error("{path}: output {output} is reserved for the index")]
    ReservedDestination { path: PathBuf, output: String },
    #[error("index template: {0}")]
    Index(#[source] minijinja::Error),
    #[error(transparent)]
    Panicked(#[from] TaskPanic),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" and ")
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BuildError + '_ {
    move |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A step of the build, used to group errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Generating,
    Indexing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Loading => f.write_str("loading"),
            Phase::Generating => f.write_str("generating"),
            Phase::Indexing => f.write_str("indexing"),
        }
    }
}

/// Why a build stopped.
#[derive(Error, Debug)]
pub enum BuildFailure {
    /// Failed before any phase started.
    #[error(transparent)]
    Setup(BuildError),
    #[error("{} error(s) while {phase}", .errors.len())]
    Phase {
        phase: Phase,
        errors: Vec<BuildError>,
    },
}

/// Progress notification for one generated document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEvent {
    pub source: PathBuf,
    pub output: String,
    pub status: BuildStatus,
}

/// Outcome of a successful build.
#[derive(Debug)]
pub struct BuildReport {
    /// Every document, newest first.
    pub results: Vec<BuildResult>,
    pub stats: BuildStats,
    /// Path of the written index, if one was generated.
    pub index: Option<PathBuf>,
}

/// A parsed document with resolved metadata, ready to render.
#[derive(Debug)]
pub struct LoadedDocument {
    pub source: PathBuf,
    pub modified: SystemTime,
    pub doc: Document,
    pub meta: Metadata,
    pub title: String,
    pub time: DateTime<Utc>,
    /// Output filename derived from the title.
    pub output: String,
    pub delims: Delimiters,
}

impl LoadedDocument {
    fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Dated for LoadedDocument {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

/// A configured site, ready to build.
pub struct Site {
    inner: Arc<SiteInner>,
}

struct SiteInner {
    config: BuildConfig,
    templates: Templates,
    data: MetaValue,
    renderer: Box<dyn BodyRenderer>,
    arena: BufferArena,
}

impl Site {
    /// Validate `config` and load everything the build needs up front.
    pub fn open(config: BuildConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let templates =
            Templates::load(config.page_template.as_deref(), config.index_template.as_deref())?;
        let data = config::load_site_data(config.data.as_deref())?;
        let renderer = config.body_renderer()?;
        Ok(Self {
            inner: Arc::new(SiteInner {
                config,
                templates,
                data,
                renderer,
                arena: BufferArena::new(),
            }),
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.inner.config
    }

    /// Run the whole build.
    ///
    /// `progress` receives one event per generated or up-to-date document.
    pub fn build(&self, progress: Option<Sender<BuildEvent>>) -> Result<BuildReport, BuildFailure> {
        let config = &self.inner.config;
        let sources = list_sources(&config.source).map_err(BuildFailure::Setup)?;
        fs::create_dir_all(&config.output)
            .map_err(io_error(&config.output))
            .map_err(BuildFailure::Setup)?;

        tracing::info!(documents = sources.len(), "loading");
        let loaded = self.load(sources).map_err(|errors| BuildFailure::Phase {
            phase: Phase::Loading,
            errors,
        })?;

        let conflicts = check_destinations(&loaded, config.gen_index);
        if !conflicts.is_empty() {
            return Err(BuildFailure::Phase {
                phase: Phase::Loading,
                errors: conflicts,
            });
        }

        tracing::info!(documents = loaded.len(), "generating");
        let results = self
            .generate(loaded, progress)
            .map_err(|errors| BuildFailure::Phase {
                phase: Phase::Generating,
                errors,
            })?;

        let mut stats = BuildStats::default();
        for result in &results {
            stats.record(result.status);
        }

        let index = if config.gen_index {
            let path = self.write_index(&results).map_err(|e| BuildFailure::Phase {
                phase: Phase::Indexing,
                errors: vec![e],
            })?;
            Some(path)
        } else {
            None
        };

        tracing::info!(%stats, pooled_buffers = self.inner.arena.pooled(), "build finished");
        Ok(BuildReport {
            results,
            stats,
            index,
        })
    }

    fn load(&self, sources: Vec<PathBuf>) -> Result<Vec<LoadedDocument>, Vec<BuildError>> {
        let group: TaskGroup<BuildError> = TaskGroup::new();
        let collector = Collector::start(group.cancel_token());

        for path in sources {
            let site = Arc::clone(&self.inner);
            let handoff = collector.handoff();
            group.spawn(move |cancel| {
                let loaded = load_document(&site, path)?;
                if cancel.is_cancelled() {
                    return Ok(());
                }
                if handoff.deliver(loaded).is_err() {
                    tracing::debug!("load cancelled, discarding document");
                }
                Ok(())
            });
        }

        finish_phase(group, collector)
    }

    fn generate(
        &self,
        loaded: Vec<LoadedDocument>,
        progress: Option<Sender<BuildEvent>>,
    ) -> Result<Vec<BuildResult>, Vec<BuildError>> {
        let group: TaskGroup<BuildError> = TaskGroup::new();
        let collector = Collector::start(group.cancel_token());

        for doc in loaded {
            let site = Arc::clone(&self.inner);
            let handoff = collector.handoff();
            let progress = progress.clone();
            group.spawn(move |cancel| {
                let Some(result) = generate_document(&site, doc, cancel)? else {
                    return Ok(());
                };
                if let Some(tx) = &progress {
                    let _ = tx.send(BuildEvent {
                        source: result.source.clone(),
                        output: result.file_name(),
                        status: result.status,
                    });
                }
                if handoff.deliver(result).is_err() {
                    tracing::warn!("generate cancelled, discarding result");
                }
                Ok(())
            });
        }

        finish_phase(group, collector)
    }

    fn write_index(&self, results: &[BuildResult]) -> Result<PathBuf, BuildError> {
        let site = &self.inner;
        let html = site
            .templates
            .render_index(results, &site.data)
            .map_err(BuildError::Index)?;
        let path = site.config.output.join(INDEX_FILE);
        fs::write(&path, html).map_err(io_error(&path))?;
        tracing::debug!(path = %path.display(), pages = results.len(), "index written");
        Ok(path)
    }
}

/// Wait for a phase's units, then drain its collector.
fn finish_phase<T: Dated + Send + 'static>(
    group: TaskGroup<BuildError>,
    collector: Collector<T>,
) -> Result<Vec<T>, Vec<BuildError>> {
    let mut errors = group.wait();
    match collector.finish() {
        Ok(items) if errors.is_empty() => Ok(items),
        Ok(_) => Err(errors),
        Err(panic) => {
            errors.push(BuildError::Panicked(panic));
            Err(errors)
        }
    }
}

/// Markdown files directly inside `dir`, symlinks included, sorted by name.
pub fn list_sources(dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let mut sources = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| BuildError::Io {
            path: e.path().unwrap_or(dir).to_path_buf(),
            source: e.into(),
        })?;
        // `Path::is_file` follows symlinks; dangling links are skipped
        if entry.path().is_file() && naming::is_markdown(&entry.file_name().to_string_lossy()) {
            sources.push(entry.into_path());
        }
    }
    Ok(sources)
}

/// Read, parse and resolve one document.
fn load_document(site: &SiteInner, source: PathBuf) -> Result<LoadedDocument, BuildError> {
    let modified = fs::metadata(&source)
        .and_then(|m| m.modified())
        .map_err(io_error(&source))?;

    let mut doc = {
        let mut buf = site.arena.lease();
        File::open(&source)
            .and_then(|mut f| f.read_to_end(&mut buf))
            .map_err(io_error(&source))?;
        let text = std::str::from_utf8(&buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            .map_err(io_error(&source))?;
        Document::parse(text)
    };

    let meta_error = |e: MetadataError| BuildError::Metadata {
        path: source.clone(),
        source: e,
    };
    let mut meta = metadata::extract(&mut doc, true).map_err(meta_error)?;
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    meta.apply_defaults(&file_name, modified).map_err(meta_error)?;

    let title = meta.title().map_err(meta_error)?.to_string();
    let time = meta.time().map_err(meta_error)?;
    let delims = Delimiters::from_meta(&meta).map_err(meta_error)?;
    let output = naming::output_name(&title);
    tracing::debug!(source = %source.display(), %output, "loaded");

    Ok(LoadedDocument {
        source,
        modified,
        doc,
        meta,
        title,
        time,
        output,
        delims,
    })
}

/// Documents that would overwrite each other or the index.
pub fn check_destinations(loaded: &[LoadedDocument], gen_index: bool) -> Vec<BuildError> {
    let mut by_output: BTreeMap<&str, Vec<PathBuf>> = BTreeMap::new();
    for doc in loaded {
        by_output
            .entry(doc.output.as_str())
            .or_default()
            .push(doc.source.clone());
    }

    let mut errors = Vec::new();
    for (output, mut sources) in by_output {
        sources.sort();
        if gen_index && output == INDEX_FILE {
            errors.extend(sources.into_iter().map(|path| BuildError::ReservedDestination {
                path,
                output: output.to_string(),
            }));
        } else if sources.len() > 1 {
            errors.push(BuildError::DuplicateDestination {
                output: output.to_string(),
                sources,
            });
        }
    }
    errors
}

/// Render and write one document, or report it up to date.
///
/// Returns `Ok(None)` when the phase was cancelled before the page was written.
fn generate_document(
    site: &SiteInner,
    doc: LoadedDocument,
    cancel: &CancelToken,
) -> Result<Option<BuildResult>, BuildError> {
    let destination = site.config.output.join(&doc.output);
    let rebuild = cache::should_rebuild(doc.modified, &destination).map_err(io_error(&destination))?;

    if rebuild {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let page = PageInfo {
            title: doc.title.clone(),
            source: doc.file_name(),
            output: doc.output.clone(),
            time: doc.time,
        };
        let ctx = PageContext {
            meta: &doc.meta,
            page: &page,
            data: &site.data,
        };
        let renderer = PageRenderer {
            templates: &site.templates,
            body: site.renderer.as_ref(),
            arena: &site.arena,
        };
        let html = renderer
            .render(&doc.doc, &doc.delims, ctx)
            .map_err(|source| BuildError::Render {
                path: doc.source.clone(),
                source,
            })?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        fs::write(&destination, html).map_err(io_error(&destination))?;
    }

    let destination_modified = fs::metadata(&destination)
        .and_then(|m| m.modified())
        .map_err(io_error(&destination))?;
    let status = if rebuild {
        BuildStatus::Written
    } else {
        BuildStatus::UpToDate
    };
    tracing::debug!(source = %doc.source.display(), ?status, "generated");

    Ok(Some(BuildResult {
        source: doc.source,
        destination,
        source_modified: doc.modified,
        destination_modified,
        meta: doc.meta,
        title: doc.title,
        time: doc.time,
        status,
    }))
}
