//! # Quire
//!
//! An incremental, concurrent static site builder for a flat directory of
//! markdown documents. Each `.md` file becomes one HTML page named after its
//! title, and an `index.html` lists every page newest first.
//!
//! # Architecture: Two Phases and an Index
//!
//! ```text
//! 1. Load      *.md     →  LoadedDocument   (read, parse, extract metadata)
//!    check     outputs  →  no collisions    (between phases, nothing written yet)
//! 2. Generate  loaded   →  *.html           (content pass, body, page pass)
//! 3. Index     results  →  index.html       (newest first)
//! ```
//!
//! Both phases fan out one unit of work per document over the rayon pool
//! ([`task::TaskGroup`]). Results are funneled through an ordered collector
//! ([`collect::Collector`]) that keeps them sorted by time as they arrive.
//! The first failure in a phase cancels the rest of that phase; every error
//! is still reported.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | The build: source listing, both phases, destination check, index |
//! | [`document`] | Markdown parsed into an owned, walkable node tree |
//! | [`metadata`] | The `<!--meta ... -->` block: decoding, defaults, typed access |
//! | [`templates`] | minijinja environment: default templates, filters, the three passes |
//! | [`render`] | Body renderers (plain and highlighted) and the page render sequence |
//! | [`task`] | Cancellable task groups over rayon with error and panic capture |
//! | [`collect`] | Time-ordered merge of worker results |
//! | [`arena`] | Reusable byte buffers for reading and rendering |
//! | [`cache`] | Timestamp staleness check and build counters |
//! | [`config`] | Build settings, validation, site data loading |
//! | [`naming`] | Slugs, output filenames, extension handling |
//! | [`types`] | Results shared between the phases and the index |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Metadata in an HTML Comment
//!
//! Front matter lives in the first HTML comment of the document whose text
//! starts with `meta`:
//!
//! ```markdown
//! <!--meta
//! title: Hello World
//! time: 2024-03-01 09:30:00
//! -->
//!
//! Body text.
//! ```
//!
//! Markdown renderers that know nothing about quire hide the block, so
//! sources stay readable on any forge. The block is removed before rendering.
//!
//! ## Templates Everywhere
//!
//! The rendered body is itself a template, executed before it is wrapped in the
//! page template. Documents can reference their own metadata and the site
//! data (`{{ meta.title }}`, `{{ data.title }}`). A document that needs to show
//! literal `{{` can switch its delimiters with `template.delims` in its
//! metadata.
//!
//! ## Timestamp Incrementality
//!
//! A page is regenerated only when its source is newer than the page on disk
//! (see [`cache`]). Up-to-date pages are still listed in the index.

pub mod arena;
pub mod cache;
pub mod collect;
pub mod config;
pub mod document;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod task;
pub mod templates;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
