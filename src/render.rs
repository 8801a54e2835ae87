//! Three-pass page rendering.
//!
//! A document can reference site data and its own metadata from inside its
//! markdown, so rendering is done in passes over an in-memory buffer:
//!
//! ```text
//! Document ──body──▶ HTML ──content──▶ HTML ──page──▶ final page
//!           (BodyRenderer)   (body as template)  (page template + content)
//! ```
//!
//! 1. **Body**: the tree is flattened and written as HTML by a
//!    [`BodyRenderer`] into a buffer leased from the [`BufferArena`]. Writes go
//!    through a [`StickyWriter`]: once the sink fails every later write fails
//!    with the same error kind and the original error is reported once, after
//!    the walk.
//! 2. **Content**: the body HTML is executed as a template with the
//!    document's [`Delimiters`].
//! 3. **Page**: the content is wrapped in the page template.
//!
//! Nothing is written to disk here. The caller gets the finished page only
//! when all three passes succeeded.

use pulldown_cmark::html;
use std::fmt;
use std::io::{self, Write};
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::SyntaxSet;
use thiserror::Error;

use crate::arena::BufferArena;
use crate::document::Document;
use crate::templates::{Delimiters, PageContext, Templates};

/// The template pass that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Content,
    Page,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Content => f.write_str("content"),
            Pass::Page => f.write_str("page"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("body: {0}")]
    Body(#[from] io::Error),
    #[error("{pass} template: {source}")]
    Template {
        pass: Pass,
        #[source]
        source: minijinja::Error,
    },
}

// ============================================================================
// Sticky writer
// ============================================================================

/// A writer that remembers the first error of its sink.
///
/// After a failure nothing more reaches the sink and every write returns an
/// error of the same kind. [`finish`](Self::finish) hands back the original.
#[derive(Debug)]
pub struct StickyWriter<W> {
    inner: W,
    error: Option<io::Error>,
}

impl<W: Write> StickyWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, error: None }
    }

    /// The first error seen, if any.
    pub fn finish(self) -> io::Result<W> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.inner),
        }
    }

    fn check(&self) -> io::Result<()> {
        match &self.error {
            Some(e) => Err(io::Error::new(e.kind(), e.to_string())),
            None => Ok(()),
        }
    }

    fn record<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        result.map_err(|e| {
            let copy = io::Error::new(e.kind(), e.to_string());
            self.error = Some(e);
            copy
        })
    }
}

impl<W: Write> Write for StickyWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        let result = self.inner.write(buf);
        self.record(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        let result = self.inner.flush();
        self.record(result)
    }
}

// ============================================================================
// Body renderers
// ============================================================================

/// Renders a document tree to HTML.
pub trait BodyRenderer: Send + Sync {
    fn render(&self, doc: &Document, out: &mut dyn Write) -> io::Result<()>;
}

/// Plain `pulldown-cmark` HTML.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlRenderer;

impl BodyRenderer for HtmlRenderer {
    fn render(&self, doc: &Document, out: &mut dyn Write) -> io::Result<()> {
        html::write_html_io(out, doc.events().into_iter())
    }
}

/// HTML with fenced code blocks highlighted by `syntect`.
///
/// Blocks without a language tag, or tagged with a language syntect does not
/// know, are rendered plain.
#[derive(Debug)]
pub struct HighlightRenderer {
    syntaxes: SyntaxSet,
    theme: Theme,
}

impl HighlightRenderer {
    /// `None` if `theme` is not one of syntect's bundled themes.
    pub fn new(theme: &str) -> Option<Self> {
        let theme = ThemeSet::load_defaults().themes.remove(theme)?;
        Some(Self {
            syntaxes: SyntaxSet::load_defaults_newlines(),
            theme,
        })
    }

    /// Names of the bundled themes, sorted.
    pub fn themes() -> Vec<String> {
        ThemeSet::load_defaults().themes.into_keys().collect()
    }
}

impl BodyRenderer for HighlightRenderer {
    fn render(&self, doc: &Document, out: &mut dyn Write) -> io::Result<()> {
        let events = doc.events_with(|node| {
            let lang = node.code_block_lang().filter(|l| !l.is_empty())?;
            let syntax = self.syntaxes.find_syntax_by_token(lang)?;
            match syntect::html::highlighted_html_for_string(
                &node.literal(),
                &self.syntaxes,
                syntax,
                &self.theme,
            ) {
                Ok(highlighted) => Some(vec![pulldown_cmark::Event::Html(highlighted.into())]),
                Err(e) => {
                    tracing::warn!(lang, error = %e, "highlighting failed, rendering plain");
                    None
                }
            }
        });
        html::write_html_io(out, events.into_iter())
    }
}

/// Body pass: write `doc` through `renderer` into `out`.
///
/// A failing sink surfaces its first error, whatever the renderer did after it.
pub fn render_body<W: Write>(
    doc: &Document,
    renderer: &dyn BodyRenderer,
    out: W,
) -> io::Result<()> {
    let mut writer = StickyWriter::new(out);
    let rendered = renderer.render(doc, &mut writer);
    writer.finish()?;
    rendered
}

// ============================================================================
// Page renderer
// ============================================================================

/// Runs all three passes for one document.
#[derive(Clone, Copy)]
pub struct PageRenderer<'a> {
    pub templates: &'a Templates,
    pub body: &'a dyn BodyRenderer,
    pub arena: &'a BufferArena,
}

impl PageRenderer<'_> {
    pub fn render(
        &self,
        doc: &Document,
        delims: &Delimiters,
        ctx: PageContext<'_>,
    ) -> Result<String, RenderError> {
        let mut buf = self.arena.lease();
        render_body(doc, self.body, &mut *buf)?;
        let body = std::str::from_utf8(&buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let content = self
            .templates
            .render_content(body, delims, ctx)
            .map_err(|source| RenderError::Template {
                pass: Pass::Content,
                source,
            })?;
        self.templates
            .render_page(ctx, &content)
            .map_err(|source| RenderError::Template {
                pass: Pass::Page,
                source,
            })
    }
}
