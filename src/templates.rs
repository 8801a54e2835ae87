//! Template environment for the content, page and index passes.
//!
//! One [`Templates`] value is built before any worker starts and shared by
//! all of them. It owns a `minijinja` environment holding the page and index
//! templates (built-in defaults or user files) and the filters documents can
//! call from their own content.
//!
//! ## Contexts
//!
//! ```text
//! content pass   meta, page, data
//! page pass      meta, page, data, content (already rendered, marked safe)
//! index          pages (newest first), data
//! ```
//!
//! `page` carries `title`, `source`, `output` and `time`; `data` is the
//! external site data, an empty mapping when none was given.
//!
//! ## Filters
//!
//! | Filter            | Example                                       |
//! |-------------------|-----------------------------------------------|
//! | `slugify`         | `"Hello, World" → "hello-world"`              |
//! | `link_to_title`   | `"Hello, World" → "hello-world.html"`         |
//! | `link`            | `"hello" → "hello.html"`                      |
//! | `remove_ext`      | `"notes.md" → "notes"`                        |
//! | `limit(n)`        | first `n` items of a sequence                 |
//! | `truncate(n)`     | first `n` characters, `...` appended if cut   |
//! | `date(fmt)`       | strftime-format a timestamp, `%Y-%m-%d` default |
//!
//! ## Delimiters
//!
//! A document whose rendered body legitimately contains `{{` can move the
//! content pass onto other delimiters through its metadata:
//!
//! ```yaml
//! template:
//!   delims:
//!     left: "[["
//!     right: "]]"
//! ```
//!
//! Variables then use `[[ page.title ]]`, blocks `[[% if … %]]` and comments
//! `[[# … #]]`. Page and index templates always use the standard syntax.

use chrono::{DateTime, Utc};
use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, Error, ErrorKind, Value, context};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::metadata::{MetaValue, Metadata, MetadataError};
use crate::naming;
use crate::types::{BuildResult, BuildStatus};

pub const PAGE_TEMPLATE: &str = "page.html";
pub const INDEX_TEMPLATE: &str = "index.html";

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

pub const DEFAULT_PAGE: &str = r#"<!DOCTYPE html>
<html>
	<head>
		<meta name="generator" content="quire" />
		{%- if meta.author %}
		<meta name="author" content="{{ meta.author }}" />
		{%- endif %}
		{%- if meta.desc %}
		<meta name="description" content="{{ meta.desc }}" />
		{%- endif %}

		<title>{{ page.title }}{% if data.title %} - {{ data.title }}{% endif %}</title>
	</head>
	<body>
		{{ content }}
	</body>
</html>
"#;

pub const DEFAULT_INDEX: &str = r#"<!DOCTYPE html>
<html>
	<head>
		<meta name="generator" content="quire" />

		<title>Index{% if data.title %} - {{ data.title }}{% endif %}</title>
	</head>
	<body>
		{%- for page in pages %}
		<div>
			<a href="{{ page.link }}">{{ page.title }} ({{ page.time | date }})</a>
		</div>
		{%- endfor %}
	</body>
</html>
"#;

#[derive(Error, Debug)]
pub enum TemplateLoadError {
    #[error("cannot read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid {name} template: {source}")]
    Syntax {
        name: &'static str,
        #[source]
        source: Error,
    },
}

/// Variable delimiters for a document's content pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub left: String,
    pub right: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            left: "{{".into(),
            right: "}}".into(),
        }
    }
}

impl Delimiters {
    /// Read `template.delims.left` / `template.delims.right`; either side
    /// falls back to the standard delimiter when absent or empty.
    pub fn from_meta(meta: &Metadata) -> Result<Self, MetadataError> {
        let mut delims = Self::default();
        if let Some(left) = meta.str_at("template.delims.left")?.filter(|s| !s.is_empty()) {
            delims.left = left.to_string();
        }
        if let Some(right) = meta.str_at("template.delims.right")?.filter(|s| !s.is_empty()) {
            delims.right = right.to_string();
        }
        Ok(delims)
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    fn syntax(&self) -> Result<SyntaxConfig, Error> {
        let (l, r) = (&self.left, &self.right);
        SyntaxConfig::builder()
            .variable_delimiters(l.clone(), r.clone())
            .block_delimiters(format!("{l}%"), format!("%{r}"))
            .comment_delimiters(format!("{l}#"), format!("#{r}"))
            .build()
    }
}

/// Page-level values exposed to templates as `page`.
#[derive(Debug, Clone, Serialize)]
pub struct PageInfo {
    pub title: String,
    /// Source filename.
    pub source: String,
    /// Output filename.
    pub output: String,
    pub time: DateTime<Utc>,
}

/// Everything a document's content and page passes can see.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub meta: &'a Metadata,
    pub page: &'a PageInfo,
    pub data: &'a MetaValue,
}

#[derive(Serialize)]
struct IndexEntry<'a> {
    title: &'a str,
    link: String,
    source: String,
    time: DateTime<Utc>,
    meta: &'a Metadata,
    up_to_date: bool,
}

/// The shared template environment.
#[derive(Debug, Clone)]
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    /// Build from template sources, `None` selecting the built-in default.
    pub fn new(page: Option<String>, index: Option<String>) -> Result<Self, TemplateLoadError> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        register_filters(&mut env);

        env.add_template_owned(PAGE_TEMPLATE, page.unwrap_or_else(|| DEFAULT_PAGE.to_string()))
            .map_err(|source| TemplateLoadError::Syntax {
                name: "page",
                source,
            })?;
        env.add_template_owned(INDEX_TEMPLATE, index.unwrap_or_else(|| DEFAULT_INDEX.to_string()))
            .map_err(|source| TemplateLoadError::Syntax {
                name: "index",
                source,
            })?;
        Ok(Self { env })
    }

    /// Build from optional template files on disk.
    pub fn load(page: Option<&Path>, index: Option<&Path>) -> Result<Self, TemplateLoadError> {
        Self::new(page.map(read_template).transpose()?, index.map(read_template).transpose()?)
    }

    /// Content pass: execute a document's rendered body as a template.
    pub fn render_content(
        &self,
        body: &str,
        delims: &Delimiters,
        ctx: PageContext<'_>,
    ) -> Result<String, Error> {
        let ctx = context! {
            meta => ctx.meta,
            page => ctx.page,
            data => ctx.data,
        };
        if delims.is_default() {
            return self.env.render_str(body, ctx);
        }
        let mut env = self.env.clone();
        env.set_syntax(delims.syntax()?);
        env.render_str(body, ctx)
    }

    /// Page pass: wrap rendered content in the page template.
    pub fn render_page(&self, ctx: PageContext<'_>, content: &str) -> Result<String, Error> {
        self.env.get_template(PAGE_TEMPLATE)?.render(context! {
            meta => ctx.meta,
            page => ctx.page,
            data => ctx.data,
            content => Value::from_safe_string(content.to_string()),
        })
    }

    /// Render the index over results already ordered newest first.
    pub fn render_index(&self, pages: &[BuildResult], data: &MetaValue) -> Result<String, Error> {
        let entries: Vec<IndexEntry<'_>> = pages
            .iter()
            .map(|result| IndexEntry {
                title: &result.title,
                link: result.file_name(),
                source: result
                    .source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                time: result.time,
                meta: &result.meta,
                up_to_date: result.status == BuildStatus::UpToDate,
            })
            .collect();
        self.env.get_template(INDEX_TEMPLATE)?.render(context! {
            pages => entries,
            data => data,
        })
    }
}

fn read_template(path: &Path) -> Result<String, TemplateLoadError> {
    std::fs::read_to_string(path).map_err(|source| TemplateLoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Filters
// ============================================================================

fn register_filters(env: &mut Environment<'static>) {
    env.add_filter("slugify", slugify);
    env.add_filter("link_to_title", link_to_title);
    env.add_filter("link", link);
    env.add_filter("remove_ext", remove_ext);
    env.add_filter("limit", limit);
    env.add_filter("truncate", truncate);
    env.add_filter("date", date);
}

fn slugify(value: String) -> String {
    naming::slugify(&value)
}

fn link_to_title(title: String) -> String {
    naming::output_name(&title)
}

fn link(slug: String) -> String {
    naming::link(&slug)
}

fn remove_ext(path: String) -> String {
    naming::remove_ext(&path).to_string()
}

fn limit(value: Value, n: usize) -> Result<Value, Error> {
    Ok(Value::from(value.try_iter()?.take(n).collect::<Vec<_>>()))
}

fn truncate(value: String, length: usize) -> String {
    match value.char_indices().nth(length) {
        Some((cut, _)) => format!("{}...", &value[..cut]),
        None => value,
    }
}

fn date(value: Value, format: Option<String>) -> Result<String, Error> {
    let time = match value.as_str() {
        Some(s) => MetaValue::String(s.to_string()).to_time(),
        None => i64::try_from(value.clone())
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
    }
    .ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot format {value} as a date"),
        )
    })?;

    let format = format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
    let mut out = String::new();
    write!(out, "{}", time.format(format)).map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid date format {format:?}"),
        )
    })?;
    Ok(out)
}
