//! File naming for documents and their rendered pages.
//!
//! A document's output file is named after its resolved title, not its
//! source filename: `Hello, Wörld!` renders to `hello-world.html` whatever the
//! markdown file was called. The default title is the source filename with its
//! extension removed, so an untitled `notes.md` still lands on `notes.html`.
//!
//! ```text
//! remove_ext("2021/notes.md")  → "2021/notes"
//! slugify("Hello, Wörld!")     → "hello-world"
//! output_name("Hello, Wörld!") → "hello-world.html"
//! ```

use deunicode::deunicode;

/// Extension given to every rendered document.
pub const OUTPUT_EXTENSION: &str = "html";

/// Slug used when a title contains nothing that survives slugification.
const FALLBACK_SLUG: &str = "untitled";

/// Remove the final extension from a path or filename.
///
/// Only the last `.ext` of the final path component is removed. A leading dot
/// (`.md`) counts as an extension, leaving an empty string.
pub fn remove_ext(path: &str) -> &str {
    let name_start = path.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) => &path[..name_start + dot],
        None => path,
    }
}

/// Convert a title into a lowercase, URL-safe slug.
///
/// - Transliterates non-ASCII text (`ö` → `o`, `北京` → `bei-jing`)
/// - Replaces every run of non-alphanumeric characters with one dash
/// - Strips leading and trailing dashes
pub fn slugify(title: &str) -> String {
    let ascii = deunicode(title);
    let mut slug = String::with_capacity(ascii.len());
    let mut prev_dash = true;
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Output filename for a slug: `slug.html`.
pub fn link(slug: &str) -> String {
    format!("{slug}.{OUTPUT_EXTENSION}")
}

/// Output filename for a document title.
///
/// Titles that slug to nothing (`"!!!"`) get a fixed fallback name so the
/// page still has somewhere to go. Collisions are detected by the pipeline.
pub fn output_name(title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        link(FALLBACK_SLUG)
    } else {
        link(&slug)
    }
}

/// Whether a filename carries one of the recognised markdown extensions.
pub fn is_markdown(name: &str) -> bool {
    let stem = remove_ext(name);
    if stem.len() == name.len() {
        return false;
    }
    let ext = &name[stem.len() + 1..];
    ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown")
}
