//! Document metadata: the embedded block, its decoder, and default back-fill.
//!
//! A document describes itself with a YAML mapping hidden inside an HTML
//! comment whose text starts with `meta`. Being a comment, the block never
//! shows up in a browser even if it is left in the rendered page:
//!
//! ```markdown
//! <!--meta
//! title: Release notes
//! time: 2021-03-04
//! author: Jo
//! -->
//!
//! # Release notes
//! ```
//!
//! ## Extraction
//!
//! [`extract`] walks the parsed [`Document`] depth-first. Every raw HTML block
//! is re-parsed as an HTML fragment and searched (again depth-first) for its
//! first comment node. If that comment carries the `meta` prefix the rest of
//! its text is decoded and the walk stops; otherwise the block is skipped.
//! Only the first matching block in document order is ever decoded.
//!
//! ## Values
//!
//! Decoded data is a [`MetaValue`] tree: a tagged union instead of an untyped
//! map, so consumers go through accessors that fail with
//! [`MetadataError::InvalidValue`] when a key holds the wrong shape.
//!
//! ## Defaults
//!
//! After extraction [`Metadata::apply_defaults`] guarantees the two keys the
//! build relies on:
//!
//! | Key     | Default                                   |
//! |---------|-------------------------------------------|
//! | `title` | source filename minus its extension       |
//! | `time`  | source file modification time             |
//!
//! `time` is normalised to [`MetaValue::Time`] whichever accepted shape it was
//! written in (RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, unix seconds).

use crate::document::{Document, Visit, WalkStatus};
use crate::naming;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::Html;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::SystemTime;
use thiserror::Error;

/// Comment text prefix that marks an embedded metadata block.
pub const META_PREFIX: &str = "meta";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("invalid metadata block: {0}")]
    Decode(#[from] DecodeError),
    #[error("metadata block must be a mapping, found {0}")]
    NotAMapping(&'static str),
    #[error("metadata key `{key}`: expected {expected}, found {found}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("metadata key `{0}` is missing")]
    Missing(String),
}

// ============================================================================
// Values
// ============================================================================

/// A loosely-typed metadata value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MetaValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Time(DateTime<Utc>),
    Sequence(Vec<MetaValue>),
    Mapping(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            MetaValue::Null => "null",
            MetaValue::Bool(_) => "bool",
            MetaValue::Integer(_) => "integer",
            MetaValue::Float(_) => "float",
            MetaValue::String(_) => "string",
            MetaValue::Time(_) => "time",
            MetaValue::Sequence(_) => "sequence",
            MetaValue::Mapping(_) => "mapping",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            MetaValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Interpret the value as a point in time.
    pub fn to_time(&self) -> Option<DateTime<Utc>> {
        match self {
            MetaValue::Time(t) => Some(*t),
            MetaValue::Integer(secs) => DateTime::from_timestamp(*secs, 0),
            MetaValue::String(s) => parse_time(s),
            _ => None,
        }
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

impl Serialize for MetaValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetaValue::Null => serializer.serialize_unit(),
            MetaValue::Bool(b) => serializer.serialize_bool(*b),
            MetaValue::Integer(i) => serializer.serialize_i64(*i),
            MetaValue::Float(f) => serializer.serialize_f64(*f),
            MetaValue::String(s) => serializer.serialize_str(s),
            MetaValue::Time(t) => serializer.serialize_str(&t.to_rfc3339()),
            MetaValue::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            MetaValue::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for MetaValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MetaValueVisitor)
    }
}

struct MetaValueVisitor;

impl<'de> Visitor<'de> for MetaValueVisitor {
    type Value = MetaValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a metadata value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<MetaValue, E> {
        Ok(MetaValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<MetaValue, E> {
        Ok(MetaValue::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<MetaValue, E> {
        Ok(i64::try_from(v)
            .map(MetaValue::Integer)
            .unwrap_or(MetaValue::Float(v as f64)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<MetaValue, E> {
        Ok(MetaValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<MetaValue, E> {
        Ok(MetaValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<MetaValue, E> {
        Ok(MetaValue::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<MetaValue, E> {
        Ok(MetaValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<MetaValue, E> {
        Ok(MetaValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<MetaValue, D::Error> {
        MetaValue::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<MetaValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(MetaValue::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<MetaValue, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some(key) = map.next_key::<MetaValue>()? {
            let key = match key {
                MetaValue::String(s) => s,
                MetaValue::Integer(i) => i.to_string(),
                MetaValue::Float(f) => f.to_string(),
                MetaValue::Bool(b) => b.to_string(),
                other => {
                    return Err(de::Error::custom(format!(
                        "unsupported mapping key of type {}",
                        other.kind()
                    )));
                }
            };
            entries.insert(key, map.next_value()?);
        }
        Ok(MetaValue::Mapping(entries))
    }
}

impl From<toml::Value> for MetaValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => MetaValue::String(s),
            toml::Value::Integer(i) => MetaValue::Integer(i),
            toml::Value::Float(f) => MetaValue::Float(f),
            toml::Value::Boolean(b) => MetaValue::Bool(b),
            toml::Value::Datetime(dt) => {
                let text = dt.to_string();
                parse_time(&text)
                    .map(MetaValue::Time)
                    .unwrap_or(MetaValue::String(text))
            }
            toml::Value::Array(items) => {
                MetaValue::Sequence(items.into_iter().map(MetaValue::from).collect())
            }
            toml::Value::Table(table) => MetaValue::Mapping(
                table
                    .into_iter()
                    .map(|(k, v)| (k, MetaValue::from(v)))
                    .collect(),
            ),
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Structured-data formats accepted for metadata and site data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
    Toml,
}

impl Format {
    /// Pick a format from a file extension (`json`, `yaml`/`yml`, `toml`).
    pub fn from_path(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }
}

/// Decode a structured-data document into a [`MetaValue`].
pub fn decode(text: &str, format: Format) -> Result<MetaValue, DecodeError> {
    Ok(match format {
        Format::Yaml => serde_yaml::from_str(text)?,
        Format::Json => serde_json::from_str(text)?,
        Format::Toml => MetaValue::from(toml::Value::Table(toml::from_str::<toml::Table>(text)?)),
    })
}

// ============================================================================
// Metadata mapping
// ============================================================================

/// The key-value mapping describing one document.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetaValue>);

impl TryFrom<MetaValue> for Metadata {
    type Error = MetadataError;

    fn try_from(value: MetaValue) -> Result<Self, MetadataError> {
        match value {
            MetaValue::Null => Ok(Metadata::default()),
            MetaValue::Mapping(map) => Ok(Metadata(map)),
            other => Err(MetadataError::NotAMapping(other.kind())),
        }
    }
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: MetaValue) -> Option<MetaValue> {
        self.0.insert(key.into(), value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Follow a dotted path through nested mappings: `template.delims.left`.
    pub fn get_path(&self, path: &str) -> Option<&MetaValue> {
        let mut parts = path.split('.');
        let mut value = self.0.get(parts.next()?)?;
        for part in parts {
            value = value.as_mapping()?.get(part)?;
        }
        Some(value)
    }

    /// String at a dotted path; `Ok(None)` when absent, an error when present
    /// with another type.
    pub fn str_at(&self, path: &str) -> Result<Option<&str>, MetadataError> {
        match self.get_path(path) {
            None | Some(MetaValue::Null) => Ok(None),
            Some(MetaValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(MetadataError::InvalidValue {
                key: path.to_string(),
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    /// The document title. Non-empty once defaults are applied.
    pub fn title(&self) -> Result<&str, MetadataError> {
        match self.str_at("title")? {
            Some(title) if !title.is_empty() => Ok(title),
            _ => Err(MetadataError::Missing("title".into())),
        }
    }

    /// The document timestamp.
    pub fn time(&self) -> Result<DateTime<Utc>, MetadataError> {
        let value = self
            .0
            .get("time")
            .ok_or_else(|| MetadataError::Missing("time".into()))?;
        value.to_time().ok_or(MetadataError::InvalidValue {
            key: "time".into(),
            expected: "timestamp",
            found: value.kind(),
        })
    }

    /// Back-fill `title` and `time` and normalise `time`.
    ///
    /// A missing, null or empty `title` becomes the source filename without
    /// its extension; a missing `time` becomes `modified`. Keys that are
    /// present with an unusable type are errors, not silently replaced.
    pub fn apply_defaults(
        &mut self,
        file_name: &str,
        modified: SystemTime,
    ) -> Result<(), MetadataError> {
        let has_title = self.str_at("title")?.is_some_and(|t| !t.is_empty());
        if !has_title {
            self.insert("title", MetaValue::String(naming::remove_ext(file_name).to_string()));
        }

        let time = match self.0.get("time") {
            None | Some(MetaValue::Null) => DateTime::<Utc>::from(modified),
            Some(_) => self.time()?,
        };
        self.insert("time", MetaValue::Time(time));
        Ok(())
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Find, decode and optionally detach the document's metadata block.
///
/// Returns an empty mapping when the document has no metadata block. With
/// `detach`, the HTML block holding the metadata comment is unlinked from the
/// tree after a successful decode; on error the tree is left untouched.
pub fn extract(doc: &mut Document, detach: bool) -> Result<Metadata, MetadataError> {
    let mut found: Option<(Vec<usize>, String)> = None;
    doc.walk(|path, node, visit| {
        if visit != Visit::Enter || !node.is_html_block() {
            return WalkStatus::Continue;
        }
        match first_comment(&node.literal()) {
            Some(text) => match text.strip_prefix(META_PREFIX) {
                Some(body) => {
                    found = Some((path.to_vec(), body.to_string()));
                    WalkStatus::Terminate
                }
                None => WalkStatus::SkipChildren,
            },
            None => WalkStatus::SkipChildren,
        }
    });

    let Some((path, body)) = found else {
        return Ok(Metadata::default());
    };

    let meta = if body.trim().is_empty() {
        Metadata::default()
    } else {
        Metadata::try_from(decode(&body, Format::Yaml)?)?
    };
    if detach {
        doc.remove(&path);
    }
    Ok(meta)
}

/// Text of the first comment in an HTML fragment, in document order.
fn first_comment(literal: &str) -> Option<String> {
    let fragment = Html::parse_fragment(literal);
    fragment
        .tree
        .root()
        .descendants()
        .find_map(|node| node.value().as_comment().map(|c| String::from(&*c.comment)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn extract_from(source: &str, detach: bool) -> (Result<Metadata, MetadataError>, Document) {
        let mut doc = Document::parse(source);
        let meta = extract(&mut doc, detach);
        (meta, doc)
    }

    fn title_of(meta: &Metadata) -> Option<&str> {
        meta.get("title").and_then(MetaValue::as_str)
    }

    // =========================================================================
    // extract
    // =========================================================================

    #[test]
    fn no_block_yields_empty_mapping() {
        let (meta, _) = extract_from("# Heading\n\nJust text.\n", true);
        assert!(meta.unwrap().is_empty());
    }

    #[test]
    fn decodes_meta_comment() {
        let (meta, _) = extract_from("<!--meta\ntitle: B\nauthor: Jo\n-->\n\nBody\n", false);
        let meta = meta.unwrap();
        assert_eq!(title_of(&meta), Some("B"));
        assert_eq!(meta.get("author"), Some(&MetaValue::String("Jo".into())));
    }

    #[test]
    fn first_block_wins() {
        let source = "<!--meta\ntitle: One\n-->\n\ntext\n\n<!--meta\ntitle: Two\n-->\n";
        let (meta, doc) = extract_from(source, true);
        assert_eq!(title_of(&meta.unwrap()), Some("One"));
        // second block untouched
        assert_eq!(doc.nodes().iter().filter(|n| n.is_html_block()).count(), 1);
    }

    #[test]
    fn second_block_ignored_even_when_invalid() {
        let source = "<!--meta\ntitle: One\n-->\n\n<!--meta\ntitle: [broken\n-->\n";
        let (meta, _) = extract_from(source, false);
        assert_eq!(title_of(&meta.unwrap()), Some("One"));
    }

    #[test]
    fn detach_removes_block() {
        let (meta, doc) = extract_from("<!--meta\ntitle: B\n-->\n\nBody\n", true);
        assert!(meta.is_ok());
        assert_eq!(doc.nodes().len(), 1);
        assert!(!doc.nodes()[0].is_html_block());
    }

    #[test]
    fn without_detach_block_stays() {
        let (_, doc) = extract_from("<!--meta\ntitle: B\n-->\n\nBody\n", false);
        assert_eq!(doc.nodes().len(), 2);
        assert!(doc.nodes()[0].is_html_block());
    }

    #[test]
    fn detach_without_block_leaves_tree_unchanged() {
        let source = "<div>hi</div>\n\ntext\n";
        let before = Document::parse(source);
        let (meta, after) = extract_from(source, true);
        assert!(meta.unwrap().is_empty());
        assert_eq!(before, after);
    }

    #[test]
    fn comment_without_prefix_is_skipped() {
        let source = "<!-- just a note -->\n\n<!--meta\ntitle: Later\n-->\n";
        let (meta, doc) = extract_from(source, true);
        assert_eq!(title_of(&meta.unwrap()), Some("Later"));
        assert_eq!(doc.nodes().len(), 1);
    }

    #[test]
    fn comment_nested_in_html_block() {
        let source = "<div>\n<!--meta\ntitle: Nested\n-->\n</div>\n";
        let (meta, _) = extract_from(source, false);
        assert_eq!(title_of(&meta.unwrap()), Some("Nested"));
    }

    #[test]
    fn empty_block_is_empty_mapping() {
        let (meta, doc) = extract_from("<!--meta\n-->\n\ntext\n", true);
        assert!(meta.unwrap().is_empty());
        assert_eq!(doc.nodes().len(), 1);
    }

    #[test]
    fn malformed_block_is_decode_error_and_tree_kept() {
        let (meta, doc) = extract_from("<!--meta\ntitle: [unclosed\n-->\n", true);
        assert!(matches!(meta, Err(MetadataError::Decode(DecodeError::Yaml(_)))));
        assert_eq!(doc.nodes().len(), 1);
    }

    #[test]
    fn non_mapping_block_is_error() {
        let (meta, _) = extract_from("<!--meta\n- a\n- b\n-->\n", false);
        assert!(matches!(meta, Err(MetadataError::NotAMapping("sequence"))));
    }

    #[test]
    fn nested_keys_via_path() {
        let source = "<!--meta\ntemplate:\n  delims:\n    left: \"[[\"\n    right: \"]]\"\n-->\n";
        let (meta, _) = extract_from(source, false);
        let meta = meta.unwrap();
        assert_eq!(meta.str_at("template.delims.left").unwrap(), Some("[["));
        assert_eq!(meta.str_at("template.delims.right").unwrap(), Some("]]"));
        assert_eq!(meta.str_at("template.missing").unwrap(), None);
        assert!(meta.str_at("template").is_err());
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    fn mtime() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000)
    }

    #[test]
    fn defaults_fill_title_and_time() {
        let mut meta = Metadata::new();
        meta.apply_defaults("a.md", mtime()).unwrap();
        assert_eq!(meta.title().unwrap(), "a");
        assert_eq!(meta.time().unwrap().timestamp(), 1_600_000_000);
        assert!(matches!(meta.get("time"), Some(MetaValue::Time(_))));
    }

    #[test]
    fn defaults_keep_explicit_values() {
        let mut meta = Metadata::new();
        meta.insert("title", MetaValue::String("B".into()));
        meta.insert("time", MetaValue::String("2021-03-04".into()));
        meta.apply_defaults("b.md", mtime()).unwrap();
        assert_eq!(meta.title().unwrap(), "B");
        assert_eq!(meta.time().unwrap().to_rfc3339(), "2021-03-04T00:00:00+00:00");
    }

    #[test]
    fn empty_title_is_replaced() {
        let mut meta = Metadata::new();
        meta.insert("title", MetaValue::String(String::new()));
        meta.apply_defaults("notes.markdown", mtime()).unwrap();
        assert_eq!(meta.title().unwrap(), "notes");
    }

    #[test]
    fn non_string_title_is_invalid() {
        let mut meta = Metadata::new();
        meta.insert("title", MetaValue::Integer(3));
        let err = meta.apply_defaults("a.md", mtime()).unwrap_err();
        assert!(matches!(
            err,
            MetadataError::InvalidValue { expected: "string", found: "integer", .. }
        ));
    }

    #[test]
    fn unparseable_time_is_invalid() {
        let mut meta = Metadata::new();
        meta.insert("time", MetaValue::String("last tuesday".into()));
        let err = meta.apply_defaults("a.md", mtime()).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidValue { found: "string", .. }));
    }

    #[test]
    fn time_shapes() {
        for (value, expected) in [
            (MetaValue::Integer(86_400), "1970-01-02T00:00:00+00:00"),
            (
                MetaValue::String("2021-03-04 05:06:07".into()),
                "2021-03-04T05:06:07+00:00",
            ),
            (
                MetaValue::String("2021-03-04T05:06:07+02:00".into()),
                "2021-03-04T03:06:07+00:00",
            ),
        ] {
            assert_eq!(value.to_time().unwrap().to_rfc3339(), expected);
        }
        assert!(MetaValue::Bool(true).to_time().is_none());
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    #[test]
    fn decode_json() {
        let value = decode(r#"{"site": "Blog", "tags": ["a", 1, true]}"#, Format::Json).unwrap();
        let map = value.as_mapping().unwrap();
        assert_eq!(map["site"], MetaValue::String("Blog".into()));
        assert_eq!(
            map["tags"],
            MetaValue::Sequence(vec![
                MetaValue::String("a".into()),
                MetaValue::Integer(1),
                MetaValue::Bool(true),
            ])
        );
    }

    #[test]
    fn decode_toml_datetime_becomes_time() {
        let value = decode("site = \"Blog\"\nlaunched = 2021-03-04T05:06:07Z\n", Format::Toml).unwrap();
        let map = value.as_mapping().unwrap();
        assert!(matches!(map["launched"], MetaValue::Time(_)));
    }

    #[test]
    fn decode_yaml_integer_keys() {
        let value = decode("1: one\ntrue: yes\n", Format::Yaml).unwrap();
        let map = value.as_mapping().unwrap();
        assert_eq!(map["1"], MetaValue::String("one".into()));
        assert!(map.contains_key("true"));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(Format::from_path(Path::new("site.json")), Some(Format::Json));
        assert_eq!(Format::from_path(Path::new("site.YML")), Some(Format::Yaml));
        assert_eq!(Format::from_path(Path::new("site.toml")), Some(Format::Toml));
        assert_eq!(Format::from_path(Path::new("site.ini")), None);
    }

    #[test]
    fn time_serializes_as_rfc3339() {
        let mut meta = Metadata::new();
        meta.apply_defaults("a.md", mtime()).unwrap();
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["time"], "2020-09-13T12:26:40+00:00");
        assert_eq!(json["title"], "a");
    }
}
