//! Build configuration.
//!
//! Everything a build needs to know comes from the command line and is
//! collected into a [`BuildConfig`]. All of it is checked, and every external
//! file (templates, site data) is loaded, before any worker starts: a bad
//! flag or an unreadable template is a [`ConfigError`], never a per-document
//! failure.
//!
//! ## Site data
//!
//! An optional data file is exposed to every template as `data`. Its format
//! follows its extension:
//!
//! | Extension        | Decoder      |
//! |------------------|--------------|
//! | `.json`          | `serde_json` |
//! | `.yaml`, `.yml`  | `serde_yaml` |
//! | `.toml`          | `toml`       |
//!
//! The top level must be a mapping:
//!
//! ```yaml
//! title: My Site
//! links:
//!   - name: Source
//!     href: https://example.com
//! ```
//!
//! ## Highlighting
//!
//! `style` names one of syntect's bundled themes (`InspiredGitHub`,
//! `base16-ocean.dark`, `Solarized (light)`, ...). `None` renders code blocks
//! without highlighting.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::metadata::{self, DecodeError, Format, MetaValue};
use crate::render::{BodyRenderer, HighlightRenderer, HtmlRenderer};
use crate::templates::TemplateLoadError;

/// Theme used when no `--style` is given.
pub const DEFAULT_STYLE: &str = "InspiredGitHub";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid site data in {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("unsupported site data format: {0} (expected .json, .yaml, .yml or .toml)")]
    UnsupportedFormat(PathBuf),
    #[error(transparent)]
    Template(#[from] TemplateLoadError),
    #[error("unknown highlight style {name:?}, available: {}", .available.join(", "))]
    UnknownStyle { name: String, available: Vec<String> },
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Settings for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Directory holding the markdown sources.
    pub source: PathBuf,
    /// Directory the pages and index are written to.
    pub output: PathBuf,
    pub page_template: Option<PathBuf>,
    pub index_template: Option<PathBuf>,
    /// Write `index.html` after the pages.
    pub gen_index: bool,
    /// Site data file exposed to templates as `data`.
    pub data: Option<PathBuf>,
    /// Highlight theme, `None` for plain code blocks.
    pub style: Option<String>,
    /// Worker threads; `None` uses every core.
    pub jobs: Option<usize>,
}

impl BuildConfig {
    /// Defaults for building `source` in place.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        Self {
            output: source.clone(),
            source,
            page_template: None,
            index_template: None,
            gen_index: true,
            data: None,
            style: Some(DEFAULT_STYLE.to_string()),
            jobs: None,
        }
    }

    /// Check values that can be checked without loading anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.source.is_dir() {
            return Err(ConfigError::Validation(format!(
                "source {} is not a directory",
                self.source.display()
            )));
        }
        if self.output.exists() && !self.output.is_dir() {
            return Err(ConfigError::Validation(format!(
                "output {} is not a directory",
                self.output.display()
            )));
        }
        if self.jobs == Some(0) {
            return Err(ConfigError::Validation("jobs must be at least 1".into()));
        }
        if self.style.as_deref() == Some("") {
            return Err(ConfigError::Validation("style must not be empty".into()));
        }
        Ok(())
    }

    /// The body renderer selected by `style`.
    pub fn body_renderer(&self) -> Result<Box<dyn BodyRenderer>, ConfigError> {
        match &self.style {
            None => Ok(Box::new(HtmlRenderer)),
            Some(name) => match HighlightRenderer::new(name) {
                Some(renderer) => Ok(Box::new(renderer)),
                None => Err(ConfigError::UnknownStyle {
                    name: name.clone(),
                    available: HighlightRenderer::themes(),
                }),
            },
        }
    }
}

/// Resolve the effective worker thread count.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(jobs: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    jobs.map(|n| n.clamp(1, cores)).unwrap_or(cores)
}

/// Load the site data file, or an empty mapping when there is none.
pub fn load_site_data(path: Option<&Path>) -> Result<MetaValue, ConfigError> {
    let Some(path) = path else {
        return Ok(MetaValue::Mapping(Default::default()));
    };
    let format =
        Format::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match metadata::decode(&text, format) {
        Ok(MetaValue::Null) => Ok(MetaValue::Mapping(Default::default())),
        Ok(value @ MetaValue::Mapping(_)) => Ok(value),
        Ok(other) => Err(ConfigError::Validation(format!(
            "site data in {} must be a mapping, found {}",
            path.display(),
            other.kind()
        ))),
        Err(source) => Err(ConfigError::Decode {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn data_file(tmp: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = tmp.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn title_of(value: &MetaValue) -> Option<&str> {
        value.as_mapping()?.get("title")?.as_str()
    }

    // =========================================================================
    // BuildConfig
    // =========================================================================

    #[test]
    fn defaults_build_in_place() {
        let config = BuildConfig::new("site");
        assert_eq!(config.output, PathBuf::from("site"));
        assert!(config.gen_index);
        assert_eq!(config.style.as_deref(), Some(DEFAULT_STYLE));
    }

    #[test]
    fn validate_ok() {
        let tmp = TempDir::new().unwrap();
        assert!(BuildConfig::new(tmp.path()).validate().is_ok());
    }

    #[test]
    fn validate_missing_source() {
        let tmp = TempDir::new().unwrap();
        let config = BuildConfig::new(tmp.path().join("missing"));
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_output_is_file() {
        let tmp = TempDir::new().unwrap();
        let mut config = BuildConfig::new(tmp.path());
        config.output = data_file(&tmp, "out", "x");
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_zero_jobs() {
        let tmp = TempDir::new().unwrap();
        let mut config = BuildConfig::new(tmp.path());
        config.jobs = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("jobs"));
    }

    #[test]
    fn unknown_style_lists_available() {
        let mut config = BuildConfig::new("site");
        config.style = Some("Nope".into());
        match config.body_renderer() {
            Err(ConfigError::UnknownStyle { name, available }) => {
                assert_eq!(name, "Nope");
                assert!(available.iter().any(|t| t == DEFAULT_STYLE));
            }
            _ => panic!("expected UnknownStyle"),
        }
    }

    #[test]
    fn no_style_is_plain_renderer() {
        let mut config = BuildConfig::new("site");
        config.style = None;
        assert!(config.body_renderer().is_ok());
    }

    // =========================================================================
    // effective_threads
    // =========================================================================

    fn cores() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    #[test]
    fn effective_threads_auto() {
        assert_eq!(effective_threads(None), cores());
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        assert_eq!(effective_threads(Some(99999)), cores());
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        assert_eq!(effective_threads(Some(1)), 1);
    }

    // =========================================================================
    // Site data
    // =========================================================================

    #[test]
    fn no_data_file_is_empty_mapping() {
        let data = load_site_data(None).unwrap();
        assert_eq!(data, MetaValue::Mapping(Default::default()));
    }

    #[test]
    fn load_json_yaml_toml() {
        let tmp = TempDir::new().unwrap();
        for (name, content) in [
            ("site.json", r#"{"title": "Blog"}"#),
            ("site.yaml", "title: Blog\n"),
            ("site.yml", "title: Blog\n"),
            ("site.toml", "title = \"Blog\"\n"),
        ] {
            let path = data_file(&tmp, name, content);
            let data = load_site_data(Some(&path)).unwrap();
            assert_eq!(title_of(&data), Some("Blog"), "{name}");
        }
    }

    #[test]
    fn empty_yaml_is_empty_mapping() {
        let tmp = TempDir::new().unwrap();
        let path = data_file(&tmp, "site.yaml", "~\n");
        assert_eq!(
            load_site_data(Some(&path)).unwrap(),
            MetaValue::Mapping(Default::default())
        );
    }

    #[test]
    fn unsupported_extension() {
        let tmp = TempDir::new().unwrap();
        let path = data_file(&tmp, "site.ini", "title=Blog");
        assert!(matches!(
            load_site_data(Some(&path)),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn malformed_data() {
        let tmp = TempDir::new().unwrap();
        let path = data_file(&tmp, "site.json", "{not json");
        assert!(matches!(
            load_site_data(Some(&path)),
            Err(ConfigError::Decode { .. })
        ));
    }

    #[test]
    fn non_mapping_data() {
        let tmp = TempDir::new().unwrap();
        let path = data_file(&tmp, "site.json", "[1, 2]");
        assert!(matches!(
            load_site_data(Some(&path)),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn missing_data_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent.yaml");
        assert!(matches!(
            load_site_data(Some(&path)),
            Err(ConfigError::Io { .. })
        ));
    }
}
