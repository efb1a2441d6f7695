//! Configuration parsing and management.

use crate::directive::DirectiveSyntax;
use serde::{Deserialize, Serialize};
use slider_types::{CitationStyle, RenderOptions, SlideStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default listening port (`0x736c`).
pub const DEFAULT_PORT: u16 = 29548;

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "slider.yml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Main configuration struct matching the slider.yml schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding the decks
    #[serde(default)]
    pub slides_dir: Option<PathBuf>,

    #[serde(default)]
    pub bibliography: Option<PathBuf>,

    /// Extra directories searched by `include`
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,

    #[serde(default)]
    pub directive_syntax: DirectiveSyntax,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    String::from("127.0.0.1")
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Defaults for requests that do not choose their own options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    #[serde(default)]
    pub cite_style: CitationStyle,

    #[serde(default)]
    pub slide_style: SlideStyle,

    #[serde(default)]
    pub strict_citations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Safety-net rescan interval; 0 disables polling
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_debounce() -> u64 {
    200
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            debounce_ms: default_debounce(),
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum rendered entries; absent means unbounded
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Parsed documents kept for reuse across bibliography reloads
    #[serde(default = "default_parse_capacity")]
    pub parse_capacity: usize,
}

fn default_parse_capacity() -> usize {
    64
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            parse_capacity: default_parse_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&contents)?;

        // Store config file path for relative path resolution
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = if contents.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.host",
                message: "must not be empty".to_string(),
            });
        }
        if self.cache.parse_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.parse_capacity",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Slides root, resolved relative to the config file (default: `.`)
    pub fn slides_dir(&self) -> PathBuf {
        let dir = self.slides_dir.as_deref().unwrap_or(Path::new("."));
        self.resolve_path(dir)
    }

    pub fn bibliography_path(&self) -> Option<PathBuf> {
        self.bibliography.as_ref().map(|p| self.resolve_path(p))
    }

    pub fn include_dirs(&self) -> Vec<PathBuf> {
        self.include_paths
            .iter()
            .map(|p| self.resolve_path(p))
            .collect()
    }

    /// Render options applied when a request does not override them.
    pub fn default_options(&self) -> RenderOptions {
        RenderOptions {
            citation_style: self.render.cite_style,
            slide_style: self.render.slide_style,
            strict_citations: self.render.strict_citations,
            ..Default::default()
        }
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Resolve a path relative to the config file location
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(parent) = self.config_path.as_ref().and_then(|p| p.parent()) {
            parent.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.watch.poll_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.cache.capacity, None);
        assert_eq!(config.slides_dir(), PathBuf::from("."));
        assert!(!config.default_options().strict_citations);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
slides_dir: talks
bibliography: /home/slider.bib
include_paths: [shared]
directive_syntax: hash
server:
  host: 0.0.0.0
  port: 8080
render:
  cite_style: author-year
  slide_style: reveal
  strict_citations: true
watch:
  poll_interval_secs: 0
cache:
  capacity: 100
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.directive_syntax, DirectiveSyntax::Hash);
        assert_eq!(config.watch.poll_interval(), None);
        assert_eq!(config.cache.capacity, Some(100));
        let options = config.default_options();
        assert_eq!(options.citation_style, CitationStyle::AuthorYear);
        assert_eq!(options.slide_style, SlideStyle::Reveal);
        assert!(options.strict_citations);
    }

    #[test]
    fn test_paths_resolve_against_config_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("slider.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "slides_dir: talks\nbibliography: refs.bib\ninclude_paths: [/abs]").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.slides_dir(), dir.path().join("talks"));
        assert_eq!(config.bibliography_path(), Some(dir.path().join("refs.bib")));
        assert_eq!(config.include_dirs(), vec![PathBuf::from("/abs")]);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(matches!(
            Config::from_yaml("slides: x"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_invalid_value() {
        assert!(matches!(
            Config::from_yaml("cache:\n  parse_capacity: 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
