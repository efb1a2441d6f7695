//! Request serving: deck + target + options in, rendered page out.
//!
//! Every request reads one catalog snapshot of its deck and one bibliography
//! snapshot, and uses those same snapshots for the cache key and for the
//! render itself.

use crate::bibliography::{BibSnapshot, BibliographyIndex};
use crate::cache::{CacheStats, RenderCache, RenderKey};
use crate::deck::{DeckCatalog, DeckSource, Fingerprint};
use crate::directive::DirectiveSyntax;
use crate::parser::{SlideDocument, SlideParseError, SlideParser};
use crate::render::{self, RenderError, RenderOutput};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slider_types::{
    CitationStyle, DeckId, Mode, OptionError, RenderOptions, RenderTarget, SlideStyle,
};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::debug;

const DEFAULT_PARSE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Error, Debug, Clone)]
pub enum ServeError {
    #[error("Deck '{0}' not found")]
    DeckNotFound(String),

    #[error("Slide {index} not found in deck '{deck}' ({count} slides)")]
    SlideNotFound {
        deck: DeckId,
        index: usize,
        count: usize,
    },

    #[error(transparent)]
    BadOptions(#[from] OptionError),

    #[error("Failed to parse deck '{deck}': {source}")]
    SlideParse {
        deck: DeckId,
        #[source]
        source: SlideParseError,
    },

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl From<JoinError> for ServeError {
    fn from(err: JoinError) -> Self {
        ServeError::Render(RenderError::from(err))
    }
}

impl ServeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServeError::DeckNotFound(_) | ServeError::SlideNotFound { .. }
        )
    }
}

/// Per-request option overrides, as they arrive in a query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionOverrides {
    pub cite: Option<String>,
    pub style: Option<String>,
    pub mode: Option<String>,
    pub strict: Option<String>,
    /// Comma separated preprocessor symbols
    pub define: Option<String>,
}

impl OptionOverrides {
    pub fn apply(&self, defaults: &RenderOptions) -> Result<RenderOptions, OptionError> {
        let mut options = defaults.clone();
        if let Some(cite) = &self.cite {
            options.citation_style = cite.parse::<CitationStyle>()?;
        }
        if let Some(style) = &self.style {
            options.slide_style = style.parse::<SlideStyle>()?;
        }
        if let Some(mode) = &self.mode {
            options.mode = mode.parse::<Mode>()?;
        }
        if let Some(strict) = &self.strict {
            options.strict_citations = match strict.trim().to_lowercase().as_str() {
                "" | "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(OptionError::new("strict", strict, &["true", "false"])),
            };
        }
        if let Some(define) = &self.define {
            for symbol in define.split(',') {
                options = options.define(symbol);
            }
        }
        Ok(options)
    }
}

/// Result of one request.
#[derive(Debug, Clone)]
pub struct SlideResponse {
    pub deck: DeckId,
    pub target: RenderTarget,
    pub output: Arc<RenderOutput>,
    /// Quoted entity tag derived from the render key
    pub etag: String,
    pub bib_version: u64,
}

impl SlideResponse {
    pub fn slide_count(&self) -> usize {
        self.output.slide_count()
    }
}

/// Listing entry for one deck.
#[derive(Debug, Clone, Serialize)]
pub struct DeckSummary {
    pub id: DeckId,
    pub files: usize,
    pub fingerprint: String,
    pub loaded_at: DateTime<Utc>,
}

impl From<&DeckSource> for DeckSummary {
    fn from(deck: &DeckSource) -> Self {
        Self {
            id: deck.id().clone(),
            files: deck.files().len(),
            fingerprint: deck.fingerprint().to_hex(),
            loaded_at: deck.loaded_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub decks: usize,
    pub bib_version: u64,
    pub bib_entries: usize,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ParseKey {
    fingerprint: Fingerprint,
    symbols: BTreeSet<String>,
}

pub struct SlideService {
    catalog: Arc<DeckCatalog>,
    bibliography: Arc<BibliographyIndex>,
    cache: RenderCache<ServeError>,
    parsed: Mutex<LruCache<ParseKey, Arc<SlideDocument>>>,
    syntax: DirectiveSyntax,
    defaults: RenderOptions,
}

impl SlideService {
    pub fn new(
        catalog: Arc<DeckCatalog>,
        bibliography: Arc<BibliographyIndex>,
        cache: RenderCache<ServeError>,
    ) -> Self {
        Self {
            catalog,
            bibliography,
            cache,
            parsed: Mutex::new(LruCache::new(DEFAULT_PARSE_CAPACITY)),
            syntax: DirectiveSyntax::default(),
            defaults: RenderOptions::default(),
        }
    }

    pub fn with_parse_capacity(mut self, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_PARSE_CAPACITY);
        self.parsed = Mutex::new(LruCache::new(capacity));
        self
    }

    pub fn with_syntax(mut self, syntax: DirectiveSyntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn with_defaults(mut self, defaults: RenderOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn catalog(&self) -> &Arc<DeckCatalog> {
        &self.catalog
    }

    pub fn bibliography(&self) -> &Arc<BibliographyIndex> {
        &self.bibliography
    }

    pub fn cache(&self) -> &RenderCache<ServeError> {
        &self.cache
    }

    pub fn defaults(&self) -> &RenderOptions {
        &self.defaults
    }

    /// Render `target` of `deck`, reusing the cached page when possible.
    pub async fn render(
        &self,
        deck: &DeckId,
        target: RenderTarget,
        options: RenderOptions,
    ) -> Result<SlideResponse, ServeError> {
        let source = self
            .catalog
            .get(deck)
            .ok_or_else(|| ServeError::DeckNotFound(deck.to_string()))?;
        let snapshot = self.bibliography.snapshot();
        let key = RenderKey::new(source.fingerprint(), snapshot.version(), options, target);
        let etag = key.etag();

        if let Some(output) = self.cache.lookup(&key) {
            return Ok(SlideResponse {
                deck: deck.clone(),
                target,
                output,
                etag,
                bib_version: snapshot.version(),
            });
        }

        let document = self.document(&source, &key.options).await?;
        if let RenderTarget::Slide(index) = target {
            if index == 0 || index > document.len() {
                return Err(ServeError::SlideNotFound {
                    deck: deck.clone(),
                    index,
                    count: document.len(),
                });
            }
        }

        let render_snapshot: Arc<BibSnapshot> = Arc::clone(&snapshot);
        let options = key.options.clone();
        let output = self
            .cache
            .get_or_render(key, move || async move {
                task::spawn_blocking(move || {
                    render::render(&document, &render_snapshot, &options, target)
                })
                .await?
                .map_err(ServeError::from)
            })
            .await?;

        Ok(SlideResponse {
            deck: deck.clone(),
            target,
            output,
            etag,
            bib_version: snapshot.version(),
        })
    }

    /// Parsed document for `source` under `options`, memoised per
    /// fingerprint and symbol set.
    pub async fn document(
        &self,
        source: &DeckSource,
        options: &RenderOptions,
    ) -> Result<Arc<SlideDocument>, ServeError> {
        let symbols = options.effective_symbols();
        let key = ParseKey {
            fingerprint: source.fingerprint(),
            symbols: symbols.clone(),
        };
        let cached = self.parsed.lock().get(&key).cloned();
        if let Some(doc) = cached {
            return Ok(doc);
        }

        let text = Arc::clone(source.text());
        let parser = SlideParser::with_symbols(symbols).syntax(self.syntax);
        let document = task::spawn_blocking(move || parser.parse(&text))
            .await?
            .map_err(|source_err| ServeError::SlideParse {
                deck: source.id().clone(),
                source: source_err,
            })?;
        debug!(deck = %source.id(), slides = document.len(), "parsed deck");

        let document = Arc::new(document);
        self.parsed.lock().put(key, Arc::clone(&document));
        Ok(document)
    }

    /// Drop parsed documents whose deck content is no longer current.
    pub fn prune_documents(&self) -> usize {
        let current = self.catalog.fingerprints();
        let mut parsed = self.parsed.lock();
        let stale: Vec<ParseKey> = parsed
            .iter()
            .filter(|(key, _)| !current.contains(&key.fingerprint))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            parsed.pop(key);
        }
        stale.len()
    }

    pub fn decks(&self) -> Vec<DeckSummary> {
        self.catalog
            .decks()
            .iter()
            .map(|deck| DeckSummary::from(deck.as_ref()))
            .collect()
    }

    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.bibliography.snapshot();
        ServiceStatus {
            decks: self.catalog.len(),
            bib_version: snapshot.version(),
            bib_entries: snapshot.len(),
            cache: self.cache.stats(),
        }
    }
}
