//! # slider-core
//!
//! Core library for the slider presentation server.
//!
//! This crate turns Markdown decks into HTML slide pages: it loads the
//! bibliography, preprocesses and parses decks, renders them with citations
//! resolved, and memoises the results in a content-addressed cache that a
//! background watcher keeps consistent with the file system.

pub mod bibliography;
pub mod cache;
pub mod config;
pub mod deck;
pub mod directive;
pub mod frontmatter;
pub mod markdown;
pub mod parser;
pub mod render;
pub mod service;
pub mod watcher;

pub use bibliography::{BibEntry, BibParseError, BibSnapshot, BibliographyIndex, CitationNotFound};
pub use cache::{CacheStats, RenderCache, RenderKey};
pub use config::{Config, ConfigError};
pub use deck::{DeckCatalog, DeckError, DeckSource, Fingerprint};
pub use directive::DirectiveSyntax;
pub use parser::{SlideDocument, SlideNode, SlideParseError, SlideParser};
pub use render::{RenderError, RenderOutput, Renderer, Warning};
pub use service::{OptionOverrides, ServeError, SlideResponse, SlideService};
pub use watcher::{ChangeWatcher, WatcherHandle};

pub use slider_types::{
    CitationStyle, DeckId, Mode, OptionError, RenderOptions, RenderTarget, SlideStyle,
};
