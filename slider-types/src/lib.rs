//! Shared types for slider
//!
//! This crate provides the identifiers and render option types shared by the
//! core pipeline, the templates, and the HTTP front end.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Symbol defined for the preprocessor whenever a deck is rendered as slides.
pub const SLIDES_SYMBOL: &str = "slides";

/// Deck identifier: a `/`-separated path relative to the slides root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeckId(String);

impl DeckId {
    /// Normalize a user supplied deck path.
    ///
    /// Returns `None` for empty paths and for paths that try to leave the
    /// slides root (`..`) or point at hidden entries.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = Vec::new();
        for part in raw.split(['/', '\\']) {
            match part {
                "" | "." => continue,
                ".." => return None,
                p if p.starts_with('.') => return None,
                p => parts.push(p),
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(Self(parts.join("/")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What part of a deck a request wants rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderTarget {
    /// Every slide as one page
    Deck,
    /// A single slide (1-based)
    Slide(usize),
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderTarget::Deck => f.write_str("deck"),
            RenderTarget::Slide(n) => write!(f, "slide {n}"),
        }
    }
}

/// Rejected render option value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {option} '{value}' (expected one of: {expected})")]
pub struct OptionError {
    pub option: &'static str,
    pub value: String,
    pub expected: String,
}

impl OptionError {
    pub fn new(option: &'static str, value: &str, variants: &[&str]) -> Self {
        Self {
            option,
            value: value.to_string(),
            expected: variants.join(", "),
        }
    }
}

/// How resolved citations are labelled inline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CitationStyle {
    /// `[1]`, numbered in order of first appearance in the deck
    #[default]
    Numbered,
    /// `(Doe 2020)`
    AuthorYear,
}

impl CitationStyle {
    pub const VARIANTS: &'static [&'static str] = &["numbered", "author-year"];

    pub fn as_str(&self) -> &'static str {
        match self {
            CitationStyle::Numbered => "numbered",
            CitationStyle::AuthorYear => "author-year",
        }
    }
}

impl FromStr for CitationStyle {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "numbered" | "numeric" => Ok(CitationStyle::Numbered),
            "author-year" | "authoryear" | "author_year" => Ok(CitationStyle::AuthorYear),
            _ => Err(OptionError::new("citation style", s, Self::VARIANTS)),
        }
    }
}

/// Page structure of a rendered deck.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideStyle {
    #[default]
    Slidy,
    Reveal,
    Plain,
}

impl SlideStyle {
    pub const VARIANTS: &'static [&'static str] = &["slidy", "reveal", "plain"];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlideStyle::Slidy => "slidy",
            SlideStyle::Reveal => "reveal",
            SlideStyle::Plain => "plain",
        }
    }
}

impl FromStr for SlideStyle {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slidy" => Ok(SlideStyle::Slidy),
            "reveal" | "revealjs" => Ok(SlideStyle::Reveal),
            "plain" | "html" => Ok(SlideStyle::Plain),
            _ => Err(OptionError::new("slide style", s, Self::VARIANTS)),
        }
    }
}

/// Slides for projection, or notes for reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Slides,
    Notes,
}

impl Mode {
    pub const VARIANTS: &'static [&'static str] = &["slides", "notes"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Slides => "slides",
            Mode::Notes => "notes",
        }
    }
}

impl FromStr for Mode {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slides" | "slide" => Ok(Mode::Slides),
            "notes" | "note" | "handout" => Ok(Mode::Notes),
            _ => Err(OptionError::new("mode", s, Self::VARIANTS)),
        }
    }
}

/// The render option set that takes part in the cache identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderOptions {
    #[serde(default)]
    pub citation_style: CitationStyle,

    #[serde(default)]
    pub slide_style: SlideStyle,

    #[serde(default)]
    pub mode: Mode,

    /// Fail the render when a citation cannot be resolved
    #[serde(default)]
    pub strict_citations: bool,

    /// Extra preprocessor symbols (lowercase)
    #[serde(default)]
    pub symbols: BTreeSet<String>,
}

impl RenderOptions {
    /// Add a preprocessor symbol; symbols are case-insensitive.
    pub fn define(mut self, symbol: &str) -> Self {
        let symbol = symbol.trim().to_lowercase();
        if !symbol.is_empty() {
            self.symbols.insert(symbol);
        }
        self
    }

    /// Symbols the preprocessor sees, including the mode symbol.
    pub fn effective_symbols(&self) -> BTreeSet<String> {
        let mut symbols = self.symbols.clone();
        if self.mode == Mode::Slides {
            symbols.insert(SLIDES_SYMBOL.to_string());
        }
        symbols
    }

    /// Stable textual encoding used when hashing cache keys.
    pub fn canonical(&self) -> String {
        let symbols = self.symbols.iter().cloned().collect::<Vec<_>>().join(",");
        format!(
            "cite={};style={};mode={};strict={};define={}",
            self.citation_style.as_str(),
            self.slide_style.as_str(),
            self.mode.as_str(),
            u8::from(self.strict_citations),
            symbols
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deck_id_normalizes_separators() {
        let id = DeckId::parse("/talks//intro/").unwrap();
        assert_eq!(id.as_str(), "talks/intro");
        assert_eq!(DeckId::parse("a\\b").unwrap().as_str(), "a/b");
    }

    #[test]
    fn deck_id_rejects_escapes() {
        assert!(DeckId::parse("../etc").is_none());
        assert!(DeckId::parse("talks/.git").is_none());
        assert!(DeckId::parse("/").is_none());
    }

    #[test]
    fn option_errors_list_variants() {
        let err = "harvard".parse::<CitationStyle>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown citation style 'harvard' (expected one of: numbered, author-year)"
        );
    }

    #[test]
    fn slides_mode_defines_symbol() {
        let opts = RenderOptions::default().define("Extra");
        let symbols = opts.effective_symbols();
        assert!(symbols.contains("slides"));
        assert!(symbols.contains("extra"));

        let notes = RenderOptions {
            mode: Mode::Notes,
            ..RenderOptions::default()
        };
        assert!(!notes.effective_symbols().contains("slides"));
    }

    #[test]
    fn canonical_encoding_is_order_independent() {
        let a = RenderOptions::default().define("b").define("a");
        let b = RenderOptions::default().define("a").define("b");
        assert_eq!(a.canonical(), b.canonical());
        assert_ne!(
            a.canonical(),
            RenderOptions::default().define("a").canonical()
        );
    }
}
