//! Askama template definitions.

use askama::Template;
use chrono::{Datelike, Utc};
use slider_core::render::STYLESHEET_URL;
use slider_core::service::{DeckSummary, ServiceStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Template rendering failed: {0}")]
    Template(#[from] askama::Error),
}

/// One row of the deck index
#[derive(Debug, Clone)]
pub struct DeckEntry {
    pub id: String,
    pub url: String,
    pub files: usize,
    /// Abbreviated content fingerprint
    pub fingerprint: String,
    pub loaded_at: String,
}

impl From<&DeckSummary> for DeckEntry {
    fn from(deck: &DeckSummary) -> Self {
        Self {
            id: deck.id.to_string(),
            url: format!("/deck/{}", deck.id),
            files: deck.files,
            fingerprint: deck.fingerprint.chars().take(12).collect(),
            loaded_at: deck.loaded_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

/// Landing page listing every deck
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub title: String,
    pub stylesheet: &'static str,
    pub decks: Vec<DeckEntry>,
    pub bib_version: u64,
    pub bib_entries: usize,
    pub cached_pages: usize,
    pub year: i32,
}

impl IndexTemplate {
    pub fn new(decks: &[DeckSummary], status: &ServiceStatus) -> Self {
        Self {
            title: "Slides".to_string(),
            stylesheet: STYLESHEET_URL,
            decks: decks.iter().map(DeckEntry::from).collect(),
            bib_version: status.bib_version,
            bib_entries: status.bib_entries,
            cached_pages: status.cache.entries,
            year: Utc::now().year(),
        }
    }

    pub fn to_html(&self) -> Result<String, PageError> {
        Ok(self.render()?)
    }
}

/// Error page for failed deck requests
#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub status: u16,
    pub reason: String,
    pub message: String,
    pub stylesheet: &'static str,
}

impl ErrorTemplate {
    pub fn new(status: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            message: message.into(),
            stylesheet: STYLESHEET_URL,
        }
    }

    pub fn to_html(&self) -> Result<String, PageError> {
        Ok(self.render()?)
    }
}
