//! CLI command implementations.

pub mod check;
pub mod render;
pub mod serve;

pub use check::check_decks;
pub use render::{render_deck, RenderRequest};
pub use serve::serve;

use anyhow::{Context, Result};
use slider_core::{BibliographyIndex, Config, DeckCatalog, RenderCache, SlideService};
use std::sync::Arc;

/// Load the bibliography and every deck, failing on the first error.
pub fn load_service(config: &Config) -> Result<SlideService> {
    let bibliography = match config.bibliography_path() {
        Some(path) => BibliographyIndex::load(&path)
            .with_context(|| format!("Failed to load bibliography {:?}", path))?,
        None => {
            tracing::warn!("No bibliography configured, every citation will be unresolved");
            BibliographyIndex::empty()
        }
    };

    let slides_dir = config.slides_dir();
    let catalog = DeckCatalog::scan(&slides_dir, config.include_dirs(), config.directive_syntax)
        .with_context(|| format!("Failed to load decks from {:?}", slides_dir))?;

    Ok(SlideService::new(
        Arc::new(catalog),
        Arc::new(bibliography),
        RenderCache::new(config.cache.capacity),
    )
    .with_parse_capacity(config.cache.parse_capacity)
    .with_syntax(config.directive_syntax)
    .with_defaults(config.default_options()))
}
