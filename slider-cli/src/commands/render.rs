//! One-shot rendering of a single deck.

use super::load_service;
use anyhow::{anyhow, Context, Result};
use slider_core::Config;
use slider_types::{DeckId, Mode, RenderTarget};
use std::path::PathBuf;

pub struct RenderRequest {
    pub deck: String,
    pub slide: Option<usize>,
    pub mode: Option<Mode>,
    pub define: Vec<String>,
    pub output: Option<PathBuf>,
}

pub async fn render_deck(config: &Config, request: RenderRequest) -> Result<()> {
    let service = load_service(config)?;
    let deck = DeckId::parse(&request.deck)
        .ok_or_else(|| anyhow!("Invalid deck id '{}'", request.deck))?;
    let target = request
        .slide
        .map(RenderTarget::Slide)
        .unwrap_or(RenderTarget::Deck);

    let mut options = service.defaults().clone();
    if let Some(mode) = request.mode {
        options.mode = mode;
    }
    for symbol in &request.define {
        options = options.define(symbol);
    }

    let response = service
        .render(&deck, target, options)
        .await
        .with_context(|| format!("Failed to render {} of '{}'", target, deck))?;

    for warning in response.output.warnings() {
        eprintln!("warning: {}", warning);
    }

    match &request.output {
        Some(path) => {
            std::fs::write(path, response.output.bytes())
                .with_context(|| format!("Failed to write {:?}", path))?;
            eprintln!(
                "Rendered {} ({} slides) to {}",
                deck,
                response.slide_count(),
                path.display()
            );
        }
        None => print!("{}", response.output.html()),
    }
    Ok(())
}
