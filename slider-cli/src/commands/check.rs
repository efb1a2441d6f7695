//! Render every deck once and report what went wrong.

use super::load_service;
use anyhow::{bail, Result};
use slider_core::Config;
use slider_types::RenderTarget;

pub async fn check_decks(config: &Config, deny_warnings: bool) -> Result<()> {
    let service = load_service(config)?;
    let bibliography = service.bibliography();
    println!(
        "Bibliography: {} entries (version {})",
        bibliography.len(),
        bibliography.version()
    );

    let mut failed = 0usize;
    let mut warned = 0usize;
    for deck in service.catalog().decks() {
        let id = deck.id();
        match service
            .render(id, RenderTarget::Deck, service.defaults().clone())
            .await
        {
            Ok(response) => {
                let warnings = response.output.warnings();
                println!(
                    "{}: {} slides, {} warnings",
                    id,
                    response.slide_count(),
                    warnings.len()
                );
                for warning in warnings {
                    println!("  warning: {}", warning);
                }
                if !warnings.is_empty() {
                    warned += 1;
                }
            }
            Err(err) => {
                println!("{}: error: {}", id, err);
                failed += 1;
            }
        }
    }

    if service.catalog().is_empty() {
        println!("No decks found in {:?}", service.catalog().root());
    }

    if failed > 0 {
        bail!("{} deck(s) failed to render", failed);
    }
    if deny_warnings && warned > 0 {
        bail!("{} deck(s) rendered with warnings", warned);
    }
    Ok(())
}
