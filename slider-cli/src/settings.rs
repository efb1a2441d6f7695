//! Configuration assembly: config file first, then command line overrides.

use crate::{Cli, ServeArgs};
use anyhow::{Context, Result};
use slider_core::config::{Config, DEFAULT_CONFIG_FILE};
use std::path::Path;

pub fn resolve(cli: &Cli, serve: &ServeArgs) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Config::from_file(DEFAULT_CONFIG_FILE)
            .with_context(|| format!("Failed to load config {}", DEFAULT_CONFIG_FILE))?,
        None => Config::default(),
    };

    apply_overrides(&mut config, cli, serve);
    tracing::debug!(?config, "configuration resolved");
    Ok(config)
}

/// Command line values win over the config file. Paths given on the command
/// line are taken relative to the working directory.
fn apply_overrides(config: &mut Config, cli: &Cli, serve: &ServeArgs) {
    let cwd = std::env::current_dir().unwrap_or_default();
    let absolute = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };

    if let Some(dir) = &cli.slides_dir {
        config.slides_dir = Some(absolute(dir));
    }
    if let Some(bib) = &cli.bibliography {
        config.bibliography = Some(absolute(bib));
    }
    config
        .include_paths
        .extend(cli.include.iter().map(|p| absolute(p)));

    if let Some(style) = cli.cite_style {
        config.render.cite_style = style;
    }
    if let Some(style) = cli.slide_style {
        config.render.slide_style = style;
    }
    if cli.strict_citations {
        config.render.strict_citations = true;
    }

    if let Some(host) = &serve.host {
        config.server.host = host.clone();
    }
    if let Some(port) = serve.port {
        config.server.port = port;
    }
    if let Some(secs) = serve.poll_interval {
        config.watch.poll_interval_secs = secs;
    }
    if let Some(capacity) = serve.cache_capacity {
        config.cache.capacity = Some(capacity);
    }
}
