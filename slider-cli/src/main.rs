//! # slider
//!
//! Presentation server: renders Markdown decks with citations resolved
//! against a shared bibliography and serves them over HTTP.

mod commands;
mod server;
mod settings;

use clap::{Args, Parser, Subcommand};
use slider_types::{CitationStyle, Mode, SlideStyle};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "slider")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (default: slider.yml when present)
    #[arg(short, long, env = "SLIDER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the decks
    #[arg(short, long, env = "SLIDER_SLIDES", global = true)]
    slides_dir: Option<PathBuf>,

    /// Bibliography file (BibLaTeX)
    #[arg(short = 'B', long, env = "SLIDER_BIBLIOGRAPHY", global = true)]
    bibliography: Option<PathBuf>,

    /// Additional directories searched by include directives
    #[arg(short = 'I', long = "include", global = true)]
    include: Vec<PathBuf>,

    /// Default citation style (numbered, author-year)
    #[arg(long, global = true)]
    cite_style: Option<CitationStyle>,

    /// Default slide style (slidy, reveal, plain)
    #[arg(long, global = true)]
    slide_style: Option<SlideStyle>,

    /// Fail renders that contain unresolved citations
    #[arg(long, global = true)]
    strict_citations: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Clone, Default)]
struct ServeArgs {
    /// Run as a service: no browser, no banner, plain logs
    #[arg(short = 'D', long)]
    daemon: bool,

    /// Address to listen on
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds between safety-net rescans (0 disables)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Maximum number of cached pages
    #[arg(long)]
    cache_capacity: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve decks over HTTP (default)
    Serve(ServeArgs),

    /// Render one deck to HTML
    Render {
        /// Deck id, relative to the slides directory
        deck: String,

        /// Render only this slide (1-based)
        #[arg(long)]
        slide: Option<usize>,

        /// Slides or notes
        #[arg(long)]
        mode: Option<Mode>,

        /// Extra preprocessor symbols
        #[arg(short = 'd', long = "define", value_delimiter = ',')]
        define: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load the bibliography and render every deck, reporting problems
    Check {
        /// Treat warnings as errors
        #[arg(long)]
        deny_warnings: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let serve = match &cli.command {
        Some(Commands::Serve(args)) => args.clone(),
        _ => cli.serve.clone(),
    };

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .with_ansi(!serve.daemon)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = settings::resolve(&cli, &serve)?;

    match cli.command {
        None | Some(Commands::Serve(_)) => commands::serve(config, serve.daemon).await,
        Some(Commands::Render {
            deck,
            slide,
            mode,
            define,
            output,
        }) => {
            let request = commands::RenderRequest {
                deck,
                slide,
                mode,
                define,
                output,
            };
            commands::render_deck(&config, request).await
        }
        Some(Commands::Check { deny_warnings }) => {
            commands::check_decks(&config, deny_warnings).await
        }
    }
}
