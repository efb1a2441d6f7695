//! Markdown processing shared by the parser and the renderer.

pub mod citations;
pub mod metavars;
pub mod quotes;

use pulldown_cmark::{html, Event, Options, Parser, Tag, TagEnd, TextMergeStream};

pub use citations::{parse_marker, scan_citations, CitationMarker, CitationScan, CitationTransformer};
pub use metavars::substitute;
pub use quotes::GermanQuotes;

pub fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

/// Parse markdown with adjacent text events merged, so that bracketed
/// citation markers arrive as a single text event.
pub fn merged_events(markdown: &str) -> impl Iterator<Item = Event<'_>> {
    TextMergeStream::new(Parser::new_ext(markdown, markdown_options()))
}

/// Whether an event stream is currently inside a code block.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeBlocks {
    inside: bool,
}

impl CodeBlocks {
    /// Update the state for `event` and report whether its text belongs to
    /// code.
    pub fn observe(&mut self, event: &Event<'_>) -> bool {
        match event {
            Event::Start(Tag::CodeBlock(_)) => self.inside = true,
            Event::End(TagEnd::CodeBlock) => self.inside = false,
            _ => {}
        }
        self.inside
    }
}

pub fn events_to_html<'a>(events: impl IntoIterator<Item = Event<'a>>) -> String {
    let mut out = String::new();
    html::push_html(&mut out, events.into_iter());
    out
}

pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_blocks_cover_fenced_text_only() {
        let mut code = CodeBlocks::default();
        let inside: Vec<(bool, String)> = merged_events("a\n\n```\nb\n```\n\nc\n")
            .filter_map(|event| {
                let flag = code.observe(&event);
                match event {
                    Event::Text(text) => Some((flag, text.trim().to_string())),
                    _ => None,
                }
            })
            .collect();
        assert_eq!(
            inside,
            vec![
                (false, "a".to_string()),
                (true, "b".to_string()),
                (false, "c".to_string())
            ]
        );
    }
}
