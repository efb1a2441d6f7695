//! Rendering parsed decks into standalone HTML pages.
//!
//! Citation keys are resolved against one bibliography snapshot. Output
//! depends only on the document, the snapshot, the options and the target, so
//! equal inputs always produce identical bytes.

use crate::bibliography::{BibEntry, BibSnapshot, CitationNotFound};
use crate::markdown::{
    events_to_html, html_escape, merged_events, substitute, CitationTransformer, CodeBlocks,
    GermanQuotes,
};
use crate::parser::{Fence, ParseWarning, SlideDocument, SlideNode, PAUSE_MARKER};
use pulldown_cmark::{CowStr, Event, Tag};
use serde::Serialize;
use slider_types::{CitationStyle, RenderOptions, RenderTarget, SlideStyle};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;

pub const STYLESHEET_URL: &str = "/static/slider.css";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("slide {index} does not exist (deck has {count} slides)")]
    SlideOutOfRange { index: usize, count: usize },

    #[error("unresolved citations: {}", keys.join(", "))]
    UnresolvedCitations { keys: Vec<String> },

    #[error("render task failed: {0}")]
    Task(String),
}

impl From<JoinError> for RenderError {
    fn from(err: JoinError) -> Self {
        RenderError::Task(err.to_string())
    }
}

/// Non-fatal problem attached to a render result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    CitationNotFound { slide: usize, key: String },
    MalformedCitation { slide: usize, marker: String },
    Source { message: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::CitationNotFound { slide, key } => {
                let err = CitationNotFound { key: key.clone() };
                write!(f, "slide {slide}: {err}")
            }
            Warning::MalformedCitation { slide, marker } => {
                write!(f, "slide {slide}: malformed citation '{marker}'")
            }
            Warning::Source { message } => f.write_str(message),
        }
    }
}

impl From<&ParseWarning> for Warning {
    fn from(warning: &ParseWarning) -> Self {
        match warning {
            ParseWarning::MalformedCitation { slide, marker } => Warning::MalformedCitation {
                slide: *slide,
                marker: marker.clone(),
            },
            other => Warning::Source {
                message: other.to_string(),
            },
        }
    }
}

/// Rendered page plus the warnings produced while rendering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    html: String,
    warnings: Vec<Warning>,
    slide_count: usize,
}

impl RenderOutput {
    pub fn new(html: impl Into<String>, warnings: Vec<Warning>, slide_count: usize) -> Self {
        Self {
            html: html.into(),
            warnings,
            slide_count,
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn bytes(&self) -> &[u8] {
        self.html.as_bytes()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Number of slides in the whole deck, not just the rendered target.
    pub fn slide_count(&self) -> usize {
        self.slide_count
    }
}

/// Render `document` with citations resolved against `bibliography`.
pub fn render(
    document: &SlideDocument,
    bibliography: &BibSnapshot,
    options: &RenderOptions,
    target: RenderTarget,
) -> Result<RenderOutput, RenderError> {
    Renderer::new(bibliography, options).render(document, target)
}

pub struct Renderer<'a> {
    bibliography: &'a BibSnapshot,
    options: &'a RenderOptions,
}

/// Per-render state shared by all slides.
struct Pass<'a> {
    bibliography: &'a BibSnapshot,
    style: CitationStyle,
    metadata: &'a BTreeMap<String, String>,
    /// Footer items carry the `ref-` anchors (single-slide pages)
    anchor_footer: bool,
    numbers: HashMap<&'a str, usize>,
    missing: Vec<String>,
    warnings: Vec<Warning>,
}

impl<'a> Renderer<'a> {
    pub fn new(bibliography: &'a BibSnapshot, options: &'a RenderOptions) -> Self {
        Self {
            bibliography,
            options,
        }
    }

    pub fn render(
        &self,
        document: &SlideDocument,
        target: RenderTarget,
    ) -> Result<RenderOutput, RenderError> {
        let count = document.len();
        let slides: Vec<&SlideNode> = match target {
            RenderTarget::Deck => document.slides().iter().collect(),
            RenderTarget::Slide(index) => match document.slide(index) {
                Some(slide) => vec![slide],
                None => return Err(RenderError::SlideOutOfRange { index, count }),
            },
        };

        let mut pass = Pass {
            bibliography: self.bibliography,
            style: self.options.citation_style,
            metadata: document.metadata(),
            anchor_footer: matches!(target, RenderTarget::Slide(_)),
            numbers: HashMap::new(),
            missing: Vec::new(),
            warnings: Vec::new(),
        };
        for key in document.citation_order() {
            if self.bibliography.get(key).is_some() {
                let next = pass.numbers.len() + 1;
                pass.numbers.insert(key, next);
            }
        }

        for warning in document.warnings() {
            let applies = match (target, warning) {
                (RenderTarget::Slide(n), ParseWarning::MalformedCitation { slide, .. }) => {
                    *slide == n
                }
                _ => true,
            };
            if applies {
                pass.warnings.push(warning.into());
            }
        }

        let mut body = String::new();
        if target == RenderTarget::Deck {
            body.push_str(&title_slide(document));
        }
        for slide in &slides {
            body.push_str(&pass.slide(slide));
        }
        if target == RenderTarget::Deck {
            body.push_str(&pass.references_section(document));
        }

        if self.options.strict_citations && !pass.missing.is_empty() {
            return Err(RenderError::UnresolvedCitations { keys: pass.missing });
        }

        let html = self.page(document, target, &body);
        Ok(RenderOutput {
            html,
            warnings: pass.warnings,
            slide_count: count,
        })
    }

    fn page(&self, document: &SlideDocument, target: RenderTarget, body: &str) -> String {
        let deck_title = document.title().unwrap_or("Slides");
        let title = match target {
            RenderTarget::Deck => html_escape(deck_title),
            RenderTarget::Slide(n) => format!("{} ({n})", html_escape(deck_title)),
        };
        let lang = document
            .metadata()
            .get("lang")
            .map(|l| html_escape(l))
            .unwrap_or_else(|| "en".to_string());
        let style = self.options.slide_style.as_str();
        let mode = self.options.mode.as_str();

        let (open, close) = match self.options.slide_style {
            SlideStyle::Reveal => ("<div class=\"reveal\"><div class=\"slides\">\n", "</div></div>\n"),
            SlideStyle::Slidy | SlideStyle::Plain => ("", ""),
        };

        format!(
            "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
             <title>{title}</title>\n<link rel=\"stylesheet\" href=\"{STYLESHEET_URL}\">\n\
             </head>\n<body class=\"slider slider-{style} slider-{mode}\">\n\
             {open}{body}{close}</body>\n</html>\n"
        )
    }
}

fn title_slide(document: &SlideDocument) -> String {
    let Some(title) = document.title() else {
        return String::new();
    };
    let mut html = format!(
        "<section class=\"slide title-slide\" id=\"title\">\n<h1 class=\"title\">{}</h1>\n",
        html_escape(title)
    );
    for field in ["subtitle", "author", "date"] {
        if let Some(value) = document.metadata().get(field) {
            html.push_str(&format!(
                "<p class=\"{field}\">{}</p>\n",
                html_escape(value)
            ));
        }
    }
    html.push_str("</section>\n");
    html
}

impl<'a> Pass<'a> {
    fn slide(&mut self, slide: &SlideNode) -> String {
        let mut quotes = GermanQuotes::new();
        let mut html = format!(
            "<section class=\"slide\" id=\"slide-{0}\" data-index=\"{0}\">\n",
            slide.index
        );

        for (idx, chunk) in split_pauses(&slide.content).iter().enumerate() {
            let inner = self.markdown(chunk, slide.index, &mut quotes);
            if idx == 0 {
                html.push_str(&inner);
            } else {
                html.push_str("<div class=\"incremental\">\n");
                html.push_str(&inner);
                html.push_str("</div>\n");
            }
        }

        let cited: Vec<Arc<BibEntry>> = slide
            .citations
            .iter()
            .filter_map(|k| self.bibliography.get(k).cloned())
            .collect();
        if !cited.is_empty() {
            html.push_str("<footer class=\"slide-references\"><ol>");
            for entry in &cited {
                html.push_str(&self.reference_item(entry, self.anchor_footer));
            }
            html.push_str("</ol></footer>\n");
        }

        html.push_str("</section>\n");
        html
    }

    fn markdown(&mut self, markdown: &str, slide: usize, quotes: &mut GermanQuotes) -> String {
        let events: Vec<Event<'_>> = merged_events(markdown).collect();
        let cited = CitationTransformer::new(|keys: &[String]| self.cite(keys, slide)).transform(events);

        // substituted values are never scanned for markers
        let metadata = self.metadata;
        let mut code = CodeBlocks::default();
        events_to_html(cited.into_iter().map(|event| {
            if code.observe(&event) {
                event
            } else {
                rewrite_event(event, metadata, quotes)
            }
        }))
    }

    fn cite(&mut self, keys: &[String], slide: usize) -> String {
        let mut labels = Vec::new();
        let mut placeholders = String::new();
        for key in keys {
            match self.bibliography.get(key) {
                Some(entry) => labels.push(format!(
                    "<a href=\"#ref-{}\">{}</a>",
                    html_escape(key),
                    html_escape(&self.label(entry))
                )),
                None => {
                    tracing::debug!(key = %key, slide, "unresolved citation");
                    if !self.missing.contains(key) {
                        self.missing.push(key.clone());
                    }
                    self.warnings.push(Warning::CitationNotFound {
                        slide,
                        key: key.clone(),
                    });
                    placeholders.push_str(&format!(
                        "<span class=\"citation-missing\" data-cite=\"{0}\">[?{0}]</span>",
                        html_escape(key)
                    ));
                }
            }
        }

        if labels.is_empty() {
            return placeholders;
        }
        let (open, sep, close) = match self.style {
            CitationStyle::Numbered => ("[", ", ", "]"),
            CitationStyle::AuthorYear => ("(", "; ", ")"),
        };
        let resolved: Vec<&str> = keys
            .iter()
            .filter(|k| self.bibliography.get(k).is_some())
            .map(String::as_str)
            .collect();
        format!(
            "<span class=\"citation\" data-cites=\"{}\">{open}{}{close}</span>{placeholders}",
            html_escape(&resolved.join(" ")),
            labels.join(sep)
        )
    }

    fn label(&self, entry: &BibEntry) -> String {
        match self.style {
            CitationStyle::Numbered => self
                .numbers
                .get(entry.key())
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string()),
            CitationStyle::AuthorYear => author_year(entry),
        }
    }

    fn reference_item(&self, entry: &BibEntry, anchored: bool) -> String {
        let id = if anchored {
            format!(" id=\"ref-{}\"", html_escape(entry.key()))
        } else {
            String::new()
        };
        let label = match self.style {
            CitationStyle::Numbered => {
                format!("<span class=\"ref-label\">[{}]</span> ", self.label(entry))
            }
            CitationStyle::AuthorYear => String::new(),
        };
        format!(
            "<li{id} data-key=\"{}\">{label}{}</li>",
            html_escape(entry.key()),
            format_reference(entry)
        )
    }

    fn references_section(&self, document: &SlideDocument) -> String {
        let mut entries: Vec<Arc<BibEntry>> = document
            .citation_order()
            .into_iter()
            .filter_map(|k| self.bibliography.get(k).cloned())
            .collect();
        if entries.is_empty() {
            return String::new();
        }
        if self.style == CitationStyle::AuthorYear {
            entries.sort_by(|a, b| {
                author_year(a)
                    .cmp(&author_year(b))
                    .then_with(|| a.key().cmp(b.key()))
            });
        }

        let heading = document
            .metadata()
            .get("reference-section-title")
            .map(|t| html_escape(t))
            .unwrap_or_else(|| "References".to_string());
        let mut html = format!(
            "<section class=\"slide references\" id=\"references\">\n<h2>{heading}</h2>\n<ol class=\"reference-list\">"
        );
        for entry in &entries {
            html.push_str(&self.reference_item(entry, true));
        }
        html.push_str("</ol>\n</section>\n");
        html
    }
}

fn rewrite_event<'a>(
    event: Event<'a>,
    metadata: &BTreeMap<String, String>,
    quotes: &mut GermanQuotes,
) -> Event<'a> {
    match event {
        Event::Text(text) => {
            let text = substitute(&text, metadata).map(CowStr::from).unwrap_or(text);
            match quotes.replace(&text) {
                Some(replaced) => Event::Text(CowStr::from(replaced)),
                None => Event::Text(text),
            }
        }
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: substitute(&dest_url, metadata)
                .map(CowStr::from)
                .unwrap_or(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: substitute(&dest_url, metadata)
                .map(CowStr::from)
                .unwrap_or(dest_url),
            title,
            id,
        }),
        other => other,
    }
}

/// Split slide markdown at pause markers outside fenced code.
fn split_pauses(content: &str) -> Vec<String> {
    let mut chunks = vec![String::new()];
    let mut fence: Option<Fence> = None;
    for (idx, line) in content.lines().enumerate() {
        match &fence {
            Some(open) => {
                if open.closed_by(line) {
                    fence = None;
                }
            }
            None if line.trim() == PAUSE_MARKER => {
                chunks.push(String::new());
                continue;
            }
            None => fence = Fence::open(line, idx + 1),
        }
        if let Some(chunk) = chunks.last_mut() {
            chunk.push_str(line);
            chunk.push('\n');
        }
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

fn author_year(entry: &BibEntry) -> String {
    let names = entry.family_names();
    let who = match names {
        [] => entry.key().to_string(),
        [one] => one.clone(),
        [a, b] => format!("{a} & {b}"),
        [first, ..] => format!("{first} et al."),
    };
    format!("{who} {}", entry.year().unwrap_or("n.d."))
}

fn format_reference(entry: &BibEntry) -> String {
    let mut head = Vec::new();
    if let Some(people) = entry.field("author").or_else(|| entry.field("editor")) {
        head.push(html_escape(people));
    }
    if let Some(year) = entry.year() {
        head.push(format!("({})", html_escape(year)));
    }

    let mut parts = Vec::new();
    if !head.is_empty() {
        parts.push(head.join(" "));
    }
    if let Some(title) = entry.field("title") {
        parts.push(format!("<span class=\"ref-title\">{}</span>", html_escape(title)));
    }
    if let Some(container) = entry.field("container") {
        parts.push(format!("<em>{}</em>", html_escape(container)));
    }
    let imprint: Vec<String> = ["publisher", "location"]
        .iter()
        .filter_map(|f| entry.field(f))
        .map(html_escape)
        .collect();
    if !imprint.is_empty() {
        parts.push(imprint.join(", "));
    }
    if let Some(url) = entry.field("url") {
        let url = html_escape(url);
        parts.push(format!("<a href=\"{url}\">{url}</a>"));
    }
    if let Some(doi) = entry.field("doi") {
        let doi = html_escape(doi);
        parts.push(format!("<a href=\"https://doi.org/{doi}\">doi:{doi}</a>"));
    }

    if parts.is_empty() {
        return html_escape(entry.key());
    }
    format!("{}.", parts.join(". "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SlideParser;
    use slider_types::{Mode, SLIDES_SYMBOL};

    fn bib() -> BibSnapshot {
        BibSnapshot::from_entries(
            3,
            [BibEntry::new("doe2020")
                .with_field("author", "Jane Doe & Richard Roe")
                .with_field("title", "Caching Slides")
                .with_field("year", "2020")
                .with_family_names(vec!["Doe".into(), "Roe".into()])],
        )
    }

    fn deck(src: &str) -> SlideDocument {
        SlideParser::with_symbols([SLIDES_SYMBOL]).parse(src).unwrap()
    }

    #[test]
    fn resolves_numbered_citations() {
        let doc = deck("## One\nSee [@doe2020].\n");
        let out = render(&doc, &bib(), &RenderOptions::default(), RenderTarget::Deck).unwrap();
        assert!(out
            .html()
            .contains(r##"<span class="citation" data-cites="doe2020">[<a href="#ref-doe2020">1</a>]</span>"##));
        assert!(out.html().contains(r#"<li id="ref-doe2020" data-key="doe2020">"#));
        assert!(out.warnings().is_empty());
    }

    #[test]
    fn author_year_labels() {
        let doc = deck("## One\nSee [@doe2020].\n");
        let options = RenderOptions {
            citation_style: CitationStyle::AuthorYear,
            ..Default::default()
        };
        let out = render(&doc, &bib(), &options, RenderTarget::Slide(1)).unwrap();
        assert!(out
            .html()
            .contains(r##"(<a href="#ref-doe2020">Doe &amp; Roe 2020</a>)"##));
    }

    #[test]
    fn missing_key_renders_placeholder_and_warns() {
        let doc = deck("## One\nSee [@missing99].\n");
        let out = render(&doc, &bib(), &RenderOptions::default(), RenderTarget::Slide(1)).unwrap();
        assert!(out.html().contains(
            r#"<span class="citation-missing" data-cite="missing99">[?missing99]</span>"#
        ));
        assert_eq!(
            out.warnings(),
            [Warning::CitationNotFound {
                slide: 1,
                key: "missing99".into()
            }]
        );
    }

    #[test]
    fn strict_mode_fails_on_missing_key() {
        let doc = deck("## One\n[@missing99] and [@doe2020]\n");
        let options = RenderOptions {
            strict_citations: true,
            ..Default::default()
        };
        let err = render(&doc, &bib(), &options, RenderTarget::Deck).unwrap_err();
        assert_eq!(
            err,
            RenderError::UnresolvedCitations {
                keys: vec!["missing99".into()]
            }
        );
    }

    #[test]
    fn out_of_range_slide() {
        let doc = deck("## One\n## Two\n");
        let err = render(&doc, &bib(), &RenderOptions::default(), RenderTarget::Slide(3)).unwrap_err();
        assert_eq!(err, RenderError::SlideOutOfRange { index: 3, count: 2 });
    }

    #[test]
    fn output_is_deterministic() {
        let doc = deck("---\ntitle: Talk\n---\n## One\n[@doe2020] ´´hi´´\n## Two\n[@missing99]\n");
        let options = RenderOptions::default();
        let a = render(&doc, &bib(), &options, RenderTarget::Deck).unwrap();
        let b = render(&doc, &bib(), &options, RenderTarget::Deck).unwrap();
        assert_eq!(a.bytes(), b.bytes());
        assert_eq!(a.warnings(), b.warnings());
        assert_eq!(a.slide_count(), 2);
    }

    #[test]
    fn pauses_become_incremental_blocks() {
        let doc = deck("## One\nfirst\n<!-- pause -->\nsecond\n");
        let out = render(&doc, &bib(), &RenderOptions::default(), RenderTarget::Slide(1)).unwrap();
        assert!(out
            .html()
            .contains("<div class=\"incremental\">\n<p>second</p>\n</div>"));
    }

    #[test]
    fn metavars_and_quotes() {
        let doc = deck("---\ntitle: Talk\n---\n## One\n%{title}: ´´Hallo´´ [x](%{title}.html)\n");
        let out = render(&doc, &bib(), &RenderOptions::default(), RenderTarget::Slide(1)).unwrap();
        assert!(out.html().contains("Talk: \u{201e}Hallo\u{201c}"));
        assert!(out.html().contains(r#"<a href="Talk.html">x</a>"#));
    }

    #[test]
    fn code_blocks_are_left_verbatim() {
        let doc = deck("---\ntitle: Talk\n---\n## One\n```\nlet x = [@missing99] %{title} ´´q´´;\n```\n");
        assert!(doc.slide(1).unwrap().citations.is_empty());

        let options = RenderOptions {
            strict_citations: true,
            ..Default::default()
        };
        let out = render(&doc, &bib(), &options, RenderTarget::Slide(1)).unwrap();
        assert!(out
            .html()
            .contains("<pre><code>let x = [@missing99] %{title} ´´q´´;\n</code></pre>"));
        assert!(!out.html().contains("citation-missing"));
        assert!(out.warnings().is_empty());
    }

    #[test]
    fn prose_comments_pass_through() {
        let doc = deck("## One\n<!-- see figure -->\ntext\n");
        let out = render(&doc, &bib(), &RenderOptions::default(), RenderTarget::Slide(1)).unwrap();
        assert!(out.html().contains("<!-- see figure -->"));
        assert!(out.html().contains("<p>text</p>"));
    }

    #[test]
    fn substituted_values_are_not_citations() {
        let doc = deck("---\nsubtitle: \"[@doe2020]\"\n---\n## One\n%{subtitle}\n");
        let out = render(&doc, &bib(), &RenderOptions::default(), RenderTarget::Slide(1)).unwrap();
        assert!(out.html().contains("<p>[@doe2020]</p>"));
        assert!(!out.html().contains("class=\"citation\""));
        assert!(out.warnings().is_empty());
    }

    #[test]
    fn single_slide_footer_carries_anchors() {
        let doc = deck("## One\nSee [@doe2020].\n");
        let slide = render(&doc, &bib(), &RenderOptions::default(), RenderTarget::Slide(1)).unwrap();
        assert!(slide
            .html()
            .contains(r#"<footer class="slide-references"><ol><li id="ref-doe2020" data-key="doe2020">"#));

        let whole = render(&doc, &bib(), &RenderOptions::default(), RenderTarget::Deck).unwrap();
        assert_eq!(whole.html().matches(r#"id="ref-doe2020""#).count(), 1);
    }

    #[test]
    fn slide_style_shapes_page() {
        let doc = deck("## One\n");
        let options = RenderOptions {
            slide_style: SlideStyle::Reveal,
            mode: Mode::Notes,
            ..Default::default()
        };
        let out = render(&doc, &bib(), &options, RenderTarget::Deck).unwrap();
        assert!(out
            .html()
            .contains("<body class=\"slider slider-reveal slider-notes\">\n<div class=\"reveal\"><div class=\"slides\">"));
        assert!(out.html().contains(STYLESHEET_URL));
    }

    #[test]
    fn split_pauses_ignores_fenced_markers() {
        let chunks = split_pauses("a\n```\n. . .\n```\n. . .\nb\n");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains(". . ."));
    }
}
