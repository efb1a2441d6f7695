//! Inline citation markers: `[@key]`, `[@a; @b]`, `[@a, p. 4]`.

use once_cell::sync::Lazy;
use pulldown_cmark::{CowStr, Event};
use regex::Regex;

use super::{merged_events, CodeBlocks};

static CITE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[@([^\]]*)\]").expect("valid citation regex"));

static KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_:.#$%&+?<>~/\-]*$").expect("valid citation key regex")
});

/// Keys found in one citation marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationMarker {
    pub keys: Vec<String>,
    /// Items that looked like a key (`@...`) but are not valid key syntax
    pub malformed: Vec<String>,
}

/// Split the inside of a `[@...]` marker. The leading `@` is already consumed
/// by the regex, so the first item is always a key candidate.
pub fn parse_marker(inner: &str) -> CitationMarker {
    let mut marker = CitationMarker::default();
    for (idx, item) in inner.split([';', ',']).enumerate() {
        let item = item.trim();
        let candidate = if idx == 0 {
            item
        } else if let Some(rest) = item.strip_prefix('@') {
            rest
        } else {
            // locator or suffix text such as "p. 4"
            continue;
        };

        if KEY_RE.is_match(candidate) {
            if !marker.keys.iter().any(|k| k == candidate) {
                marker.keys.push(candidate.to_string());
            }
        } else {
            marker.malformed.push(format!("@{candidate}"));
        }
    }
    marker
}

/// Citation keys referenced by a markdown fragment, outside code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationScan {
    /// Unique keys in order of first appearance
    pub keys: Vec<String>,
    pub malformed: Vec<String>,
}

pub fn scan_citations(markdown: &str) -> CitationScan {
    let mut scan = CitationScan::default();
    let mut code = CodeBlocks::default();
    for event in merged_events(markdown) {
        if code.observe(&event) {
            continue;
        }
        if let Event::Text(text) = event {
            for caps in CITE_RE.captures_iter(&text) {
                let marker = parse_marker(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
                for key in marker.keys {
                    if !scan.keys.contains(&key) {
                        scan.keys.push(key);
                    }
                }
                scan.malformed.extend(marker.malformed);
            }
        }
    }
    scan
}

/// Replace citation markers in text events with rendered inline HTML.
/// Text inside code blocks is left alone.
///
/// `render` receives the valid keys of one marker. Markers without a single
/// valid key stay as plain text.
pub struct CitationTransformer<F> {
    render: F,
}

impl<F> CitationTransformer<F>
where
    F: FnMut(&[String]) -> String,
{
    pub fn new(render: F) -> Self {
        Self { render }
    }

    pub fn transform<'a>(&mut self, events: Vec<Event<'a>>) -> Vec<Event<'a>> {
        let mut out = Vec::with_capacity(events.len());
        let mut code = CodeBlocks::default();

        for event in events {
            if code.observe(&event) {
                out.push(event);
                continue;
            }
            let text = match event {
                Event::Text(text) => text,
                other => {
                    out.push(other);
                    continue;
                }
            };

            let mut last_end = 0;
            let mut replaced = false;
            for caps in CITE_RE.captures_iter(&text) {
                let Some(full) = caps.get(0) else { continue };
                let marker = parse_marker(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
                if marker.keys.is_empty() {
                    continue;
                }
                if full.start() > last_end {
                    out.push(Event::Text(CowStr::from(
                        text[last_end..full.start()].to_string(),
                    )));
                }
                out.push(Event::InlineHtml(CowStr::from((self.render)(&marker.keys))));
                last_end = full.end();
                replaced = true;
            }

            if !replaced {
                out.push(Event::Text(text));
            } else if last_end < text.len() {
                out.push(Event::Text(CowStr::from(text[last_end..].to_string())));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::events_to_html;

    #[test]
    fn marker_with_locator() {
        let marker = parse_marker("doe2020, p. 4; @roe2019");
        assert_eq!(marker.keys, vec!["doe2020", "roe2019"]);
        assert!(marker.malformed.is_empty());
    }

    #[test]
    fn malformed_keys_are_collected() {
        let marker = parse_marker("bad key; @ok");
        assert_eq!(marker.keys, vec!["ok"]);
        assert_eq!(marker.malformed, vec!["@bad key"]);
    }

    #[test]
    fn scan_ignores_code() {
        let scan = scan_citations("See [@doe2020] and `[@inline]`.\n\n```\n[@fenced]\n```\n");
        insta::assert_debug_snapshot!(scan.keys, @r###"
        [
            "doe2020",
        ]
        "###);
    }

    #[test]
    fn transformer_skips_code_blocks() {
        let events: Vec<Event> = merged_events("```\n[@doe2020]\n```\n").collect();
        let mut calls = 0;
        let out = CitationTransformer::new(|_: &[String]| {
            calls += 1;
            String::new()
        })
        .transform(events);
        assert_eq!(calls, 0);
        assert_eq!(events_to_html(out), "<pre><code>[@doe2020]\n</code></pre>\n");
    }

    #[test]
    fn scan_keeps_first_appearance_order() {
        let scan = scan_citations("[@b] then [@a; @b] then [@c]");
        assert_eq!(scan.keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn transformer_replaces_markers() {
        let events: Vec<Event> = merged_events("x [@doe2020] y").collect();
        let mut transformer = CitationTransformer::new(|keys: &[String]| format!("<cite>{}</cite>", keys.join("+")));
        let out = transformer.transform(events);
        assert!(out
            .iter()
            .any(|e| matches!(e, Event::InlineHtml(h) if h.as_ref() == "<cite>doe2020</cite>")));
        assert!(out
            .iter()
            .any(|e| matches!(e, Event::Text(t) if t.as_ref() == " y")));
    }
}
