//! Built-in stylesheet served at `/static/slider.css`.

/// Stylesheet for slide pages, the deck index and error pages.
pub const STYLESHEET: &str = r#":root {
  --fg: #1d1f21;
  --bg: #ffffff;
  --muted: #6a737d;
  --accent: #0b5cad;
  --warn: #b31d28;
  --rule: #e1e4e8;
}

body.slider {
  margin: 0;
  color: var(--fg);
  background: var(--bg);
  font-family: system-ui, -apple-system, "Segoe UI", Roboto, sans-serif;
  line-height: 1.5;
}

a { color: var(--accent); }
code, pre { font-family: ui-monospace, "SFMono-Regular", Menlo, monospace; }
pre { background: #f6f8fa; padding: 0.75em 1em; overflow-x: auto; }

/* Slides */
section.slide {
  box-sizing: border-box;
  min-height: 100vh;
  padding: 4vh 6vw;
  border-bottom: 1px solid var(--rule);
  font-size: 2.6vh;
}
section.slide h2 { margin-top: 0; font-size: 1.8em; }
section.title-slide {
  display: flex;
  flex-direction: column;
  justify-content: center;
  text-align: center;
}
section.title-slide .title { font-size: 2.6em; margin-bottom: 0.5em; }
section.title-slide .author,
section.title-slide .date { color: var(--muted); }

.slider-slidy section.slide { page-break-after: always; }

.slider-reveal .reveal .slides section.slide {
  min-height: 100vh;
  scroll-snap-align: start;
}
.slider-reveal { scroll-snap-type: y mandatory; overflow-y: scroll; height: 100vh; }

.slider-plain section.slide,
.slider-notes section.slide {
  min-height: 0;
  font-size: 1rem;
  max-width: 50em;
  margin: 0 auto;
}

.slider-slides .incremental { animation: reveal 0.4s ease-in; }
@keyframes reveal { from { opacity: 0; } to { opacity: 1; } }

/* Citations */
.citation a { text-decoration: none; }
.citation-missing {
  color: var(--warn);
  font-weight: bold;
  border-bottom: 1px dotted var(--warn);
}
footer.slide-references {
  margin-top: 2em;
  font-size: 0.6em;
  color: var(--muted);
  border-top: 1px solid var(--rule);
}
section.references ol { font-size: 0.8em; }
section.references li { margin-bottom: 0.4em; }

/* Index and error pages */
main.deck-index,
main.error-page {
  max-width: 50em;
  margin: 3em auto;
  padding: 0 1em;
}
table.decks { width: 100%; border-collapse: collapse; }
table.decks th,
table.decks td { text-align: left; padding: 0.4em 0.6em; border-bottom: 1px solid var(--rule); }
main.deck-index footer { margin-top: 2em; color: var(--muted); font-size: 0.9em; }
main.error-page .message { color: var(--warn); }

@media print {
  section.slide { min-height: 0; border: none; }
}
"#;
