//! Slide source parsing.
//!
//! Turns preprocessed deck text into a [`SlideDocument`]: metadata, an ordered
//! list of slides, and the citation keys each slide references. Keys are kept
//! unresolved so one parsed document serves every bibliography version.

use crate::directive::{Command, Directive, DirectiveSyntax};
use crate::frontmatter::{parse_frontmatter, FrontmatterError, Metadata};
use crate::markdown::scan_citations;
use once_cell::sync::Lazy;
use regex::Regex;
use slider_types::{RenderOptions, SLIDES_SYMBOL};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Line marking an incremental reveal inside a slide.
pub const PAUSE_MARKER: &str = ". . .";

/// Deepest heading level that starts a new slide.
const SLIDE_LEVEL: usize = 2;

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]+(.*?))?[ \t]*$").expect("valid heading regex"));

static RULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}-{4,}\s*$").expect("valid rule regex"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlideParseError {
    #[error(transparent)]
    Frontmatter(#[from] FrontmatterError),

    #[error("line {line}: code fence is never closed")]
    UnterminatedFence { line: usize },

    #[error("line {line}: '{command}' block is never closed with 'endif'")]
    UnterminatedConditional { line: usize, command: String },

    #[error("line {line}: '{command}' without a matching 'ifdef'/'ifndef'")]
    UnmatchedDirective { line: usize, command: String },

    #[error("line {line}: directive '{command}' requires an argument")]
    MissingArgument { line: usize, command: String },

    #[error("line {line}: directive '{command}' takes no argument")]
    UnexpectedArgument { line: usize, command: String },
}

/// Problems that do not prevent rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// A citation item with invalid key syntax; it is rendered as text
    MalformedCitation { slide: usize, marker: String },
    /// `include`/`image` reached the parser without going through a deck load
    UnexpandedDirective { line: usize, command: String },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::MalformedCitation { slide, marker } => {
                write!(f, "slide {slide}: malformed citation '{marker}'")
            }
            ParseWarning::UnexpandedDirective { line, command } => {
                write!(f, "line {line}: directive '{command}' was not expanded")
            }
        }
    }
}

/// One slide of a parsed deck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideNode {
    /// 1-based position in the deck
    pub index: usize,
    pub title: Option<String>,
    /// Markdown source of the slide, heading included
    pub content: String,
    /// Referenced citation keys, unique, in order of appearance
    pub citations: Vec<String>,
    /// Source line where the slide starts
    pub line: usize,
}

impl SlideNode {
    pub fn cites(&self, key: &str) -> bool {
        self.citations.iter().any(|k| k == key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlideDocument {
    metadata: Metadata,
    slides: Vec<SlideNode>,
    warnings: Vec<ParseWarning>,
}

impl SlideDocument {
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }

    pub fn slides(&self) -> &[SlideNode] {
        &self.slides
    }

    /// Slide by 1-based index.
    pub fn slide(&self, index: usize) -> Option<&SlideNode> {
        index.checked_sub(1).and_then(|i| self.slides.get(i))
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    /// Every cited key across the deck, in order of first appearance.
    pub fn citation_order(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.slides
            .iter()
            .flat_map(|s| s.citations.iter())
            .filter(|k| seen.insert(k.as_str()))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SlideParser {
    symbols: BTreeSet<String>,
    syntax: DirectiveSyntax,
}

impl Default for SlideParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SlideParser {
    /// A parser with no preprocessor symbols defined.
    pub fn new() -> Self {
        Self {
            symbols: BTreeSet::new(),
            syntax: DirectiveSyntax::default(),
        }
    }

    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect(),
            syntax: DirectiveSyntax::default(),
        }
    }

    pub fn for_options(options: &RenderOptions) -> Self {
        Self::with_symbols(options.effective_symbols())
    }

    pub fn syntax(mut self, syntax: DirectiveSyntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn symbols(&self) -> &BTreeSet<String> {
        &self.symbols
    }

    fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains(&symbol.to_lowercase())
    }

    pub fn parse(&self, raw: &str) -> Result<SlideDocument, SlideParseError> {
        let (metadata, body, consumed) = parse_frontmatter(raw)?;
        let mut state = ParseState::new(self.has_symbol(SLIDES_SYMBOL));

        for (idx, line) in body.lines().enumerate() {
            let lineno = consumed + idx + 1;

            if let Some(fence) = &state.fence {
                let closes = fence.closed_by(line);
                if state.emitting() {
                    state.push(line, lineno);
                }
                if closes {
                    state.fence = None;
                }
                continue;
            }

            if let Some(directive) = self.syntax.parse_line(line) {
                self.apply_directive(&mut state, directive, lineno)?;
                continue;
            }

            if let Some(fence) = Fence::open(line, lineno) {
                state.fence = Some(fence);
                if state.emitting() {
                    state.push(line, lineno);
                }
                continue;
            }

            if !state.emitting() {
                continue;
            }

            if let Some(caps) = HEADING_RE.captures(line) {
                if caps[1].len() <= SLIDE_LEVEL {
                    let title = caps
                        .get(2)
                        .map(|m| m.as_str().trim_end_matches('#').trim().to_string())
                        .filter(|t| !t.is_empty());
                    state.start_slide(title, lineno);
                    state.push(line, lineno);
                    continue;
                }
            }

            if RULE_RE.is_match(line) {
                state.finish_slide();
                continue;
            }

            state.push(line, lineno);
        }

        if let Some(fence) = state.fence {
            return Err(SlideParseError::UnterminatedFence { line: fence.line });
        }
        if let Some(open) = state.conditions.first() {
            return Err(SlideParseError::UnterminatedConditional {
                line: open.line,
                command: open.command.clone(),
            });
        }

        state.finish_slide();
        Ok(state.into_document(metadata))
    }

    fn apply_directive(
        &self,
        state: &mut ParseState,
        directive: Directive<'_>,
        line: usize,
    ) -> Result<(), SlideParseError> {
        let command = directive.command;
        let require_arg = || {
            directive
                .argument
                .ok_or_else(|| SlideParseError::MissingArgument {
                    line,
                    command: command.to_string(),
                })
        };
        let forbid_arg = || match directive.argument {
            Some(_) => Err(SlideParseError::UnexpectedArgument {
                line,
                command: command.to_string(),
            }),
            None => Ok(()),
        };
        let unmatched = || SlideParseError::UnmatchedDirective {
            line,
            command: command.to_string(),
        };

        match command {
            Command::Comment => {}
            Command::Ifdef | Command::Ifndef => {
                let symbol = require_arg()?;
                let truth = self.has_symbol(symbol) == (command == Command::Ifdef);
                let parent = state.emitting();
                state.conditions.push(Condition {
                    parent,
                    taken: truth,
                    else_seen: false,
                    line,
                    command: command.to_string(),
                });
                state.emit = parent && truth;
            }
            Command::Elifdef => {
                let symbol = require_arg()?;
                let truth = self.has_symbol(symbol);
                let cond = state
                    .conditions
                    .last_mut()
                    .filter(|c| !c.else_seen)
                    .ok_or_else(unmatched)?;
                let active = !cond.taken && truth;
                cond.taken |= truth;
                state.emit = cond.parent && active;
            }
            Command::Else => {
                forbid_arg()?;
                let cond = state
                    .conditions
                    .last_mut()
                    .filter(|c| !c.else_seen)
                    .ok_or_else(unmatched)?;
                let active = !cond.taken;
                cond.taken = true;
                cond.else_seen = true;
                state.emit = cond.parent && active;
            }
            Command::Endif => {
                forbid_arg()?;
                let cond = state.conditions.pop().ok_or_else(unmatched)?;
                state.emit = cond.parent;
            }
            Command::Page => {
                forbid_arg()?;
                if state.emitting() && state.slides {
                    state.finish_slide();
                }
            }
            Command::Pause => {
                forbid_arg()?;
                if state.emitting() && state.slides {
                    state.push("", line);
                    state.push(PAUSE_MARKER, line);
                    state.push("", line);
                }
            }
            Command::Include | Command::Image => {
                require_arg()?;
                if state.emitting() {
                    state.warnings.push(ParseWarning::UnexpandedDirective {
                        line,
                        command: command.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Condition {
    /// Whether the enclosing region emits
    parent: bool,
    /// Whether some branch of this block has been selected
    taken: bool,
    else_seen: bool,
    line: usize,
    command: String,
}

/// An open fenced code block.
#[derive(Debug, Clone)]
pub(crate) struct Fence {
    marker: char,
    width: usize,
    line: usize,
}

impl Fence {
    pub(crate) fn open(line: &str, lineno: usize) -> Option<Self> {
        let trimmed = line.trim_start_matches(' ');
        if line.len() - trimmed.len() > 3 {
            return None;
        }
        let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
        let width = trimmed.chars().take_while(|c| *c == marker).count();
        (width >= 3).then_some(Fence {
            marker,
            width,
            line: lineno,
        })
    }

    pub(crate) fn closed_by(&self, line: &str) -> bool {
        let trimmed = line.trim();
        let width = trimmed.chars().take_while(|c| *c == self.marker).count();
        width >= self.width && trimmed.chars().all(|c| c == self.marker)
    }
}

#[derive(Debug, Default)]
struct PendingSlide {
    title: Option<String>,
    lines: Vec<String>,
    line: usize,
}

#[derive(Debug)]
struct ParseState {
    slides: bool,
    emit: bool,
    conditions: Vec<Condition>,
    fence: Option<Fence>,
    current: PendingSlide,
    finished: Vec<SlideNode>,
    warnings: Vec<ParseWarning>,
}

impl ParseState {
    fn new(slides: bool) -> Self {
        Self {
            slides,
            emit: true,
            conditions: Vec::new(),
            fence: None,
            current: PendingSlide::default(),
            finished: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn emitting(&self) -> bool {
        self.emit
    }

    fn push(&mut self, line: &str, lineno: usize) {
        if self.current.lines.is_empty() && self.current.title.is_none() {
            if line.trim().is_empty() {
                return;
            }
            self.current.line = lineno;
        }
        self.current.lines.push(line.to_string());
    }

    fn start_slide(&mut self, title: Option<String>, lineno: usize) {
        self.finish_slide();
        self.current = PendingSlide {
            title,
            lines: Vec::new(),
            line: lineno,
        };
    }

    fn finish_slide(&mut self) {
        let pending = std::mem::take(&mut self.current);
        let content = pending.lines.join("\n").trim_matches('\n').trim_end().to_string();
        if pending.title.is_none() && content.trim().is_empty() {
            return;
        }

        let index = self.finished.len() + 1;
        let scan = scan_citations(&content);
        for marker in scan.malformed {
            self.warnings
                .push(ParseWarning::MalformedCitation { slide: index, marker });
        }
        self.finished.push(SlideNode {
            index,
            title: pending.title,
            content,
            citations: scan.keys,
            line: pending.line,
        });
    }

    fn into_document(self, metadata: Metadata) -> SlideDocument {
        SlideDocument {
            metadata,
            slides: self.finished,
            warnings: self.warnings,
        }
    }
}
