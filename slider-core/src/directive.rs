//! Preprocessor directive lines.
//!
//! A directive occupies a whole line, either as an HTML comment
//! (`<!-- ifdef slides -->`) or, for sources that are not markdown, with a
//! leading hash (`#ifdef slides`). Lines naming anything other than a known
//! command are ordinary content.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static HTML_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*<!--\s*([a-z#]+)(?:\s+(\S+))?\s*-->\s*$").expect("valid html directive regex")
});

static HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#([a-z#]+)(?:\s+(\S+))?\s*$").expect("valid hash directive regex"));

/// Which line syntax marks a directive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveSyntax {
    #[default]
    Html,
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `#`, a comment that is dropped from the output
    Comment,
    Ifdef,
    Ifndef,
    Elifdef,
    Else,
    Endif,
    Page,
    Pause,
    Include,
    Image,
}

impl Command {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "#" => Command::Comment,
            "ifdef" => Command::Ifdef,
            "ifndef" => Command::Ifndef,
            "elifdef" => Command::Elifdef,
            "else" => Command::Else,
            "endif" => Command::Endif,
            "page" => Command::Page,
            "pause" => Command::Pause,
            "include" => Command::Include,
            "image" => Command::Image,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Comment => "#",
            Command::Ifdef => "ifdef",
            Command::Ifndef => "ifndef",
            Command::Elifdef => "elifdef",
            Command::Else => "else",
            Command::Endif => "endif",
            Command::Page => "page",
            Command::Pause => "pause",
            Command::Include => "include",
            Command::Image => "image",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognised directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive<'a> {
    pub command: Command,
    pub argument: Option<&'a str>,
}

impl DirectiveSyntax {
    pub fn parse_line<'a>(&self, line: &'a str) -> Option<Directive<'a>> {
        let re = match self {
            DirectiveSyntax::Html => &*HTML_RE,
            DirectiveSyntax::Hash => &*HASH_RE,
        };
        let caps = re.captures(line)?;
        Some(Directive {
            command: Command::from_name(caps.get(1)?.as_str())?,
            argument: caps.get(2).map(|m| m.as_str()),
        })
    }
}
