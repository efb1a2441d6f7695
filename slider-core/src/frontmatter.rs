//! Deck metadata: YAML front matter or a pandoc `%` title block.

use serde_yaml::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Flat metadata map used for `%{name}` substitution and page titles.
pub type Metadata = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrontmatterError {
    #[error("Front matter opened on line 1 is never closed")]
    Unterminated,

    #[error("Invalid YAML front matter: {0}")]
    InvalidYaml(String),
}

/// Split leading metadata off `content`.
///
/// Returns the metadata, the remaining body, and the number of lines consumed
/// so callers can report body line numbers relative to the source.
///
/// ```
/// use slider_core::frontmatter::parse_frontmatter;
///
/// let (meta, body, consumed) =
///     parse_frontmatter("---\ntitle: Caching\n---\n## First\n").unwrap();
/// assert_eq!(meta["title"], "Caching");
/// assert_eq!(body, "## First\n");
/// assert_eq!(consumed, 3);
/// ```
pub fn parse_frontmatter(content: &str) -> Result<(Metadata, &str, usize), FrontmatterError> {
    let first = content.lines().next().unwrap_or_default();
    if first.trim_end() == "---" {
        return parse_yaml_block(content);
    }
    if first.starts_with('%') {
        return Ok(parse_title_block(content));
    }
    Ok((Metadata::new(), content, 0))
}

fn parse_yaml_block(content: &str) -> Result<(Metadata, &str, usize), FrontmatterError> {
    let mut offset = 0;
    let mut yaml_start = None;
    for (idx, line) in content.split_inclusive('\n').enumerate() {
        let next = offset + line.len();
        if idx == 0 {
            yaml_start = Some(next);
        } else if matches!(line.trim_end(), "---" | "...") {
            let start = yaml_start.unwrap_or(next);
            let yaml = &content[start..offset];
            let metadata = yaml_to_metadata(yaml)?;
            return Ok((metadata, &content[next..], idx + 1));
        }
        offset = next;
    }
    Err(FrontmatterError::Unterminated)
}

fn yaml_to_metadata(yaml: &str) -> Result<Metadata, FrontmatterError> {
    if yaml.trim().is_empty() {
        return Ok(Metadata::new());
    }

    let value: Value =
        serde_yaml::from_str(yaml).map_err(|e| FrontmatterError::InvalidYaml(e.to_string()))?;
    let Value::Mapping(mapping) = value else {
        return Err(FrontmatterError::InvalidYaml(
            "front matter must be a mapping".to_string(),
        ));
    };

    let mut metadata = Metadata::new();
    for (key, value) in mapping {
        let Some(key) = scalar_to_string(&key) else {
            continue;
        };
        let rendered = match &value {
            Value::Sequence(items) => Some(
                items
                    .iter()
                    .filter_map(scalar_to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            other => scalar_to_string(other),
        };
        if let Some(rendered) = rendered {
            metadata.insert(key, rendered);
        }
    }
    Ok(metadata)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Pandoc title block: up to three leading `%` lines (title, author, date).
fn parse_title_block(content: &str) -> (Metadata, &str, usize) {
    let mut metadata = Metadata::new();
    let mut offset = 0;
    let mut consumed = 0;
    for (line, name) in content
        .split_inclusive('\n')
        .zip(["title", "author", "date"])
    {
        let Some(value) = line.strip_prefix('%') else {
            break;
        };
        let value = value.trim();
        if !value.is_empty() {
            metadata.insert(name.to_string(), value.to_string());
        }
        offset += line.len();
        consumed += 1;
    }
    (metadata, &content[offset..], consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_front_matter() {
        let content = "---\ntitle: Caching\nyear: 2026\ntags:\n  - rust\n  - slides\n---\nBody\n";
        let (meta, body, consumed) = parse_frontmatter(content).unwrap();
        assert_eq!(meta["title"], "Caching");
        assert_eq!(meta["year"], "2026");
        assert_eq!(meta["tags"], "rust, slides");
        assert_eq!(body, "Body\n");
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_dots_close_front_matter() {
        let (meta, body, _) = parse_frontmatter("---\ntitle: T\n...\nBody").unwrap();
        assert_eq!(meta["title"], "T");
        assert_eq!(body, "Body");
    }

    #[test]
    fn test_unterminated() {
        assert_eq!(
            parse_frontmatter("---\ntitle: T\n\n## Slide\n"),
            Err(FrontmatterError::Unterminated)
        );
    }

    #[test]
    fn test_invalid_yaml() {
        let result = parse_frontmatter("---\ntitle: [unclosed\n---\n");
        assert!(matches!(result, Err(FrontmatterError::InvalidYaml(_))));
    }

    #[test]
    fn test_title_block() {
        let (meta, body, consumed) =
            parse_frontmatter("% Caching\n% Jane Doe\n% 2026\n\n## One\n").unwrap();
        assert_eq!(meta["title"], "Caching");
        assert_eq!(meta["author"], "Jane Doe");
        assert_eq!(meta["date"], "2026");
        assert_eq!(body, "\n## One\n");
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_no_metadata() {
        let (meta, body, consumed) = parse_frontmatter("## One\n").unwrap();
        assert!(meta.is_empty());
        assert_eq!(body, "## One\n");
        assert_eq!(consumed, 0);
    }
}
