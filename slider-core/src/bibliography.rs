//! Bibliography loading and lookup for citation support.
//!
//! The index is versioned: every successful [`BibliographyIndex::reload`]
//! publishes a fresh immutable [`BibSnapshot`] with a higher version. Readers
//! grab the current snapshot and never observe a half-built index.

use hayagriva::{io::from_biblatex_str, types::Person, Entry};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum BibParseError {
    #[error("Failed to read bibliography {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed bibliography: {0}")]
    Syntax(String),

    #[error("Duplicate citation key '{key}' on line {line} (first defined on line {first_line})")]
    DuplicateKey {
        key: String,
        first_line: usize,
        line: usize,
    },
}

/// Lookup failure for a single citation key. Non-fatal during rendering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Citation key '{key}' not found in bibliography")]
pub struct CitationNotFound {
    pub key: String,
}

/// One parsed bibliography record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibEntry {
    key: String,
    fields: Vec<(String, String)>,
    family_names: Vec<String>,
}

impl BibEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: Vec::new(),
            family_names: Vec::new(),
        }
    }

    /// Append a field; later duplicates of the same name are ignored.
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        if self.field(name).is_none() {
            self.fields.push((name.to_string(), value.into()));
        }
        self
    }

    pub fn with_family_names(mut self, names: Vec<String>) -> Self {
        self.family_names = names;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Fields in their canonical order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Family names of the authors (or editors when there are no authors).
    pub fn family_names(&self) -> &[String] {
        &self.family_names
    }

    pub fn year(&self) -> Option<&str> {
        self.field("year")
    }

    fn from_hayagriva(entry: &Entry, entry_type: Option<&str>) -> Self {
        let mut out = BibEntry::new(entry.key());
        if let Some(kind) = entry_type {
            out = out.with_field("type", kind.to_lowercase());
        }

        let people = match (entry.authors(), entry.editors()) {
            (Some(authors), _) if !authors.is_empty() => Some(("author", authors)),
            (_, Some(editors)) if !editors.is_empty() => Some(("editor", editors)),
            _ => None,
        };
        if let Some((role, people)) = people {
            out = out.with_field(role, format_people(people));
            out.family_names = people.iter().map(|p| p.name.clone()).collect();
        }

        if let Some(title) = entry.title() {
            out = out.with_field("title", title.to_string());
        }
        if let Some(parent) = entry.parents().first().and_then(|p| p.title()) {
            out = out.with_field("container", parent.to_string());
        }
        if let Some(date) = entry.date() {
            out = out.with_field("year", date.year.to_string());
        }
        if let Some(publisher) = entry.publisher() {
            if let Some(name) = publisher.name() {
                out = out.with_field("publisher", name.to_string());
            }
            if let Some(location) = publisher.location() {
                out = out.with_field("location", location.to_string());
            }
        }
        if let Some(url) = entry.url() {
            out = out.with_field("url", url.to_string());
        }
        if let Some(doi) = entry.serial_number().and_then(|s| s.0.get("doi")) {
            out = out.with_field("doi", doi.clone());
        }

        out
    }
}

fn format_people(people: &[Person]) -> String {
    let names: Vec<String> = people.iter().map(|p| p.name_first(true, false)).collect();

    match names.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} & {b}"),
        [init @ .., last] => format!("{}, & {}", init.join(", "), last),
    }
}

/// Immutable view of the bibliography at one version.
#[derive(Debug, Default)]
pub struct BibSnapshot {
    version: u64,
    entries: HashMap<String, Arc<BibEntry>>,
    digest: Option<blake3::Hash>,
}

impl BibSnapshot {
    /// Build a snapshot directly, without a backing file.
    pub fn from_entries(version: u64, entries: impl IntoIterator<Item = BibEntry>) -> Self {
        Self {
            version,
            entries: entries
                .into_iter()
                .map(|e| (e.key().to_string(), Arc::new(e)))
                .collect(),
            digest: None,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, key: &str) -> Option<&Arc<BibEntry>> {
        self.entries.get(key)
    }

    pub fn lookup(&self, key: &str) -> Result<Arc<BibEntry>, CitationNotFound> {
        self.entries.get(key).cloned().ok_or_else(|| CitationNotFound {
            key: key.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// BLAKE3 digest of the file this snapshot was parsed from.
    pub fn digest(&self) -> Option<&blake3::Hash> {
        self.digest.as_ref()
    }
}

/// Process-wide bibliography, swapped atomically on reload.
#[derive(Debug)]
pub struct BibliographyIndex {
    current: RwLock<Arc<BibSnapshot>>,
    path: RwLock<Option<PathBuf>>,
}

impl BibliographyIndex {
    /// An index without entries, at version 0.
    pub fn empty() -> Self {
        Self {
            current: RwLock::new(Arc::new(BibSnapshot::default())),
            path: RwLock::new(None),
        }
    }

    /// Startup load; the resulting index is at version 1.
    pub fn load(path: &Path) -> Result<Self, BibParseError> {
        let index = Self::empty();
        index.reload(path)?;
        Ok(index)
    }

    /// Re-read `path` and publish it as the next version.
    ///
    /// On any error the previously published snapshot stays current.
    pub fn reload(&self, path: &Path) -> Result<u64, BibParseError> {
        let bytes = read_bytes(path)?;
        self.publish(path, &bytes)
    }

    /// Reload only when the file content differs from the current snapshot.
    ///
    /// Returns the new version, or `None` when the content is unchanged.
    pub fn reload_if_changed(&self, path: &Path) -> Result<Option<u64>, BibParseError> {
        let bytes = read_bytes(path)?;
        let digest = blake3::hash(&bytes);
        if self.current.read().digest == Some(digest) {
            debug!(path = ?path, "bibliography unchanged");
            return Ok(None);
        }
        self.publish(path, &bytes).map(Some)
    }

    fn publish(&self, path: &Path, bytes: &[u8]) -> Result<u64, BibParseError> {
        let digest = blake3::hash(bytes);
        let text = String::from_utf8_lossy(bytes);
        let entries = parse_bibliography(&text)?
            .into_iter()
            .map(|e| (e.key().to_string(), Arc::new(e)))
            .collect::<HashMap<_, _>>();
        let count = entries.len();

        let version = {
            let mut current = self.current.write();
            let version = current.version + 1;
            *current = Arc::new(BibSnapshot {
                version,
                entries,
                digest: Some(digest),
            });
            version
        };
        *self.path.write() = Some(path.to_path_buf());

        info!(path = ?path, entries = count, version, "bibliography loaded");
        Ok(version)
    }

    pub fn snapshot(&self) -> Arc<BibSnapshot> {
        self.current.read().clone()
    }

    pub fn lookup(&self, key: &str) -> Result<Arc<BibEntry>, CitationNotFound> {
        self.snapshot().lookup(key)
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the most recent successful load.
    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, BibParseError> {
    fs::read(path).map_err(|source| BibParseError::Read {
        path: path.to_path_buf(),
        source,
    })
}

static ENTRY_HEAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@\s*([A-Za-z]+)\s*[{(]\s*([^,\s{}()]+)\s*,").expect("valid entry head regex")
});

/// Scan raw BibLaTeX for `@type{key,` heads. Returns (type, key, line).
fn entry_heads(text: &str) -> Vec<(String, String, usize)> {
    let mut heads = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim_start().starts_with('%') {
            continue;
        }
        for caps in ENTRY_HEAD_RE.captures_iter(line) {
            let kind = caps[1].to_lowercase();
            if matches!(kind.as_str(), "comment" | "string" | "preamble") {
                continue;
            }
            heads.push((kind, caps[2].to_string(), idx + 1));
        }
    }
    heads
}

/// Parse BibLaTeX source into entries, rejecting duplicate keys.
pub fn parse_bibliography(text: &str) -> Result<Vec<BibEntry>, BibParseError> {
    let heads = entry_heads(text);
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut types: HashMap<&str, &str> = HashMap::new();
    for (kind, key, line) in &heads {
        if let Some(first_line) = seen.insert(key.as_str(), *line) {
            return Err(BibParseError::DuplicateKey {
                key: key.clone(),
                first_line,
                line: *line,
            });
        }
        types.insert(key.as_str(), kind.as_str());
    }

    let library = from_biblatex_str(text).map_err(|errors| {
        let joined = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        BibParseError::Syntax(joined)
    })?;

    let entries: Vec<BibEntry> = library
        .iter()
        .map(|entry| BibEntry::from_hayagriva(entry, types.get(entry.key()).copied()))
        .collect();
    debug!(entries = entries.len(), "parsed bibliography");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DOE: &str = r#"
@article{doe2020,
  author = {Doe, Jane and Roe, Richard},
  title = {Caching Slides for Fun and Profit},
  journal = {Journal of Presentations},
  year = {2020},
}
"#;

    fn bib_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_fields_and_family_names() {
        let entries = parse_bibliography(DOE).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.key(), "doe2020");
        assert_eq!(entry.year(), Some("2020"));
        assert_eq!(entry.field("type"), Some("article"));
        assert_eq!(entry.family_names(), ["Doe".to_string(), "Roe".to_string()]);
        assert!(entry.field("title").unwrap().contains("Caching Slides"));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let twice = format!("{DOE}\n{DOE}");
        match parse_bibliography(&twice) {
            Err(BibParseError::DuplicateKey { key, .. }) => assert_eq!(key, "doe2020"),
            other => panic!("expected duplicate key error, got {other:?}"),
        }
    }

    #[test]
    fn commented_heads_are_ignored() {
        let text = format!("% @article{{doe2020,\n{DOE}");
        assert_eq!(parse_bibliography(&text).unwrap().len(), 1);
    }

    #[test]
    fn reload_bumps_version() {
        let file = bib_file(DOE);
        let index = BibliographyIndex::load(file.path()).unwrap();
        assert_eq!(index.version(), 1);
        assert!(index.lookup("doe2020").is_ok());

        assert_eq!(index.reload(file.path()).unwrap(), 2);
        assert_eq!(index.version(), 2);
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let good = bib_file(DOE);
        let index = BibliographyIndex::load(good.path()).unwrap();
        let before = index.snapshot();

        let bad = bib_file(&format!("{DOE}\n{DOE}"));
        assert!(matches!(
            index.reload(bad.path()),
            Err(BibParseError::DuplicateKey { .. })
        ));

        let after = index.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(index.version(), 1);
        assert_eq!(index.path().as_deref(), Some(good.path()));
    }

    #[test]
    fn unchanged_content_is_not_republished() {
        let file = bib_file(DOE);
        let index = BibliographyIndex::load(file.path()).unwrap();
        assert_eq!(index.reload_if_changed(file.path()).unwrap(), None);
        assert_eq!(index.version(), 1);

        std::fs::write(file.path(), format!("{DOE}\n@book{{roe2019, title = {{Other}}, year = {{2019}}}}\n")).unwrap();
        assert_eq!(index.reload_if_changed(file.path()).unwrap(), Some(2));
        assert!(index.lookup("roe2019").is_ok());
    }

    #[test]
    fn missing_key_reports_citation_not_found() {
        let index = BibliographyIndex::empty();
        assert_eq!(
            index.lookup("missing99").unwrap_err(),
            CitationNotFound {
                key: "missing99".into()
            }
        );
        assert_eq!(index.version(), 0);
    }

    #[test]
    fn unreadable_file_is_reported() {
        let index = BibliographyIndex::empty();
        let err = index.reload(Path::new("/nonexistent/slider.bib")).unwrap_err();
        assert!(matches!(err, BibParseError::Read { .. }));
    }
}
