//! Deck discovery and loading.
//!
//! A deck is either a directory holding one or more markdown files (slides
//! are concatenated in file name order) or a single markdown file. Includes
//! and images are expanded at load time, so the deck fingerprint covers every
//! byte that can influence the rendered output.

use crate::directive::{Command, Directive, DirectiveSyntax};
use crate::parser::Fence;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use slider_types::DeckId;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// URL prefix under which files of the slides root are served.
pub const RAW_PREFIX: &str = "/raw/";

const SLIDE_EXTENSIONS: &[&str] = &["md", "markdown"];

#[derive(Error, Debug)]
pub enum DeckError {
    #[error("Slides root {0:?} is not a directory")]
    InvalidRoot(PathBuf),

    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan {path:?}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Deck '{0}' has no slide files")]
    Empty(DeckId),
}

/// BLAKE3 digest of a deck's file list and expanded text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

/// Immutable snapshot of one deck's sources.
#[derive(Debug, Clone)]
pub struct DeckSource {
    id: DeckId,
    path: PathBuf,
    files: Vec<PathBuf>,
    dependencies: Vec<PathBuf>,
    text: Arc<str>,
    fingerprint: Fingerprint,
    loaded_at: DateTime<Utc>,
}

impl DeckSource {
    /// Read the deck at `path` (a directory or a single file) and expand its
    /// `include` and `image` directives.
    pub fn load(
        id: DeckId,
        path: &Path,
        root: &Path,
        include_paths: &[PathBuf],
        syntax: DirectiveSyntax,
    ) -> Result<Self, DeckError> {
        let files = slide_files(path)?;
        if files.is_empty() {
            return Err(DeckError::Empty(id));
        }

        let mut expander = Expander {
            root,
            include_paths,
            syntax,
            stack: Vec::new(),
            dependencies: BTreeSet::new(),
        };
        let mut hasher = blake3::Hasher::new();
        let mut text = String::new();
        for file in &files {
            let name = file.strip_prefix(root).unwrap_or(file);
            hasher.update(name.to_string_lossy().as_bytes());
            hasher.update(&[0]);

            if !text.is_empty() && !text.ends_with("\n\n") {
                text.push('\n');
            }
            let contents = fs::read_to_string(file).map_err(|source| DeckError::Read {
                path: file.clone(),
                source,
            })?;
            expander.expand(file, &contents, &mut text);
        }
        hasher.update(text.as_bytes());

        debug!(deck = %id, files = files.len(), bytes = text.len(), "deck loaded");
        Ok(Self {
            id,
            path: path.to_path_buf(),
            files,
            dependencies: expander.dependencies.into_iter().collect(),
            text: Arc::from(text),
            fingerprint: Fingerprint(*hasher.finalize().as_bytes()),
            loaded_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &DeckId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Slide source files, in concatenation order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Every file read while loading, includes and images among them.
    pub fn dependencies(&self) -> &[PathBuf] {
        &self.dependencies
    }

    /// Source text with includes expanded.
    pub fn text(&self) -> &Arc<str> {
        &self.text
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

struct Expander<'a> {
    root: &'a Path,
    include_paths: &'a [PathBuf],
    syntax: DirectiveSyntax,
    stack: Vec<PathBuf>,
    dependencies: BTreeSet<PathBuf>,
}

impl Expander<'_> {
    fn expand(&mut self, file: &Path, contents: &str, out: &mut String) {
        let canonical = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
        self.dependencies.insert(canonical.clone());
        self.stack.push(canonical);

        let base = file.parent().unwrap_or(self.root).to_path_buf();
        let mut fence: Option<Fence> = None;
        for (idx, line) in contents.lines().enumerate() {
            if let Some(open) = &fence {
                if open.closed_by(line) {
                    fence = None;
                }
                push_line(out, line);
                continue;
            }
            if let Some(open) = Fence::open(line, idx + 1) {
                fence = Some(open);
                push_line(out, line);
                continue;
            }

            match self.syntax.parse_line(line) {
                Some(Directive {
                    command: Command::Include,
                    argument: Some(name),
                }) => self.include(&base, name, out),
                Some(Directive {
                    command: Command::Image,
                    argument: Some(name),
                }) => self.image(&base, name, out),
                _ => push_line(out, line),
            }
        }

        self.stack.pop();
    }

    fn include(&mut self, base: &Path, name: &str, out: &mut String) {
        let Some(path) = self.resolve(base, name) else {
            warn!(include = name, "included file not found");
            push_line(out, &format!("File not found: {name}"));
            return;
        };
        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
        if self.stack.contains(&canonical) {
            warn!(include = name, "recursive include");
            push_line(out, &format!("Recursive include: {name}"));
            return;
        }
        match fs::read_to_string(&path) {
            Ok(contents) => self.expand(&path, &contents, out),
            Err(err) => {
                warn!(include = name, error = %err, "failed to read included file");
                push_line(out, &format!("File not found: {name}"));
            }
        }
    }

    fn image(&mut self, base: &Path, name: &str, out: &mut String) {
        let Some(path) = self.resolve(base, name) else {
            warn!(image = name, "image not found");
            push_line(out, &format!("File not found: {name}"));
            return;
        };
        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.to_path_buf());
        let Ok(relative) = canonical.strip_prefix(&root) else {
            warn!(image = name, "image outside the slides root cannot be served");
            push_line(out, &format!("File not found: {name}"));
            return;
        };

        self.dependencies.insert(canonical.clone());
        let url = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let alt = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        push_line(out, &format!("![{alt}](<{RAW_PREFIX}{url}>)"));
    }

    /// Look next to the including file first, then along the include paths.
    fn resolve(&self, base: &Path, name: &str) -> Option<PathBuf> {
        std::iter::once(base)
            .chain(self.include_paths.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Markdown files that hold slides; `_`-prefixed files are partials meant
/// for inclusion.
fn is_slide_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if is_hidden(&name) || name.starts_with('_') {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SLIDE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn slide_files(path: &Path) -> Result<Vec<PathBuf>, DeckError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let entries = fs::read_dir(path).map_err(|source| DeckError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_slide_file(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Find every deck below `root`: directories with slide files, and slide
/// files placed directly in `root`.
pub fn discover(root: &Path) -> Result<Vec<(DeckId, PathBuf)>, DeckError> {
    if !root.is_dir() {
        return Err(DeckError::InvalidRoot(root.to_path_buf()));
    }

    let mut decks = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry.map_err(|source| DeckError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let Some(id) = DeckId::parse(&relative.to_string_lossy()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            if !slide_files(path)?.is_empty() {
                decks.push((id, path.to_path_buf()));
            }
        } else if entry.depth() == 1 && is_slide_file(path) {
            decks.push((id, path.to_path_buf()));
        }
    }
    Ok(decks)
}

/// What a catalog refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: Vec<DeckId>,
    pub changed: Vec<DeckId>,
    pub removed: Vec<DeckId>,
    pub failed: Vec<DeckId>,
}

impl RefreshSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

type DeckMap = HashMap<DeckId, Arc<DeckSource>>;

/// Every deck under the slides root, swapped atomically on refresh.
#[derive(Debug)]
pub struct DeckCatalog {
    root: PathBuf,
    include_paths: Vec<PathBuf>,
    syntax: DirectiveSyntax,
    decks: RwLock<Arc<DeckMap>>,
}

impl DeckCatalog {
    /// Initial scan. Any deck that fails to load fails the scan.
    pub fn scan(
        root: &Path,
        include_paths: Vec<PathBuf>,
        syntax: DirectiveSyntax,
    ) -> Result<Self, DeckError> {
        let mut decks = DeckMap::new();
        for (id, path) in discover(root)? {
            let deck = DeckSource::load(id.clone(), &path, root, &include_paths, syntax)?;
            decks.insert(id, Arc::new(deck));
        }
        info!(root = ?root, decks = decks.len(), "deck catalog scanned");

        Ok(Self {
            root: root.to_path_buf(),
            include_paths,
            syntax,
            decks: RwLock::new(Arc::new(decks)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    pub fn get(&self, id: &DeckId) -> Option<Arc<DeckSource>> {
        self.decks.read().get(id).cloned()
    }

    /// All decks sorted by id.
    pub fn decks(&self) -> Vec<Arc<DeckSource>> {
        let snapshot = self.decks.read().clone();
        let mut decks: Vec<_> = snapshot.values().cloned().collect();
        decks.sort_by(|a, b| a.id().cmp(b.id()));
        decks
    }

    pub fn len(&self) -> usize {
        self.decks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fingerprints(&self) -> HashSet<Fingerprint> {
        self.decks.read().values().map(|d| d.fingerprint()).collect()
    }

    /// Re-discover and reload every deck, then publish the new set.
    ///
    /// A deck that fails to reload keeps its previous snapshot. Only the
    /// change watcher calls this.
    pub(crate) fn refresh(&self) -> Result<RefreshSummary, DeckError> {
        let previous = self.decks.read().clone();
        let mut next = DeckMap::new();
        let mut summary = RefreshSummary::default();

        for (id, path) in discover(&self.root)? {
            match DeckSource::load(id.clone(), &path, &self.root, &self.include_paths, self.syntax) {
                Ok(deck) => {
                    match previous.get(&id) {
                        None => summary.added.push(id.clone()),
                        Some(old) if old.fingerprint() != deck.fingerprint() => {
                            summary.changed.push(id.clone())
                        }
                        Some(_) => {}
                    }
                    let deck = match previous.get(&id) {
                        Some(old) if old.fingerprint() == deck.fingerprint() => old.clone(),
                        _ => Arc::new(deck),
                    };
                    next.insert(id, deck);
                }
                Err(err) => {
                    warn!(deck = %id, error = %err, "failed to reload deck, keeping previous version");
                    summary.failed.push(id.clone());
                    if let Some(old) = previous.get(&id) {
                        next.insert(id, old.clone());
                    }
                }
            }
        }

        summary.removed = previous
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        summary.removed.sort();

        *self.decks.write() = Arc::new(next);
        if !summary.is_empty() {
            info!(
                added = summary.added.len(),
                changed = summary.changed.len(),
                removed = summary.removed.len(),
                "deck catalog refreshed"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn id(raw: &str) -> DeckId {
        DeckId::parse(raw).unwrap()
    }

    #[test]
    fn discovers_directories_and_files() {
        let root = TempDir::new().unwrap();
        write(root.path(), "talk/01.md", "## One\n");
        write(root.path(), "talk/02.md", "## Two\n");
        write(root.path(), "single.md", "## Solo\n");
        write(root.path(), ".hidden/x.md", "## Hidden\n");
        write(root.path(), "assets/logo.png", "png");

        let ids: Vec<String> = discover(root.path())
            .unwrap()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, vec!["single.md", "talk"]);
    }

    #[test]
    fn directory_files_are_concatenated_in_order() {
        let root = TempDir::new().unwrap();
        write(root.path(), "talk/02.md", "## Two\n");
        write(root.path(), "talk/01.md", "## One\n");
        write(root.path(), "talk/_part.md", "partial\n");

        let deck = DeckSource::load(
            id("talk"),
            &root.path().join("talk"),
            root.path(),
            &[],
            DirectiveSyntax::Html,
        )
        .unwrap();
        assert_eq!(deck.files().len(), 2);
        assert_eq!(&**deck.text(), "## One\n\n## Two\n");
    }

    #[test]
    fn includes_are_expanded_and_tracked() {
        let root = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        write(root.path(), "talk/01.md", "## One\n<!-- include _part.md -->\n<!-- include common.md -->\n");
        write(root.path(), "talk/_part.md", "local part\n");
        write(shared.path(), "common.md", "shared part\n");

        let deck = DeckSource::load(
            id("talk"),
            &root.path().join("talk"),
            root.path(),
            &[shared.path().to_path_buf()],
            DirectiveSyntax::Html,
        )
        .unwrap();
        assert_eq!(&**deck.text(), "## One\nlocal part\nshared part\n");
        assert_eq!(deck.dependencies().len(), 3);
    }

    #[test]
    fn recursive_and_missing_includes_become_text() {
        let root = TempDir::new().unwrap();
        write(root.path(), "talk/01.md", "<!-- include _loop.md -->\n<!-- include nope.md -->\n");
        write(root.path(), "talk/_loop.md", "loop\n<!-- include _loop.md -->\n");

        let deck = DeckSource::load(
            id("talk"),
            &root.path().join("talk"),
            root.path(),
            &[],
            DirectiveSyntax::Html,
        )
        .unwrap();
        assert_eq!(
            &**deck.text(),
            "loop\nRecursive include: _loop.md\nFile not found: nope.md\n"
        );
    }

    #[test]
    fn includes_inside_fences_are_literal() {
        let root = TempDir::new().unwrap();
        write(root.path(), "deck.md", "```\n<!-- include x.md -->\n```\n");
        let deck = DeckSource::load(
            id("deck.md"),
            &root.path().join("deck.md"),
            root.path(),
            &[],
            DirectiveSyntax::Html,
        )
        .unwrap();
        assert_eq!(&**deck.text(), "```\n<!-- include x.md -->\n```\n");
    }

    #[test]
    fn images_link_to_raw_files() {
        let root = TempDir::new().unwrap();
        write(root.path(), "talk/01.md", "<!-- image img/logo.png -->\n");
        write(root.path(), "talk/img/logo.png", "png");
        let deck = DeckSource::load(
            id("talk"),
            &root.path().join("talk"),
            root.path(),
            &[],
            DirectiveSyntax::Html,
        )
        .unwrap();
        assert_eq!(&**deck.text(), "![logo](</raw/talk/img/logo.png>)\n");
    }

    #[test]
    fn fingerprint_follows_content() {
        let root = TempDir::new().unwrap();
        write(root.path(), "deck.md", "## One\n");
        let load = || {
            DeckSource::load(
                id("deck.md"),
                &root.path().join("deck.md"),
                root.path(),
                &[],
                DirectiveSyntax::Html,
            )
            .unwrap()
        };
        let a = load();
        assert_eq!(a.fingerprint(), load().fingerprint());
        write(root.path(), "deck.md", "## Changed\n");
        assert_ne!(a.fingerprint(), load().fingerprint());
    }

    #[test]
    fn refresh_reports_changes_and_keeps_unchanged_snapshots() {
        let root = TempDir::new().unwrap();
        write(root.path(), "a.md", "## A\n");
        write(root.path(), "b.md", "## B\n");
        let catalog = DeckCatalog::scan(root.path(), Vec::new(), DirectiveSyntax::Html).unwrap();
        assert_eq!(catalog.len(), 2);
        let b_before = catalog.get(&id("b.md")).unwrap();

        write(root.path(), "a.md", "## A2\n");
        write(root.path(), "c.md", "## C\n");
        fs::remove_file(root.path().join("b.md")).unwrap();
        write(root.path(), "d/01.md", "## D\n");

        let summary = catalog.refresh().unwrap();
        assert_eq!(summary.added, vec![id("c.md"), id("d")]);
        assert_eq!(summary.changed, vec![id("a.md")]);
        assert_eq!(summary.removed, vec![id("b.md")]);
        assert!(catalog.get(&id("b.md")).is_none());
        assert!(!catalog.fingerprints().contains(&b_before.fingerprint()));
    }

    #[test]
    fn scan_rejects_missing_root() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("nope");
        assert!(matches!(
            DeckCatalog::scan(&missing, Vec::new(), DirectiveSyntax::Html),
            Err(DeckError::InvalidRoot(_))
        ));
    }
}
