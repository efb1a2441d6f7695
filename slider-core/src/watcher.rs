//! Background change detection for decks and the bibliography.
//!
//! One task owns every write: it reloads the bibliography when its content
//! changes, refreshes the deck catalog, and drops cache entries whose key no
//! longer matches current state. File system events trigger a pass early; a
//! polling tick catches anything the events miss.

use crate::config::WatchConfig;
use crate::deck::RefreshSummary;
use crate::service::SlideService;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// New bibliography version, when it was reloaded
    pub bib_version: Option<u64>,
    pub bib_error: Option<String>,
    pub decks: RefreshSummary,
    pub deck_error: Option<String>,
    pub invalidated: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.bib_version.is_some() || !self.decks.is_empty() || self.invalidated > 0
    }
}

#[derive(Clone)]
pub struct ChangeWatcher {
    service: Arc<SlideService>,
    bib_path: Option<PathBuf>,
    poll_interval: Option<Duration>,
    debounce: Duration,
}

impl ChangeWatcher {
    pub fn new(service: Arc<SlideService>, bib_path: Option<PathBuf>) -> Self {
        Self {
            service,
            bib_path,
            poll_interval: Some(Duration::from_secs(30)),
            debounce: Duration::from_millis(200),
        }
    }

    /// Safety-net rescan period; `None` relies on file events alone.
    pub fn poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_config(self, config: &WatchConfig) -> Self {
        self.poll_interval(config.poll_interval())
            .debounce(config.debounce())
    }

    /// Bring the bibliography, the catalog and the cache up to date with the
    /// file system. Blocking.
    pub fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let bibliography = self.service.bibliography();
        let catalog = self.service.catalog();

        if let Some(path) = &self.bib_path {
            match bibliography.reload_if_changed(path) {
                Ok(version) => report.bib_version = version,
                Err(err) => {
                    warn!(path = ?path, error = %err, "bibliography reload failed, keeping previous version");
                    report.bib_error = Some(err.to_string());
                }
            }
        }

        match catalog.refresh() {
            Ok(summary) => report.decks = summary,
            Err(err) => {
                warn!(error = %err, "deck refresh failed, keeping previous catalog");
                report.deck_error = Some(err.to_string());
            }
        }

        let bib_version = bibliography.version();
        let fingerprints = catalog.fingerprints();
        report.invalidated = self.service.cache().invalidate(|key| {
            key.bib_version < bib_version || !fingerprints.contains(&key.fingerprint)
        });
        let pruned = self.service.prune_documents();
        debug!(invalidated = report.invalidated, pruned, "reconciled");

        report
    }

    /// Start watching. Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<WatcherHandle, notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.send(res);
            },
            notify::Config::default(),
        )?;

        let mut scopes = Vec::new();
        let catalog = self.service.catalog();
        for dir in std::iter::once(catalog.root()).chain(catalog.include_paths().iter().map(PathBuf::as_path)) {
            if dir.is_dir() {
                watcher.watch(dir, RecursiveMode::Recursive)?;
                scopes.push(canonical(dir));
            }
        }
        let bib_file = self.bib_path.as_deref().map(canonical);
        if let Some(parent) = self.bib_path.as_deref().and_then(Path::parent) {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if parent.is_dir() {
                watcher.watch(parent, RecursiveMode::NonRecursive)?;
            }
        }

        let (generation_tx, generation_rx) = watch::channel(0u64);
        let filter = EventFilter { scopes, bib_file };
        let task = tokio::spawn(self.run(event_rx, filter, generation_tx));
        info!("watching for changes");

        Ok(WatcherHandle {
            task,
            generation: generation_rx,
            _watcher: watcher,
        })
    }

    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
        filter: EventFilter,
        generation: watch::Sender<u64>,
    ) {
        let mut ticker = self.poll_interval.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut events_open = true;

        loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(Ok(ev)) => {
                        if !filter.is_relevant(&ev) {
                            continue;
                        }
                        // Debounce a bit by draining pending events
                        time::sleep(self.debounce).await;
                        while events.try_recv().is_ok() {}
                        debug!(paths = ?ev.paths, "change detected");
                    }
                    Some(Err(err)) => {
                        warn!("Watcher error: {}", err);
                        continue;
                    }
                    None => {
                        events_open = false;
                        if ticker.is_none() {
                            break;
                        }
                        continue;
                    }
                },
                _ = tick(&mut ticker) => {}
            }

            let pass = self.clone();
            match tokio::task::spawn_blocking(move || pass.reconcile()).await {
                Ok(report) if report.changed() => {
                    generation.send_modify(|g| *g += 1);
                    info!(
                        bib_version = ?report.bib_version,
                        added = report.decks.added.len(),
                        changed = report.decks.changed.len(),
                        removed = report.decks.removed.len(),
                        invalidated = report.invalidated,
                        generation = *generation.borrow(),
                        "state updated"
                    );
                }
                Ok(_) => {}
                Err(err) => error!("Reconcile task panicked: {}", err),
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

struct EventFilter {
    scopes: Vec<PathBuf>,
    bib_file: Option<PathBuf>,
}

impl EventFilter {
    fn is_relevant(&self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        event.paths.iter().any(|path| {
            self.scopes.iter().any(|scope| path.starts_with(scope))
                || self.bib_file.as_ref().is_some_and(|bib| {
                    path == bib || path.file_name().is_some_and(|n| Some(n) == bib.file_name())
                })
        })
    }
}

/// Keeps the watcher alive; dropping it stops watching.
pub struct WatcherHandle {
    task: JoinHandle<()>,
    generation: watch::Receiver<u64>,
    _watcher: RecommendedWatcher,
}

impl WatcherHandle {
    /// Receiver that changes whenever a pass updated shared state.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.clone()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
