//! Content-addressed render cache with single-flight rendering
//!
//! Entries are keyed by everything that determines the rendered bytes, so an
//! entry never goes wrong, it only goes unused. Concurrent requests for the
//! same missing key share one render.

use crate::deck::Fingerprint;
use crate::render::RenderOutput;
use blake3::Hasher;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use slider_types::{RenderOptions, RenderTarget};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::debug;

/// Identity of one rendered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub fingerprint: Fingerprint,
    pub bib_version: u64,
    pub options: RenderOptions,
    pub target: RenderTarget,
}

impl RenderKey {
    pub fn new(
        fingerprint: Fingerprint,
        bib_version: u64,
        options: RenderOptions,
        target: RenderTarget,
    ) -> Self {
        Self {
            fingerprint,
            bib_version,
            options,
            target,
        }
    }

    /// Blake3 digest of the key components
    pub fn digest(&self) -> blake3::Hash {
        let mut hasher = Hasher::new();
        hasher.update(self.fingerprint.as_bytes());
        hasher.update(&self.bib_version.to_le_bytes());
        hasher.update(self.options.canonical().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.target.to_string().as_bytes());
        hasher.finalize()
    }

    /// Quoted digest, usable as an HTTP entity tag.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.digest().to_hex())
    }
}

/// A cached render, replaced wholesale and never mutated.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub output: Arc<RenderOutput>,

    /// When the render finished
    pub created_at: DateTime<Utc>,
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    /// Callers that awaited a render started by someone else
    pub joined: u64,
    pub renders: u64,
    pub failures: u64,
    pub invalidated: u64,
}

impl CacheStats {
    /// Get cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.joined;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} in flight, {} hits / {} misses / {} joined ({:.1}% hit rate), {} renders, {} failures",
            self.entries,
            self.in_flight,
            self.hits,
            self.misses,
            self.joined,
            self.hit_rate() * 100.0,
            self.renders,
            self.failures
        )
    }
}

type SharedRender<E> = Shared<BoxFuture<'static, Result<Arc<RenderOutput>, E>>>;

struct Inner<E> {
    entries: Mutex<LruCache<RenderKey, CacheEntry>>,
    /// Lock order: `in_flight` before `entries`
    in_flight: Mutex<HashMap<RenderKey, SharedRender<E>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    renders: AtomicU64,
    failures: AtomicU64,
    invalidated: AtomicU64,
}

impl<E> Inner<E> {
    fn complete(&self, key: &RenderKey, result: &Result<Arc<RenderOutput>, E>) {
        let mut in_flight = self.in_flight.lock();
        match result {
            Ok(output) => {
                self.entries.lock().put(
                    key.clone(),
                    CacheEntry {
                        output: Arc::clone(output),
                        created_at: Utc::now(),
                    },
                );
                self.renders.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        in_flight.remove(key);
    }
}

/// Process-wide render cache. Clones share the same storage.
pub struct RenderCache<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for RenderCache<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> RenderCache<E>
where
    E: Clone + Send + Sync + 'static + From<JoinError>,
{
    /// Cache without an entry bound.
    pub fn unbounded() -> Self {
        Self::from_lru(LruCache::unbounded())
    }

    /// Cache that evicts the least recently used entry beyond `capacity`.
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self::from_lru(LruCache::new(capacity))
    }

    /// Bounded when `capacity` is a positive number, unbounded otherwise.
    pub fn new(capacity: Option<usize>) -> Self {
        match capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => Self::with_capacity(capacity),
            None => Self::unbounded(),
        }
    }

    fn from_lru(entries: LruCache<RenderKey, CacheEntry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(entries),
                in_flight: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                joined: AtomicU64::new(0),
                renders: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                invalidated: AtomicU64::new(0),
            }),
        }
    }

    pub fn get(&self, key: &RenderKey) -> Option<CacheEntry> {
        self.inner.entries.lock().get(key).cloned()
    }

    /// Cached output for `key`, counted as a hit when present.
    pub fn lookup(&self, key: &RenderKey) -> Option<Arc<RenderOutput>> {
        let entry = self.get(key)?;
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.output)
    }

    /// Return the cached output for `key`, rendering it on a miss.
    ///
    /// The render runs on its own task: dropping the returned future does not
    /// cancel it, and every concurrent caller for the same key awaits the
    /// same result. Failures reach all waiters and are not cached.
    pub async fn get_or_render<F, Fut>(
        &self,
        key: RenderKey,
        render_fn: F,
    ) -> Result<Arc<RenderOutput>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RenderOutput, E>> + Send + 'static,
    {
        if let Some(output) = self.lookup(&key) {
            return Ok(output);
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock();
            // The render may have finished between the check above and taking
            // the lock.
            if let Some(entry) = self.inner.entries.lock().get(&key).cloned() {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.output);
            }

            match in_flight.get(&key) {
                Some(pending) => {
                    self.inner.joined.fetch_add(1, Ordering::Relaxed);
                    pending.clone()
                }
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(etag = %key.etag(), target = %key.target, "rendering");

                    let render = tokio::spawn(render_fn());
                    let inner = Arc::clone(&self.inner);
                    let task_key = key.clone();
                    let completion = tokio::spawn(async move {
                        let result = match render.await {
                            Ok(result) => result.map(Arc::new),
                            Err(err) => Err(E::from(err)),
                        };
                        inner.complete(&task_key, &result);
                        result
                    });

                    let pending: SharedRender<E> = async move {
                        match completion.await {
                            Ok(result) => result,
                            Err(err) => Err(E::from(err)),
                        }
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };

        shared.await
    }

    /// Drop every entry `is_stale` selects. Returns how many were removed.
    pub fn invalidate<P>(&self, is_stale: P) -> usize
    where
        P: Fn(&RenderKey) -> bool,
    {
        let mut entries = self.inner.entries.lock();
        let stale: Vec<RenderKey> = entries
            .iter()
            .filter(|(key, _)| is_stale(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        self.inner
            .invalidated
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        stale.len()
    }

    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let in_flight = self.inner.in_flight.lock().len();
        CacheStats {
            entries: self.len(),
            in_flight,
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            joined: self.inner.joined.load(Ordering::Relaxed),
            renders: self.inner.renders.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            invalidated: self.inner.invalidated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Failed,
        Task(String),
    }

    impl From<JoinError> for TestError {
        fn from(err: JoinError) -> Self {
            TestError::Task(err.to_string())
        }
    }

    fn key(byte: u8, bib_version: u64) -> RenderKey {
        RenderKey::new(
            Fingerprint::from_bytes([byte; 32]),
            bib_version,
            RenderOptions::default(),
            RenderTarget::Deck,
        )
    }

    fn output(html: &str) -> RenderOutput {
        RenderOutput::new(html, Vec::new(), 1)
    }

    #[test]
    fn key_digest_covers_every_component() {
        let base = key(1, 1);
        assert_eq!(base.etag(), key(1, 1).etag());
        assert_ne!(base.etag(), key(2, 1).etag());
        assert_ne!(base.etag(), key(1, 2).etag());

        let mut slide = base.clone();
        slide.target = RenderTarget::Slide(1);
        assert_ne!(base.etag(), slide.etag());

        let mut strict = base.clone();
        strict.options.strict_citations = true;
        assert_ne!(base.etag(), strict.etag());
    }

    #[tokio::test]
    async fn hit_does_not_call_render_fn() {
        let cache: RenderCache<TestError> = RenderCache::unbounded();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let out = cache
                .get_or_render(key(1, 1), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(output("<p>a</p>"))
                })
                .await
                .unwrap();
            assert_eq!(out.html(), "<p>a</p>");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.misses, stats.hits, stats.renders), (1, 2, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_render() {
        let cache: RenderCache<TestError> = RenderCache::unbounded();
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_render(key(7, 1), move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(output("shared"))
                        })
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let outputs: Vec<Arc<RenderOutput>> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outputs.iter().all(|o| Arc::ptr_eq(o, &outputs[0])));
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn different_keys_render_independently() {
        let cache: RenderCache<TestError> = RenderCache::unbounded();
        let (a, b) = futures::join!(
            cache.get_or_render(key(1, 1), || async { Ok(output("a")) }),
            cache.get_or_render(key(2, 1), || async { Ok(output("b")) }),
        );
        assert_eq!(a.unwrap().html(), "a");
        assert_eq!(b.unwrap().html(), "b");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn failures_reach_all_waiters_and_are_not_cached() {
        let cache: RenderCache<TestError> = RenderCache::unbounded();
        let (a, b) = futures::join!(
            cache.get_or_render(key(3, 1), || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(TestError::Failed)
            }),
            cache.get_or_render(key(3, 1), || async { Ok(output("never")) }),
        );
        assert_eq!(a.unwrap_err(), TestError::Failed);
        assert_eq!(b.unwrap_err(), TestError::Failed);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().in_flight, 0);

        let retry = cache
            .get_or_render(key(3, 1), || async { Ok(output("ok")) })
            .await
            .unwrap();
        assert_eq!(retry.html(), "ok");
    }

    #[tokio::test]
    async fn panicking_render_is_reported() {
        let cache: RenderCache<TestError> = RenderCache::unbounded();
        let result = cache
            .get_or_render(key(4, 1), || async {
                if true {
                    panic!("render blew up");
                }
                Ok(output("unreachable"))
            })
            .await;
        assert!(matches!(result, Err(TestError::Task(_))));
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_render() {
        let cache: RenderCache<TestError> = RenderCache::unbounded();
        let slow = cache.get_or_render(key(5, 1), || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(output("finished"))
        });
        assert!(tokio::time::timeout(Duration::from_millis(5), slow)
            .await
            .is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let entry = cache.get(&key(5, 1)).expect("render completed");
        assert_eq!(entry.output.html(), "finished");
    }

    #[tokio::test]
    async fn invalidate_drops_selected_entries() {
        let cache: RenderCache<TestError> = RenderCache::unbounded();
        for (byte, version) in [(1, 1), (2, 1), (1, 2)] {
            cache
                .get_or_render(key(byte, version), || async { Ok(output("x")) })
                .await
                .unwrap();
        }

        let removed = cache.invalidate(|k| k.bib_version < 2);
        assert_eq!(removed, 2);
        assert!(cache.get(&key(1, 2)).is_some());
        assert!(cache.get(&key(1, 1)).is_none());
        assert_eq!(cache.stats().invalidated, 2);
    }

    #[tokio::test]
    async fn capacity_bounds_entries() {
        let cache: RenderCache<TestError> = RenderCache::new(Some(1));
        for byte in [1, 2] {
            cache
                .get_or_render(key(byte, 1), || async { Ok(output("x")) })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key(2, 1)).is_some());
    }
}
