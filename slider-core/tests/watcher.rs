//! Background watcher tests. These touch the real file system and rely on
//! the polling tick as a fallback when change events are slow to arrive.

use slider_core::{
    BibliographyIndex, ChangeWatcher, DeckCatalog, DeckId, DirectiveSyntax, RenderCache,
    RenderOptions, RenderTarget, SlideService,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const BIB: &str = "@misc{doe2020, author = {Doe, Jane}, title = {Slides}, year = {2020}}\n";

fn setup() -> (TempDir, Arc<SlideService>) {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("slides/talk")).unwrap();
    fs::write(dir.path().join("slides/talk/a.md"), "## One\n[@doe2020]\n").unwrap();
    fs::write(dir.path().join("refs.bib"), BIB).unwrap();

    let catalog =
        DeckCatalog::scan(&dir.path().join("slides"), Vec::new(), DirectiveSyntax::default())
            .unwrap();
    let bibliography = BibliographyIndex::load(&dir.path().join("refs.bib")).unwrap();
    let service = SlideService::new(
        Arc::new(catalog),
        Arc::new(bibliography),
        RenderCache::unbounded(),
    );
    (dir, Arc::new(service))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_reloads_changed_bibliography() {
    let (dir, service) = setup();
    let talk = DeckId::parse("talk").unwrap();
    service
        .render(&talk, RenderTarget::Deck, RenderOptions::default())
        .await
        .unwrap();
    assert_eq!(service.cache().len(), 1);

    let handle = ChangeWatcher::new(Arc::clone(&service), Some(dir.path().join("refs.bib")))
        .poll_interval(Some(Duration::from_millis(100)))
        .debounce(Duration::from_millis(10))
        .spawn()
        .unwrap();
    let mut generation = handle.subscribe();

    fs::write(
        dir.path().join("refs.bib"),
        format!("{BIB}@misc{{roe2019, title = {{More}}, year = {{2019}}}}\n"),
    )
    .unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while service.bibliography().version() < 2 {
            generation.changed().await.unwrap();
        }
    })
    .await
    .expect("watcher did not pick up the bibliography change");

    assert!(service.bibliography().lookup("roe2019").is_ok());
    assert!(service.cache().is_empty());
    assert!(handle.generation() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_discovers_new_deck() {
    let (dir, service) = setup();
    let handle = ChangeWatcher::new(Arc::clone(&service), None)
        .poll_interval(Some(Duration::from_millis(100)))
        .debounce(Duration::from_millis(10))
        .spawn()
        .unwrap();
    let mut generation = handle.subscribe();

    fs::create_dir_all(dir.path().join("slides/second")).unwrap();
    fs::write(dir.path().join("slides/second/a.md"), "## Hello\n").unwrap();

    let second = DeckId::parse("second").unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while service.catalog().get(&second).is_none() {
            generation.changed().await.unwrap();
        }
    })
    .await
    .expect("watcher did not pick up the new deck");

    assert_eq!(service.catalog().len(), 2);
}
