use std::sync::Arc;
use std::time::Duration;

use folio_render::config::ThumbnailSettings;
use folio_render::events::{PageView, Phase};
use folio_render::render::queue::RenderQueue;
use folio_render::tasks::controller::{Callback, Services};
use folio_render::tasks::thumbnails::{self, ThumbnailProps};
use folio_render::testkit::{ScriptedEngine, StaticSource, loader};
use tokio_util::sync::CancellationToken;

fn props(url: &str, max_pages: Option<usize>) -> ThumbnailProps {
    ThumbnailProps {
        file_url: url.into(),
        file_name: format!("{url}.pdf"),
        max_pages,
    }
}

fn noop() -> Callback {
    Arc::new(|| {})
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_failing_page_leaves_the_rest() {
    let engine = ScriptedEngine::new().failing_page(3);
    let queue = RenderQueue::new();
    let cancel = CancellationToken::new();
    let worker = queue.spawn(cancel.clone());
    let services = Services::new(
        queue,
        loader(StaticSource::new().with_document("mem://five", 5), &engine),
    );

    let set = thumbnails::mount(
        &services,
        &ThumbnailSettings::default(),
        props("mem://five", Some(5)),
        noop(),
        None,
    );
    let state = tokio::time::timeout(Duration::from_secs(5), set.settled())
        .await
        .expect("thumbnails never settled")
        .unwrap();

    assert_eq!(state.phase, Phase::Ready);
    assert_eq!(state.rendered(), 4);
    assert_eq!(state.unavailable(), 1);
    match &state.slots[2].view {
        PageView::Unavailable(message) => assert!(message.contains("page 3"), "{message}"),
        other => panic!("page 3 should be unavailable, got {other:?}"),
    }
    assert!(state.slots[3].png().is_some());

    set.unmount().await;
    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_sets_share_one_engine_slot() {
    let engine = ScriptedEngine::new().with_render_delay(Duration::from_millis(5));
    let probe = engine.probe();
    let queue = RenderQueue::new();
    let cancel = CancellationToken::new();
    let worker = queue.spawn(cancel.clone());
    let source = StaticSource::new()
        .with_document("mem://a", 3)
        .with_document("mem://b", 7)
        .with_pages("mem://c", &[(842, 595)]);
    let services = Services::new(queue, loader(source, &engine));
    let settings = ThumbnailSettings::default();

    let sets: Vec<_> = ["mem://a", "mem://b", "mem://c"]
        .into_iter()
        .map(|url| thumbnails::mount(&services, &settings, props(url, None), noop(), None))
        .collect();
    let states = tokio::time::timeout(
        Duration::from_secs(5),
        futures::future::join_all(sets.iter().map(|set| set.settled())),
    )
    .await
    .expect("thumbnail sets never settled");

    let rendered: Vec<usize> = states.iter().map(|s| s.as_ref().unwrap().rendered()).collect();
    assert_eq!(rendered, vec![3, 5, 1]);
    assert_eq!(probe.max_concurrent(), 1);

    for set in sets {
        set.unmount().await;
    }
    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unmount_cancels_queued_thumbnails() {
    let engine = ScriptedEngine::new();
    let probe = engine.probe();
    let queue = RenderQueue::new();
    let services = Services::new(
        queue.clone(),
        loader(StaticSource::new().with_document("mem://a", 4), &engine),
    );
    let set = thumbnails::mount(
        &services,
        &ThumbnailSettings::default(),
        props("mem://a", None),
        noop(),
        None,
    );
    // queue not running yet: jobs pile up
    set.wait_until(|s| s.phase == Phase::Rendering).await.unwrap();
    assert_eq!(queue.pending_len(), 4);
    set.unmount().await;
    assert_eq!(queue.pending_len(), 0);

    let cancel = CancellationToken::new();
    let worker = queue.spawn(cancel.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(probe.started().is_empty());
    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_source_replaces_the_document() {
    let engine = ScriptedEngine::new();
    let queue = RenderQueue::new();
    let cancel = CancellationToken::new();
    let worker = queue.spawn(cancel.clone());
    let services = Services::new(
        queue,
        loader(
            StaticSource::new()
                .with_document("mem://old", 2)
                .with_document("mem://new", 1),
            &engine,
        ),
    );
    let set = thumbnails::mount(
        &services,
        &ThumbnailSettings::default(),
        props("mem://old", None),
        noop(),
        None,
    );
    set.settled().await.unwrap();
    set.set_source("mem://new").await;
    let state = set
        .wait_until(|s| s.source == "mem://new" && s.phase == Phase::Ready)
        .await
        .unwrap();
    assert_eq!(state.page_count, Some(1));
    assert_eq!(state.slots.len(), 1);

    set.unmount().await;
    cancel.cancel();
    worker.await.unwrap();
}
