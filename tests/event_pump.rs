mod common;

use common::*;
use mmg_livebind::prelude::*;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

type Greeters = TestCatalog<dyn Greeter>;

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn greeter_props() -> serde_json::Value {
    json!({ "objectClass": "Greeter" })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pump_applies_catalog_events_until_stopped() {
    init_tracing();
    let catalog = Greeters::new();
    let tracker = Tracker::builder("greeters", catalog.as_catalog())
        .filter(Filter::for_interface("Greeter"))
        .build()
        .unwrap();
    let (journal, rec) = recorder();
    tracker.add_listener(rec);
    tracker.activate().unwrap();
    let pump = tracker.spawn_pump(catalog.subscribe());

    let a = catalog.register(greeter_props(), greeter("a"));
    let b = catalog.register(greeter_props(), greeter("b"));
    catalog.register(json!({ "objectClass": "Other" }), greeter("x"));
    catalog.unregister(&a);

    let c = tracker.collection();
    eventually("b to remain alone", || journal.lock().len() == 3).await;
    assert_eq!(member_ids(&c), vec![b.id()]);
    assert_eq!(
        *journal.lock(),
        vec![Seen::Bind(a.id()), Seen::Bind(b.id()), Seen::Unbind(a.id())]
    );

    tracker.stop();
    tokio::time::timeout(Duration::from_secs(5), pump)
        .await
        .expect("pump exits after stop")
        .unwrap();
    assert_eq!(*journal.lock().last().unwrap(), Seen::Unbind(b.id()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pump_finishes_when_source_closes() {
    let catalog = Greeters::new();
    let config = TrackerConfig::list();
    let (tx, rx) = mpsc::channel(config.event_capacity);
    let tracker = Tracker::builder("greeters", catalog.as_catalog())
        .config(config)
        .build()
        .unwrap();
    tracker.activate().unwrap();
    let pump = tracker.spawn_pump(rx);

    let h = catalog.register_silently(greeter_props(), greeter("a"));
    tx.send(CatalogEvent::Arrival(h.clone())).await.unwrap();
    drop(tx);
    pump.await.unwrap();

    assert_eq!(tracker.state(), TrackerState::Active);
    assert_eq!(member_ids(&tracker.collection()), vec![h.id()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn container_drives_trackers_and_registry() {
    init_tracing();
    let catalog = Greeters::new();
    let early = catalog.register_silently(greeter_props(), greeter("early"));

    let mut container = Container::new();
    let (journal, rec) = recorder();
    let events = catalog.subscribe();
    let tracker = container
        .track_with_events(
            Tracker::builder("greeters", catalog.as_catalog())
                .filter(Filter::for_interface("Greeter"))
                .listener(rec),
            events,
        )
        .unwrap();
    assert_eq!(container.len(), 1);
    assert_eq!(tracker.state(), TrackerState::Created);
    assert!(container.registry().is_empty());

    container.start().await.unwrap();
    assert!(container.is_started());
    assert_eq!(tracker.state(), TrackerState::Active);
    let registry = container.registry();
    let info = registry.get(tracker.id()).expect("tracker registered");
    assert_eq!(info.name, "greeters");
    assert_eq!(info.shape, CollectionShape::List);

    let late = catalog.register(greeter_props(), greeter("late"));
    eventually("late arrival", || tracker.collection().len() == 2).await;

    container.stop().await;
    assert!(!container.is_started());
    assert_eq!(tracker.state(), TrackerState::Stopped);
    assert!(registry.is_empty());
    assert!(tracker.collection().is_empty());

    let seen = journal.lock().clone();
    assert_eq!(seen.len(), 4);
    assert_eq!(&seen[..2], &[Seen::Bind(early.id()), Seen::Bind(late.id())]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tracker_added_after_start_is_activated() {
    let catalog = Greeters::new();
    let h = catalog.register_silently(greeter_props(), greeter("a"));
    let mut container = Container::new();
    container.start().await.unwrap();

    let (journal, rec) = recorder();
    let tracker = container
        .track(Tracker::builder("late", catalog.as_catalog()).listener(rec))
        .unwrap();
    assert_eq!(tracker.state(), TrackerState::Active);
    assert_eq!(*journal.lock(), vec![Seen::Bind(h.id())]);
    assert_eq!(container.registry().by_name("late").len(), 1);

    container.stop().await;
    assert_eq!(*journal.lock(), vec![Seen::Bind(h.id()), Seen::Unbind(h.id())]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sender_channel_is_bounded_by_event_capacity() {
    let catalog = Greeters::new();
    let mut container = Container::new();
    let config = TrackerConfig {
        event_capacity: 2,
        ..TrackerConfig::list()
    };
    let (tracker, tx) = container
        .track_with_sender(Tracker::builder("bounded", catalog.as_catalog()).config(config))
        .unwrap();
    assert_eq!(tracker.event_capacity(), 2);
    assert_eq!(tx.max_capacity(), 2);

    // 启动前没有消费者，事件留在通道里
    let a = catalog.register_silently(greeter_props(), greeter("a"));
    let b = catalog.register_silently(greeter_props(), greeter("b"));
    catalog.unregister_silently(&a);
    tx.try_send(CatalogEvent::Arrival(a.clone())).unwrap();
    tx.try_send(CatalogEvent::Departure(a.clone())).unwrap();
    assert!(matches!(
        tx.try_send(CatalogEvent::Arrival(b.clone())),
        Err(mpsc::error::TrySendError::Full(_))
    ));

    container.start().await.unwrap();
    let c = catalog.register_silently(greeter_props(), greeter("c"));
    tx.send(CatalogEvent::Arrival(c.clone())).await.unwrap();
    eventually("c tracked", || member_ids(&tracker.collection()).contains(&c.id())).await;
    assert_eq!(member_ids(&tracker.collection()), vec![b.id(), c.id()]);

    container.stop().await;
    assert!(tracker.collection().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_event_capacity_still_yields_a_usable_channel() {
    let catalog = Greeters::new();
    let tracker = Tracker::builder("tiny", catalog.as_catalog())
        .config(TrackerConfig {
            event_capacity: 0,
            ..TrackerConfig::list()
        })
        .build()
        .unwrap();
    assert_eq!(tracker.event_capacity(), 1);
    tracker.activate().unwrap();
    let (tx, pump) = tracker.spawn_channel_pump();

    let h = catalog.register_silently(greeter_props(), greeter("a"));
    tx.send(CatalogEvent::Arrival(h.clone())).await.unwrap();
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), pump)
        .await
        .expect("pump exits when the sender is dropped")
        .unwrap();
    assert_eq!(member_ids(&tracker.collection()), vec![h.id()]);
}
