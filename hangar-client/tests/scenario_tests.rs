//! End-to-end scenarios: views subscribing, editing and searching through
//! resource clients that share one engine.

use hangar_client::{ListParams, Lookup};
use hangar_core::{EntityKind, TransportError};
use hangar_sync::{CacheEvent, Freshness, QueryStatus};
use hangar_test_utils::{fixtures, Operation, TestDraft};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn two_views_on_one_list_share_a_fetch() {
    let (engine, _) = fixtures::engine();
    let (clients, transport) = fixtures::client(EntityKind::Client, &engine);
    let empty = ListParams::default();

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    let _sub = clients
        .subscribe_list(&empty, move |event: &CacheEvent| {
            let status = event.entry().map(|e| e.status);
            seen.lock().unwrap().push(status);
        })
        .unwrap();

    let (first, second) = tokio::join!(clients.list(&empty), clients.list(&empty));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(transport.calls(Operation::List), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.len(), 3);
    assert_eq!(
        *events.lock().unwrap(),
        vec![Some(QueryStatus::Loading), Some(QueryStatus::Success)]
    );
}

#[tokio::test(start_paused = true)]
async fn update_then_get_returns_updated_record() {
    let (engine, _) = fixtures::engine();
    let (clients, transport) = fixtures::client(EntityKind::Client, &engine);

    let before = clients.get_by_id("42").await.unwrap();
    assert_eq!(before.found().unwrap().name, "Joao Silva");

    clients
        .update("42", TestDraft::new("Joao Pereira").with_status("vip"))
        .await
        .unwrap();
    let after = clients.get_by_id("42").await.unwrap();

    assert_eq!(transport.calls(Operation::Get), 2);
    let record = after.found().unwrap();
    assert_eq!(record.name, "Joao Pereira");
    assert_eq!(record.status, "vip");
}

#[tokio::test(start_paused = true)]
async fn blank_id_is_disabled_without_fetch() {
    let (engine, _) = fixtures::engine();
    let (clients, transport) = fixtures::client(EntityKind::Client, &engine);

    let lookup = clients.get_by_id("").await.unwrap();
    assert!(matches!(lookup, Lookup::Disabled));
    assert!(clients.get_by_id("  ").await.unwrap().is_disabled());
    assert_eq!(transport.total_calls(), 0);
    assert!(engine.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_previous_data_visible() {
    let (engine, _) = fixtures::engine();
    let (aircraft, transport) = fixtures::client(EntityKind::Aircraft, &engine);
    let params = ListParams::new();

    aircraft.list(&params).await.unwrap();
    for _ in 0..2 {
        transport.fail_next(Operation::List, TransportError::transient(Some(502), "bad gateway"));
    }

    let err = aircraft
        .list_with(&params, Freshness::consistent())
        .await
        .unwrap_err();
    assert!(err.transport().is_some_and(TransportError::is_retryable));

    let entry = engine.store().get(&aircraft.list_key(&params).unwrap()).unwrap();
    assert_eq!(entry.status, QueryStatus::Error);
    assert!(entry.last_error.is_some());
    assert_eq!(aircraft.peek_list(&params).map(|p| p.len()), Some(3));
}

#[tokio::test(start_paused = true)]
async fn stale_list_is_refetched_after_freshness_window() {
    let (engine, _) = fixtures::engine();
    let (products, transport) = fixtures::client(EntityKind::Product, &engine);
    let params = ListParams::new();

    products.list(&params).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    products.list(&params).await.unwrap();
    assert_eq!(transport.calls(Operation::List), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    let read = products
        .list_with(&params, Freshness::best_effort(engine.config().stale_after()))
        .await
        .unwrap();
    assert!(read.was_cache_miss());
    assert_eq!(transport.calls(Operation::List), 2);
}

#[tokio::test(start_paused = true)]
async fn debounced_search_issues_one_list_read() {
    let (engine, _) = fixtures::engine();
    let (clients, transport) = fixtures::client(EntityKind::Client, &engine);
    let mut search = engine.debounced::<String>();

    for term in ["j", "jo", "joa", "joao"] {
        search.input(term.to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let term = search.settled().await.unwrap();
    let page = clients.list(&ListParams::new().search(&term)).await.unwrap();

    assert_eq!(term, "joao");
    assert_eq!(transport.calls(Operation::List), 1);
    assert_eq!(page.items[0].id, "42");
}

#[tokio::test(start_paused = true)]
async fn delete_notifies_detail_subscribers_of_purge() {
    let (engine, sink) = fixtures::engine();
    let (services, _) = fixtures::client(EntityKind::Service, &engine);

    services.get_by_id("43").await.unwrap();
    let purged = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&purged);
    let _sub = services
        .subscribe_detail("43", move |event: &CacheEvent| {
            if matches!(event, CacheEvent::Purged { .. }) {
                *flag.lock().unwrap() = true;
            }
        })
        .unwrap();

    services.delete("43").await.unwrap();
    assert!(*purged.lock().unwrap());
    assert_eq!(sink.last().unwrap().summary(), "Service deleted");
}
