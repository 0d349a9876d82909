//! Background poller: the initial pass is retried until it succeeds.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use common::{context, item, item_type, MockRemote, PNG_BYTES};
use workitem_replica::context::AppContext;
use workitem_replica::poller;
use workitem_replica::search;
use workitem_replica_core::store::memory::InMemoryStore;

const ICON: &str = "https://icons.example/bug.png";

async fn find(ctx: &AppContext, query: &str) -> Vec<i64> {
    search::search(&ctx.index, ctx.replica.as_ref(), &ctx.metadata.map(), query, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect()
}

/// Poll `check` every few milliseconds for up to two seconds.
async fn eventually(check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn eventually_found(ctx: &AppContext, query: &str, expected: Vec<i64>) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if find(ctx, query).await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_initial_pass_is_retried_until_the_index_is_built() {
    let store = Arc::new(InMemoryStore::new());
    let remote = Arc::new(MockRemote::new(vec![item(1, 1, "alpha", 100)]));
    remote.set_types(vec![item_type("Bug", ICON, false)]);
    remote.set_icon(ICON, PNG_BYTES);
    remote.fail_with(Some(503));
    let ctx = Arc::new(context(store, remote.clone(), 200).await);

    let (stop, stopped) = oneshot::channel::<()>();
    let poller = tokio::spawn(poller::run_until(
        ctx.clone(),
        Duration::from_millis(20),
        async {
            let _ = stopped.await;
        },
    ));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!ctx.index.is_built());

    remote.fail_with(None);
    remote.touch(item(2, 1, "bravo", 200));

    assert!(eventually(|| ctx.index.is_built()).await);
    assert!(eventually_found(&ctx, "bravo", vec![2]).await);
    assert!(eventually(|| !ctx.metadata.map().is_empty()).await);
    assert_eq!(ctx.index.pending_updates().await, 0);

    let _ = stop.send(());
    poller.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metadata_failure_alone_keeps_retrying_metadata() {
    let store = Arc::new(InMemoryStore::new());
    let remote = Arc::new(MockRemote::new(vec![item(1, 1, "alpha", 100)]));
    // The icon is missing, so metadata sync fails while item sync succeeds.
    remote.set_types(vec![item_type("Bug", ICON, false)]);
    let ctx = Arc::new(context(store, remote.clone(), 200).await);

    let (stop, stopped) = oneshot::channel::<()>();
    let poller = tokio::spawn(poller::run_until(
        ctx.clone(),
        Duration::from_millis(20),
        async {
            let _ = stopped.await;
        },
    ));

    assert!(eventually(|| ctx.index.is_built()).await);
    assert!(eventually(|| MockRemote::count(&remote.calls.types) >= 2).await);
    assert!(ctx.metadata.map().is_empty());

    remote.set_icon(ICON, PNG_BYTES);
    assert!(eventually(|| !ctx.metadata.map().is_empty()).await);

    let _ = stop.send(());
    poller.await.unwrap();
}
