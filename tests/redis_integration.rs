//! Integration tests for the atomic store scripts against a real Redis.
//!
//! These tests require Docker (via testcontainers) and are skipped in
//! environments without Docker by simply failing at container startup.
//!
//! Run with: `cargo test --test redis_integration`

use relay_gateway::store::StoreClient;

use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

async fn start_redis() -> (StoreClient, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379_u16.tcp())
        .start()
        .await
        .expect("failed to start redis container");

    let host = container.get_host().await.expect("get host");
    let port = container.get_host_port_ipv4(6379).await.expect("get port");
    let url = format!("redis://{host}:{port}");

    let store = StoreClient::connect(&url)
        .await
        .expect("connect to redis");

    (store, container)
}

#[tokio::test]
async fn concurrency_acquire_rejects_once_the_limit_is_reached() {
    let (store, _container) = start_redis().await;
    let set_key = relay_gateway::store::keys::concurrency_set("k1");

    let first: (i64, i64) = store
        .scripts
        .concurrency_acquire
        .key(&set_key)
        .arg("req-1")
        .arg(1i64)
        .arg(1_000i64)
        .arg(60_000i64)
        .invoke_async(&mut store.raw())
        .await
        .unwrap();
    assert_eq!(first, (1, 1));

    let second: (i64, i64) = store
        .scripts
        .concurrency_acquire
        .key(&set_key)
        .arg("req-2")
        .arg(1i64)
        .arg(1_001i64)
        .arg(60_000i64)
        .invoke_async(&mut store.raw())
        .await
        .unwrap();
    assert_eq!(second, (0, 1));
}

#[tokio::test]
async fn concurrency_release_frees_the_slot_for_a_subsequent_acquire() {
    let (store, _container) = start_redis().await;
    let set_key = relay_gateway::store::keys::concurrency_set("k2");

    let _: (i64, i64) = store
        .scripts
        .concurrency_acquire
        .key(&set_key)
        .arg("req-1")
        .arg(1i64)
        .arg(1_000i64)
        .arg(60_000i64)
        .invoke_async(&mut store.raw())
        .await
        .unwrap();

    let _: i64 = store
        .scripts
        .concurrency_release
        .key(&set_key)
        .arg("req-1")
        .invoke_async(&mut store.raw())
        .await
        .unwrap();

    let after: (i64, i64) = store
        .scripts
        .concurrency_acquire
        .key(&set_key)
        .arg("req-2")
        .arg(1i64)
        .arg(1_001i64)
        .arg(60_000i64)
        .invoke_async(&mut store.raw())
        .await
        .unwrap();
    assert_eq!(after, (1, 1));
}

#[tokio::test]
async fn concurrency_release_is_idempotent() {
    let (store, _container) = start_redis().await;
    let set_key = relay_gateway::store::keys::concurrency_set("k3");

    let _: (i64, i64) = store
        .scripts
        .concurrency_acquire
        .key(&set_key)
        .arg("req-1")
        .arg(1i64)
        .arg(1_000i64)
        .arg(60_000i64)
        .invoke_async(&mut store.raw())
        .await
        .unwrap();

    for _ in 0..2 {
        let result: i64 = store
            .scripts
            .concurrency_release
            .key(&set_key)
            .arg("req-1")
            .invoke_async(&mut store.raw())
            .await
            .unwrap();
        assert_eq!(result, 1);
    }
}

#[tokio::test]
async fn queue_head_try_acquire_only_admits_the_head() {
    let (store, _container) = start_redis().await;
    let queue_key = relay_gateway::store::keys::queue_list("k4");
    let set_key = relay_gateway::store::keys::concurrency_set("k4");

    store.rpush(&queue_key, "waiter-1").await.unwrap();
    store.rpush(&queue_key, "waiter-2").await.unwrap();

    // waiter-2 is not at the head, so it must not be admitted even though a
    // slot is free.
    let result: (i64, i64) = store
        .scripts
        .queue_head_try_acquire
        .key(&queue_key)
        .key(&set_key)
        .arg("waiter-2")
        .arg(1i64)
        .arg(1_000i64)
        .arg(60_000i64)
        .invoke_async(&mut store.raw())
        .await
        .unwrap();
    assert_eq!(result, (0, 0));

    let result: (i64, i64) = store
        .scripts
        .queue_head_try_acquire
        .key(&queue_key)
        .key(&set_key)
        .arg("waiter-1")
        .arg(1i64)
        .arg(1_001i64)
        .arg(60_000i64)
        .invoke_async(&mut store.raw())
        .await
        .unwrap();
    assert_eq!(result, (1, 1));

    let remaining = store.llen(&queue_key).await.unwrap();
    assert_eq!(remaining, 1);
}

#[tokio::test]
async fn incr_with_expiry_sets_ttl_only_on_first_increment() {
    let (store, _container) = start_redis().await;
    let counter_key = relay_gateway::store::keys::rate_limit_counter("minute", "k5", "minute", 0);

    let first = store.incr_with_expiry(&counter_key, 60).await.unwrap();
    assert_eq!(first, 1);

    let second = store.incr_with_expiry(&counter_key, 60).await.unwrap();
    assert_eq!(second, 2);
}
