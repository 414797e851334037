//! End-to-end cache semantics over a real negotiated connection.

mod common;

use bytes::Bytes;
use common::{connect_client, identity, start_node, wait_until};
use std::time::Duration;
use vncache::CacheConfig;

#[tokio::test]
async fn basic_roundtrip() {
    vncache::dev_tracing::init_tracing();
    let (keys, public) = identity();
    let node = start_node(CacheConfig::new("roundtrip-node"), &[&public], &[]).await;
    let client = connect_client(&keys, &node).await;

    client
        .upsert("user:1", Bytes::from_static(b"alpha"))
        .await
        .expect("upsert");
    assert_eq!(
        client.get("user:1").await.expect("get"),
        Some(Bytes::from_static(b"alpha"))
    );
    assert!(client.delete("user:1").await.expect("delete"));
    assert_eq!(client.get("user:1").await.expect("get after delete"), None);

    client.close();
    node.shutdown().await;
}

#[tokio::test]
async fn rename_preserves_value() {
    let (keys, public) = identity();
    let node = start_node(CacheConfig::new("rename-node"), &[&public], &[]).await;
    let client = connect_client(&keys, &node).await;

    client
        .upsert("key-x", Bytes::from_static(b"v1"))
        .await
        .expect("seed");
    client
        .rename("key-x", "key-y", Bytes::from_static(b"v1"))
        .await
        .expect("rename");

    assert_eq!(client.get("key-x").await.unwrap(), None);
    assert_eq!(
        client.get("key-y").await.unwrap(),
        Some(Bytes::from_static(b"v1"))
    );
    // Deleting the old name reports nf, the new name ok.
    assert!(!client.delete("key-x").await.unwrap());
    assert!(client.delete("key-y").await.unwrap());

    client.close();
    node.shutdown().await;
}

#[tokio::test]
async fn rename_into_occupied_key_is_refused() {
    let (keys, public) = identity();
    let node = start_node(CacheConfig::new("conflict-node"), &[&public], &[]).await;
    let client = connect_client(&keys, &node).await;

    client
        .upsert("src-key", Bytes::from_static(b"a"))
        .await
        .unwrap();
    client
        .upsert("dst-key", Bytes::from_static(b"b"))
        .await
        .unwrap();
    assert!(client
        .rename("src-key", "dst-key", Bytes::from_static(b"c"))
        .await
        .is_err());
    // Both entries survive the refused rename.
    assert_eq!(
        client.get("src-key").await.unwrap(),
        Some(Bytes::from_static(b"a"))
    );
    assert_eq!(
        client.get("dst-key").await.unwrap(),
        Some(Bytes::from_static(b"b"))
    );

    client.close();
    node.shutdown().await;
}

#[tokio::test]
async fn lru_eviction_in_single_bucket() {
    let (keys, public) = identity();
    let config = CacheConfig::new("lru-node").with_buckets(1).with_max_cache(2);
    let node = start_node(config, &[&public], &[]).await;
    let client = connect_client(&keys, &node).await;

    client.upsert("aaaa", Bytes::from_static(b"A")).await.unwrap();
    client.upsert("bbbb", Bytes::from_static(b"B")).await.unwrap();
    // Touch `aaaa` so `bbbb` is the eviction candidate.
    assert!(client.get("aaaa").await.unwrap().is_some());
    client.upsert("cccc", Bytes::from_static(b"C")).await.unwrap();

    assert_eq!(client.get("bbbb").await.unwrap(), None);
    assert_eq!(
        client.get("aaaa").await.unwrap(),
        Some(Bytes::from_static(b"A"))
    );
    assert_eq!(
        client.get("cccc").await.unwrap(),
        Some(Bytes::from_static(b"C"))
    );

    client.close();
    node.shutdown().await;
}

#[tokio::test]
async fn short_key_is_refused_but_connection_survives() {
    let (keys, public) = identity();
    let node = start_node(CacheConfig::new("shortkey-node"), &[&public], &[]).await;
    let client = connect_client(&keys, &node).await;

    // Three code units is below the minimum; the store never sees it.
    assert!(client.upsert("abc", Bytes::from_static(b"z")).await.is_err());
    assert_eq!(client.get("abc").await.unwrap(), None);

    // The session keeps serving.
    client.upsert("abcd", Bytes::from_static(b"z")).await.unwrap();
    assert_eq!(
        client.get("abcd").await.unwrap(),
        Some(Bytes::from_static(b"z"))
    );

    client.close();
    node.shutdown().await;
}

#[tokio::test]
async fn concurrent_requests_multiplex_on_one_connection() {
    let (keys, public) = identity();
    let node = start_node(CacheConfig::new("concurrent-node"), &[&public], &[]).await;
    let client = connect_client(&keys, &node).await;

    let writes = (0..32).map(|i| {
        let client = client.clone();
        async move {
            client
                .upsert(&format!("key:{i}"), Bytes::from(format!("value:{i}")))
                .await
        }
    });
    futures::future::try_join_all(writes).await.expect("writes");

    let reads = (0..32).map(|i| {
        let client = client.clone();
        async move { client.get(&format!("key:{i}")).await }
    });
    let results = futures::future::try_join_all(reads).await.expect("reads");
    for (i, blob) in results.into_iter().enumerate() {
        assert_eq!(blob, Some(Bytes::from(format!("value:{i}"))));
    }

    client.close();
    node.shutdown().await;
}

#[tokio::test]
async fn repeated_upsert_is_idempotent_for_readers() {
    let (keys, public) = identity();
    let node = start_node(CacheConfig::new("idem-node"), &[&public], &[]).await;
    let client = connect_client(&keys, &node).await;

    for _ in 0..3 {
        client
            .upsert("same-key", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert_eq!(
            client.get("same-key").await.unwrap(),
            Some(Bytes::from_static(b"payload"))
        );
    }

    // The store settles to exactly one entry.
    assert!(
        wait_until(Duration::from_secs(1), || {
            let state = node.state().clone();
            async move { state.table.len() == 1 }
        })
        .await
    );

    client.close();
    node.shutdown().await;
}
