// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

// These tests need a Redis server listening on localhost.

use super::*;
use jobhost_api::execution_log::ExecutionLogSink;
use jobhost_api::queue::QueueStore;
use jobhost_api::running_host::{HostLivenessStore, RunningHost};
use jobhost_api::table::TableStore;

fn store() -> RedisStore {
    RedisStore::new("redis://127.0.0.1:6379", &format!("test-{}:", uuid::Uuid::new_v4())).unwrap()
}

#[tokio::test]
#[ignore]
#[serial_test::serial]
async fn test_redis_queue_leases() {
    let store = store();
    let lease = std::time::Duration::from_millis(200);
    assert_eq!(
        Err(StoreError::QueueNotFound("work".to_string())),
        store.add_message("work", b"x".to_vec()).await
    );
    store.create_if_not_exists("work").await.unwrap();
    store.add_message("work", b"one".to_vec()).await.unwrap();

    let first = store.receive_message("work", lease).await.unwrap().unwrap();
    assert_eq!(b"one".to_vec(), first.content);
    assert_eq!(1, first.dequeue_count);
    assert!(store.receive_message("work", lease).await.unwrap().is_none());

    tokio::time::sleep(lease * 2).await;
    let second = store.receive_message("work", lease).await.unwrap().unwrap();
    assert_eq!(2, second.dequeue_count);
    assert!(store.delete_message("work", &first.receipt).await.is_err());

    store.release_message("work", &second.receipt, std::time::Duration::ZERO).await.unwrap();
    let third = store.receive_message("work", lease).await.unwrap().unwrap();
    store.delete_message("work", &third.receipt).await.unwrap();
    assert!(store.receive_message("work", lease).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
#[serial_test::serial]
async fn test_redis_liveness_and_tables() {
    let store = store();
    let record = RunningHost {
        host_identity: "host-a".to_string(),
        last_heartbeat_utc: chrono::Utc::now(),
    };
    HostLivenessStore::upsert(&store, record.clone()).await.unwrap();
    assert_eq!(Some(record.clone()), store.read("host-a").await.unwrap());
    assert_eq!(vec![record], HostLivenessStore::read_all(&store).await.unwrap());

    TableStore::upsert(&store, "stats", "daily", "monday", serde_json::json!({"count": 3}))
        .await
        .unwrap();
    assert_eq!(
        Some(serde_json::json!({"count": 3})),
        store.retrieve("stats", "daily", "monday").await.unwrap()
    );
    assert_eq!(1, store.query_partition("stats", "daily").await.unwrap().len());

    assert!(store.entries_for(&uuid::Uuid::new_v4()).await.unwrap().is_empty());
}
