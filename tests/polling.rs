use std::sync::Arc;
use std::time::Duration;

use ariel_store::object_store::local::LocalStore;
use ariel_store::object_store::{IfMatch, ObjectStore, PutRequest};
use ariel_store::poll::{FailureKind, PollPolicy, PollingFetcher};
use tempfile::TempDir;

fn local() -> (Arc<LocalStore>, TempDir) {
    let tmp = TempDir::new().unwrap();
    (Arc::new(LocalStore::new(tmp.path())), tmp)
}

#[tokio::test]
async fn fetch_waits_for_producer_on_disk() {
    let (store, _tmp) = local();
    let fetcher = PollingFetcher::new(store.clone());

    let producer = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            store
                .put(&PutRequest::json("job/utterances.json", b"[]".to_vec()), IfMatch::Any)
                .await
                .unwrap();
        })
    };

    let text = fetcher
        .fetch_text_when_present("job/utterances.json", PollPolicy::from_millis(50, 20))
        .await
        .unwrap();
    producer.await.unwrap();

    assert_eq!(text, "[]");
}

#[tokio::test]
async fn trigger_deletion_is_observed() {
    let (store, _tmp) = local();
    store
        .put(&PutRequest::json("job/utterances_preview.json", b"[]".to_vec()), IfMatch::Any)
        .await
        .unwrap();
    let fetcher = PollingFetcher::new(store.clone());

    let consumer = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            store.delete("job/utterances_preview.json").await.unwrap();
        })
    };

    let gone = fetcher
        .wait_until_absent("job/utterances_preview.json", PollPolicy::from_millis(40, 25))
        .await
        .unwrap();
    consumer.await.unwrap();

    assert!(gone);
}

#[tokio::test]
async fn present_check_does_not_download() {
    let (store, _tmp) = local();
    store
        .put(&PutRequest::new("job/dubbed_video.mp4", vec![0u8; 4096], "video/mp4"), IfMatch::Any)
        .await
        .unwrap();

    let found = PollingFetcher::new(store)
        .wait_until_present("job/dubbed_video.mp4", PollPolicy::default())
        .await
        .unwrap();
    assert!(found);
}

#[tokio::test]
async fn invalid_key_is_a_failure_not_a_timeout() {
    let (store, _tmp) = local();
    let err = PollingFetcher::new(store)
        .fetch_when_present("../outside.json", PollPolicy::from_millis(10, 5))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Failed);
}
