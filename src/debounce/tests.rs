use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{DebounceEngine, Decision};
use crate::config::{CorruptStatePolicy, DebounceConfig, StoreConfig};
use crate::error::Error;
use crate::models::{CameraState, EventRecord};
use crate::store::testing::{fast_config, FlakyStore};
use crate::store::{MemoryStore, StateStore, StoreClient};

fn engine_with(store: Arc<dyn StateStore>, config: DebounceConfig) -> DebounceEngine {
    DebounceEngine::new(StoreClient::new(store, &StoreConfig::default()), &config)
}

fn engine(store: Arc<MemoryStore>) -> DebounceEngine {
    engine_with(store, DebounceConfig::default())
}

fn event(serial: &str, ts: i64) -> EventRecord {
    EventRecord::new(serial, "VMD", ts)
}

async fn stored(store: &MemoryStore, serial: &str) -> Option<CameraState> {
    store
        .get(&CameraState::key(serial))
        .await
        .unwrap()
        .map(|raw| CameraState::decode(&raw).unwrap())
}

#[tokio::test]
async fn first_event_is_accepted_with_count_one() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());

    let decision = engine.evaluate(&event("CAM1", 1_000)).await.unwrap();

    let expected = CameraState {
        serial: "CAM1".into(),
        last_ts: 1_000,
        count: 1,
    };
    assert_eq!(decision, Decision::Accepted(expected.clone()));
    assert_eq!(stored(&store, "CAM1").await, Some(expected));
}

#[tokio::test]
async fn events_inside_window_are_suppressed_without_mutation() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    engine.evaluate(&event("CAM1", 5_000)).await.unwrap();
    let before = store.get("cam_CAM1").await.unwrap();

    for ts in [5_000, 5_001, 15_000, 24_999] {
        let decision = engine.evaluate(&event("CAM1", ts)).await.unwrap();
        assert!(!decision.is_accepted(), "ts {} should be suppressed", ts);
        assert_eq!(decision.state().last_ts, 5_000);
    }

    assert_eq!(store.get("cam_CAM1").await.unwrap(), before);
}

#[tokio::test]
async fn window_boundary_is_accepted() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    engine.evaluate(&event("CAM1", 5_000)).await.unwrap();

    let decision = engine.evaluate(&event("CAM1", 25_000)).await.unwrap();

    assert!(decision.is_accepted());
    assert_eq!(decision.state().last_ts, 25_000);
    assert_eq!(decision.state().count, 2);
}

#[tokio::test]
async fn out_of_order_event_is_suppressed() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    engine.evaluate(&event("CAM1", 100_000)).await.unwrap();

    let decision = engine.evaluate(&event("CAM1", 10_000)).await.unwrap();

    assert!(!decision.is_accepted());
    assert_eq!(stored(&store, "CAM1").await.unwrap().last_ts, 100_000);
}

#[tokio::test]
async fn count_tracks_every_acceptance() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());

    for n in 0..10 {
        let decision = engine.evaluate(&event("CAM1", n * 20_000)).await.unwrap();
        assert!(decision.is_accepted());
        // a repeat right after each acceptance must not count
        engine.evaluate(&event("CAM1", n * 20_000 + 1)).await.unwrap();
    }

    let state = stored(&store, "CAM1").await.unwrap();
    assert_eq!(state.count, 10);
    assert_eq!(state.last_ts, 180_000);
}

#[tokio::test]
async fn cameras_are_tracked_independently() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());

    assert!(engine.evaluate(&event("CAM1", 0)).await.unwrap().is_accepted());
    assert!(engine.evaluate(&event("CAM2", 1)).await.unwrap().is_accepted());
    assert!(!engine.evaluate(&event("CAM1", 2)).await.unwrap().is_accepted());
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn reference_scenario() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());

    assert!(engine.evaluate(&event("CAM1", 0)).await.unwrap().is_accepted());
    assert!(!engine.evaluate(&event("CAM1", 10_000)).await.unwrap().is_accepted());
    let last = engine.evaluate(&event("CAM1", 25_000)).await.unwrap();

    assert_eq!(
        last,
        Decision::Accepted(CameraState {
            serial: "CAM1".into(),
            last_ts: 25_000,
            count: 2,
        })
    );
}

#[tokio::test]
async fn concurrent_first_events_accept_once() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.evaluate(&event("CAM1", 1_000 + i)).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_accepted() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(stored(&store, "CAM1").await.unwrap().count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_window_expiry_accepts_once() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    engine.evaluate(&event("CAM1", 0)).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.evaluate(&event("CAM1", 20_000 + i)).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_accepted() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(stored(&store, "CAM1").await.unwrap().count, 2);
}

#[tokio::test]
async fn corrupt_state_is_overwritten_by_default() {
    let store = Arc::new(MemoryStore::new());
    store.set("cam_CAM1", "{garbage").await;
    let engine = engine(store.clone());

    let decision = engine.evaluate(&event("CAM1", 7_000)).await.unwrap();

    assert!(decision.is_accepted());
    assert_eq!(
        stored(&store, "CAM1").await,
        Some(CameraState {
            serial: "CAM1".into(),
            last_ts: 7_000,
            count: 1,
        })
    );
}

#[tokio::test]
async fn corrupt_state_can_be_rejected() {
    let store = Arc::new(MemoryStore::new());
    store.set("cam_CAM1", "{garbage").await;
    let engine = engine_with(
        store.clone(),
        DebounceConfig {
            on_corrupt_state: CorruptStatePolicy::Reject,
            ..DebounceConfig::default()
        },
    );

    let result = engine.evaluate(&event("CAM1", 7_000)).await;

    assert!(matches!(result, Err(Error::Decode(_))));
    assert_eq!(
        store.get("cam_CAM1").await.unwrap().as_deref(),
        Some("{garbage")
    );
}

#[tokio::test]
async fn store_failure_is_reported_without_write() {
    let store = Arc::new(FlakyStore::failing(10));
    let engine = DebounceEngine::new(
        StoreClient::new(store.clone(), &fast_config(2)),
        &DebounceConfig::default(),
    );

    let result = engine.evaluate(&event("CAM1", 0)).await;

    assert!(matches!(result, Err(Error::Store(_))));
    assert!(store.inner.is_empty().await);
}

/// Backend whose value changes under every compare-and-swap.
struct ChurningStore {
    inner: MemoryStore,
}

#[async_trait]
impl StateStore for ChurningStore {
    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.inner.get(key).await
    }

    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<&str>,
        _value: &str,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.inner.scan_prefix(prefix).await
    }

    async fn delete_if(&self, key: &str, expected: &str) -> Result<bool, Error> {
        self.inner.delete_if(key, expected).await
    }

    async fn flush_all(&self) -> Result<(), Error> {
        self.inner.flush_all().await
    }
}

#[tokio::test]
async fn endless_contention_gives_up() {
    let store = Arc::new(ChurningStore {
        inner: MemoryStore::new(),
    });
    let engine = engine_with(
        store.clone(),
        DebounceConfig {
            max_cas_attempts: 3,
            ..DebounceConfig::default()
        },
    );

    let result = engine.evaluate(&event("CAM1", 0)).await;

    assert!(matches!(result, Err(Error::Contention(_))));
    assert!(store.inner.is_empty().await);
}

/// Backend whose first compare-and-swap fails, optionally after committing.
struct LostReplyStore {
    inner: MemoryStore,
    commit: bool,
    tripped: AtomicBool,
}

impl LostReplyStore {
    fn new(commit: bool) -> Self {
        Self {
            inner: MemoryStore::new(),
            commit,
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StateStore for LostReplyStore {
    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.inner.get(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, Error> {
        if self.tripped.swap(true, Ordering::SeqCst) {
            return self.inner.compare_and_swap(key, expected, value).await;
        }
        if !self.commit {
            return Err(Error::Store("connection reset".into()));
        }
        self.inner.compare_and_swap(key, expected, value).await?;
        std::future::pending().await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.inner.scan_prefix(prefix).await
    }

    async fn delete_if(&self, key: &str, expected: &str) -> Result<bool, Error> {
        self.inner.delete_if(key, expected).await
    }

    async fn flush_all(&self) -> Result<(), Error> {
        self.inner.flush_all().await
    }
}

#[tokio::test]
async fn committed_write_with_lost_reply_is_accepted() {
    let store = Arc::new(LostReplyStore::new(true));
    let engine = DebounceEngine::new(
        StoreClient::new(store.clone(), &fast_config(3)),
        &DebounceConfig::default(),
    );

    let decision = engine.evaluate(&event("CAM1", 0)).await.unwrap();

    let expected = CameraState {
        serial: "CAM1".into(),
        last_ts: 0,
        count: 1,
    };
    assert_eq!(decision, Decision::Accepted(expected.clone()));
    assert_eq!(stored(&store.inner, "CAM1").await, Some(expected));
}

#[tokio::test]
async fn failed_write_is_reported_not_suppressed() {
    let store = Arc::new(LostReplyStore::new(false));
    let engine = DebounceEngine::new(
        StoreClient::new(store.clone(), &fast_config(3)),
        &DebounceConfig::default(),
    );

    let result = engine.evaluate(&event("CAM1", 0)).await;

    assert!(matches!(result, Err(Error::Store(_))));
    assert!(store.inner.is_empty().await);
}
