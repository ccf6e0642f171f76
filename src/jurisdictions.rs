// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Cached jurisdiction reference list.
//!
//! The list is fetched through [`CoachApi`], kept in memory, and persisted
//! with its fetch time. A persisted entry is only adopted while it is younger
//! than the TTL. At most one fetch runs at a time: late callers await the
//! outcome of the fetch already in flight instead of issuing their own.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::client::CoachApi;
use crate::error::ClientError;
use crate::model::Jurisdiction;
use crate::store::Storage;

pub const JURISDICTIONS_KEY: &str = "foia_coach_jurisdictions";
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Persisted form of a successful fetch. `timestamp` is Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JurisdictionsCacheEntry {
    pub jurisdictions: Vec<Jurisdiction>,
    pub timestamp: i64,
}

impl JurisdictionsCacheEntry {
    pub fn new(jurisdictions: Vec<Jurisdiction>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            jurisdictions,
            timestamp: fetched_at.timestamp_millis(),
        }
    }

    /// Entries stamped in the future count as age zero.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age_ms = (now.timestamp_millis() - self.timestamp).max(0);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        age_ms < ttl_ms
    }
}

/// What observers see after every state change.
#[derive(Debug, Clone, Default)]
pub struct JurisdictionsSnapshot {
    pub jurisdictions: Arc<Vec<Jurisdiction>>,
    pub loading: bool,
    pub error: Option<String>,
}

type FetchOutcome = Result<Arc<Vec<Jurisdiction>>, ClientError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct CacheInner {
    jurisdictions: Arc<Vec<Jurisdiction>>,
    loaded: bool,
    error: Option<String>,
    inflight: Option<InFlight>,
    // Bumped by every new fetch and by clear(); a fetch only installs its
    // result while its generation is still current.
    generation: u64,
}

impl CacheInner {
    fn snapshot(&self) -> JurisdictionsSnapshot {
        JurisdictionsSnapshot {
            jurisdictions: self.jurisdictions.clone(),
            loading: self.inflight.is_some(),
            error: self.error.clone(),
        }
    }
}

#[derive(Clone)]
pub struct JurisdictionsCache {
    api: Arc<dyn CoachApi>,
    storage: Storage,
    ttl: Duration,
    inner: Arc<Mutex<CacheInner>>,
    notify: Arc<watch::Sender<JurisdictionsSnapshot>>,
}

impl JurisdictionsCache {
    pub fn new(api: Arc<dyn CoachApi>, storage: Storage, ttl: Duration) -> Self {
        let (notify, _) = watch::channel(JurisdictionsSnapshot::default());
        Self {
            api,
            storage,
            ttl,
            inner: Arc::new(Mutex::new(CacheInner::default())),
            notify: Arc::new(notify),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<JurisdictionsSnapshot> {
        self.notify.subscribe()
    }

    pub async fn jurisdictions(&self) -> Arc<Vec<Jurisdiction>> {
        self.inner.lock().await.jurisdictions.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.inner.lock().await.error.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.lock().await.inflight.is_some()
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.lock().await.loaded
    }

    /// Case-insensitive lookup in the loaded list.
    pub async fn find_by_abbreviation(&self, abbreviation: &str) -> Option<Jurisdiction> {
        let guard = self.inner.lock().await;
        guard
            .jurisdictions
            .iter()
            .find(|j| j.abbreviation.eq_ignore_ascii_case(abbreviation.trim()))
            .cloned()
    }

    /// Load the list, preferring (in order) a fetch already in flight, the
    /// in-memory list, and a fresh persisted entry. `force` skips all three.
    pub async fn load(&self, force: bool) -> FetchOutcome {
        let mut guard = self.inner.lock().await;

        if !force {
            let pending = guard.inflight.as_ref().map(|f| f.fetch.clone());
            if let Some(fetch) = pending {
                drop(guard);
                tracing::debug!("joining jurisdictions fetch already in flight");
                return fetch.await;
            }

            if guard.loaded {
                return Ok(guard.jurisdictions.clone());
            }

            if let Some(entry) = self
                .storage
                .load::<JurisdictionsCacheEntry>(JURISDICTIONS_KEY)
                .await
            {
                if entry.is_fresh(Utc::now(), self.ttl) {
                    tracing::debug!(count = entry.jurisdictions.len(), "using persisted jurisdictions");
                    guard.jurisdictions = Arc::new(entry.jurisdictions);
                    guard.loaded = true;
                    guard.error = None;
                    self.notify.send_replace(guard.snapshot());
                    return Ok(guard.jurisdictions.clone());
                }
                tracing::debug!("persisted jurisdictions expired");
            }
        }

        guard.generation += 1;
        let generation = guard.generation;
        let fetch = self.spawn_fetch(generation);
        guard.inflight = Some(InFlight {
            generation,
            fetch: fetch.clone(),
        });
        guard.error = None;
        self.notify.send_replace(guard.snapshot());
        drop(guard);

        fetch.await
    }

    pub async fn reload(&self) -> FetchOutcome {
        self.load(true).await
    }

    /// Drop the in-memory list, the persisted entry and any in-flight guard.
    pub async fn clear(&self) {
        let mut guard = self.inner.lock().await;
        guard.generation += 1;
        guard.inflight = None;
        guard.jurisdictions = Arc::new(Vec::new());
        guard.loaded = false;
        guard.error = None;
        self.storage.remove(JURISDICTIONS_KEY).await;
        self.notify.send_replace(guard.snapshot());
    }

    // The fetch runs on its own task so it completes even if every caller
    // stops waiting.
    fn spawn_fetch(&self, generation: u64) -> SharedFetch {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.fetch_and_install(generation).await });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(ClientError::transport(format!("jurisdictions fetch aborted: {e}")))
            })
        }
        .boxed()
        .shared()
    }

    async fn fetch_and_install(&self, generation: u64) -> FetchOutcome {
        let result = self.api.get_jurisdictions().await;

        let mut guard = self.inner.lock().await;
        let current = guard.generation == generation;
        if guard
            .inflight
            .as_ref()
            .is_some_and(|f| f.generation == generation)
        {
            guard.inflight = None;
        }

        match result {
            Ok(list) => {
                let list = Arc::new(list);
                if current {
                    guard.jurisdictions = list.clone();
                    guard.loaded = true;
                    guard.error = None;

                    let entry = JurisdictionsCacheEntry::new(list.as_ref().clone(), Utc::now());
                    self.storage.save(JURISDICTIONS_KEY, &entry).await;
                    self.notify.send_replace(guard.snapshot());
                    tracing::debug!(count = list.len(), "jurisdictions fetched");
                } else {
                    tracing::debug!("discarding superseded jurisdictions fetch");
                }
                Ok(list)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load jurisdictions");
                if current {
                    guard.error = Some(e.to_string());
                    self.notify.send_replace(guard.snapshot());
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockCoachApi;
    use crate::model::{JurisdictionLevel, ProviderStatus, QueryRequest, QueryResponse};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn jurisdiction(id: i64, abbr: &str) -> Jurisdiction {
        Jurisdiction {
            id,
            name: format!("State of {abbr}"),
            abbreviation: abbr.to_string(),
            level: JurisdictionLevel::State,
        }
    }

    /// Counts listing calls; each call waits briefly so overlapping loads
    /// actually overlap.
    struct SlowListing {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl SlowListing {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CoachApi for SlowListing {
        async fn query(&self, _request: QueryRequest) -> Result<QueryResponse, ClientError> {
            unreachable!()
        }

        async fn get_jurisdictions(&self) -> Result<Vec<Jurisdiction>, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ClientError::Http {
                    status: 503,
                    status_text: "Service Unavailable".into(),
                });
            }
            Ok(vec![jurisdiction(n as i64, "CA"), jurisdiction(100, "US")])
        }

        async fn get_provider_status(&self) -> Result<ProviderStatus, ClientError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn fresh_persisted_entry_skips_network() {
        let storage = Storage::in_memory();
        let cached = vec![jurisdiction(1, "TX"), jurisdiction(2, "NY")];
        storage
            .save(JURISDICTIONS_KEY, &JurisdictionsCacheEntry::new(cached.clone(), Utc::now()))
            .await;

        let mut api = MockCoachApi::new();
        api.expect_get_jurisdictions().never();

        let cache = JurisdictionsCache::new(Arc::new(api), storage, DEFAULT_TTL);
        let loaded = cache.load(false).await.unwrap();

        assert_eq!(*loaded, cached);
        assert!(cache.is_loaded().await);
    }

    #[tokio::test]
    async fn stale_persisted_entry_is_refetched_once_and_replaced() {
        let storage = Storage::in_memory();
        let stale_at = Utc::now() - ChronoDuration::hours(25);
        storage
            .save(
                JURISDICTIONS_KEY,
                &JurisdictionsCacheEntry::new(vec![jurisdiction(1, "OLD")], stale_at),
            )
            .await;

        let mut api = MockCoachApi::new();
        api.expect_get_jurisdictions()
            .times(1)
            .returning(|| Ok(vec![jurisdiction(7, "WA")]));

        let cache = JurisdictionsCache::new(Arc::new(api), storage.clone(), DEFAULT_TTL);
        let loaded = cache.load(false).await.unwrap();
        assert_eq!(*loaded, vec![jurisdiction(7, "WA")]);

        let entry: JurisdictionsCacheEntry = storage.load(JURISDICTIONS_KEY).await.unwrap();
        assert_eq!(entry.jurisdictions, vec![jurisdiction(7, "WA")]);
        assert!(entry.is_fresh(Utc::now(), DEFAULT_TTL));

        // Second load is served from memory.
        assert_eq!(*cache.load(false).await.unwrap(), vec![jurisdiction(7, "WA")]);
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let api = SlowListing::new(Duration::from_millis(50));
        let cache = JurisdictionsCache::new(api.clone(), Storage::in_memory(), DEFAULT_TTL);

        let (a, b) = tokio::join!(cache.load(false), cache.load(false));

        assert_eq!(api.calls(), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(!cache.is_loading().await);
    }

    #[tokio::test]
    async fn clear_then_load_fetches_exactly_once() {
        let api = SlowListing::new(Duration::from_millis(1));
        let storage = Storage::in_memory();
        let cache = JurisdictionsCache::new(api.clone(), storage.clone(), DEFAULT_TTL);

        cache.load(false).await.unwrap();
        assert_eq!(api.calls(), 1);

        cache.clear().await;
        assert!(cache.jurisdictions().await.is_empty());
        assert!(storage
            .load::<JurisdictionsCacheEntry>(JURISDICTIONS_KEY)
            .await
            .is_none());

        cache.load(false).await.unwrap();
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn clear_during_fetch_leaves_no_guard_behind() {
        let api = SlowListing::new(Duration::from_millis(50));
        let cache = JurisdictionsCache::new(api.clone(), Storage::in_memory(), DEFAULT_TTL);

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.load(false).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear().await;
        assert!(!cache.is_loading().await);

        // The abandoned fetch still answers its own caller but is not installed.
        assert!(pending.await.unwrap().is_ok());
        assert!(!cache.is_loaded().await);

        cache.load(false).await.unwrap();
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn reload_bypasses_memory_and_storage() {
        let api = SlowListing::new(Duration::from_millis(1));
        let cache = JurisdictionsCache::new(api.clone(), Storage::in_memory(), DEFAULT_TTL);

        cache.load(false).await.unwrap();
        let reloaded = cache.reload().await.unwrap();

        assert_eq!(api.calls(), 2);
        assert_eq!(reloaded[0].id, 2);
    }

    #[tokio::test]
    async fn failure_keeps_previous_list_and_records_error() {
        let mut api = MockCoachApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_get_jurisdictions()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![jurisdiction(1, "OR")]));
        api.expect_get_jurisdictions()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(ClientError::transport("connection reset")));

        let cache = JurisdictionsCache::new(Arc::new(api), Storage::in_memory(), DEFAULT_TTL);
        let mut rx = cache.subscribe();

        cache.load(false).await.unwrap();
        let err = cache.reload().await.unwrap_err();

        assert_eq!(err, ClientError::transport("connection reset"));
        assert_eq!(cache.error().await.as_deref(), Some("connection reset"));
        assert_eq!(*cache.jurisdictions().await, vec![jurisdiction(1, "OR")]);

        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.error.as_deref(), Some("connection reset"));
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn concurrent_failure_reaches_every_waiter() {
        let api = Arc::new(SlowListing {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(30),
            fail: true,
        });
        let cache = JurisdictionsCache::new(api.clone(), Storage::in_memory(), DEFAULT_TTL);

        let (a, b) = tokio::join!(cache.load(false), cache.load(false));

        assert_eq!(api.calls(), 1);
        assert_eq!(a.unwrap_err().status(), Some(503));
        assert_eq!(b.unwrap_err().status(), Some(503));
        assert!(cache.error().await.is_some());
    }

    #[tokio::test]
    async fn lookup_by_abbreviation_ignores_case() {
        let api = SlowListing::new(Duration::from_millis(1));
        let cache = JurisdictionsCache::new(api, Storage::disabled(), DEFAULT_TTL);
        cache.load(false).await.unwrap();

        assert_eq!(cache.find_by_abbreviation("us").await.map(|j| j.id), Some(100));
        assert!(cache.find_by_abbreviation("ZZ").await.is_none());
    }

    #[test]
    fn freshness_boundary() {
        let now = Utc::now();
        let ttl = Duration::from_secs(60);

        let young = JurisdictionsCacheEntry::new(Vec::new(), now - ChronoDuration::seconds(59));
        let exact = JurisdictionsCacheEntry::new(Vec::new(), now - ChronoDuration::seconds(60));
        let future = JurisdictionsCacheEntry::new(Vec::new(), now + ChronoDuration::hours(1));

        assert!(young.is_fresh(now, ttl));
        assert!(!exact.is_fresh(now, ttl));
        assert!(future.is_fresh(now, ttl));
    }
}
