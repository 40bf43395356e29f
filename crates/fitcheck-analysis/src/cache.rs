//! Identity-keyed analysis cache with single-flight computation.
//!
//! Finished records live in a bounded `moka` cache (capacity with LRU
//! eviction, plus a time-to-live). Computations in progress are tracked as
//! shared futures in a `DashMap`, one marker per identity:
//!
//! - the first caller to miss becomes the leader and spawns the computation
//!   on its own task, so abandoning the request does not cancel it;
//! - callers arriving while the marker exists are followers and await the
//!   same shared result, success or failure;
//! - the task stores a successful record before it removes its marker, so a
//!   result is always visible through one of the two maps;
//! - failures are never stored.
//!
//! # Usage
//!
//! ```ignore
//! let cache = AnalysisCache::new(&CacheConfig::default());
//! let (analysis, outcome) = cache
//!     .get_or_compute(&identity, move || async move { run_pipeline().await })
//!     .await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fitcheck_models::{ContentIdentity, StructuredAnalysis};
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::metrics;

type SharedAnalysis = Shared<BoxFuture<'static, AnalysisResult<StructuredAnalysis>>>;

/// Serialized record plus insertion time. Never mutated once stored.
#[derive(Debug)]
pub struct CacheEntry {
    bytes: Vec<u8>,
    inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    fn encode(record: &StructuredAnalysis) -> AnalysisResult<Self> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| AnalysisError::internal(format!("Failed to serialize analysis: {}", e)))?;
        Ok(Self {
            bytes,
            inserted_at: Utc::now(),
        })
    }

    fn decode(&self) -> AnalysisResult<StructuredAnalysis> {
        serde_json::from_slice(&self.bytes)
            .map_err(|e| AnalysisError::CacheCorruption(e.to_string()))
    }

    pub fn inserted_at(&self) -> DateTime<Utc> {
        self.inserted_at
    }
}

/// How a [`AnalysisCache::get_or_compute`] call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Served from a stored record
    Hit,
    /// This caller started the computation
    Leader,
    /// This caller joined a computation already in flight
    Follower,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Leader => "miss",
            Self::Follower => "coalesced",
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub corruptions: u64,
    pub entries: u64,
}

struct Inner {
    entries: Cache<ContentIdentity, Arc<CacheEntry>>,
    in_flight: DashMap<ContentIdentity, SharedAnalysis>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    corruptions: AtomicU64,
}

impl Inner {
    /// Decode a stored record; corrupted bytes are dropped and read as a miss.
    fn lookup(&self, identity: &ContentIdentity) -> Option<StructuredAnalysis> {
        let entry = self.entries.get(identity)?;
        match entry.decode() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(identity = %identity.short(), error = %e, "Invalidating cache entry");
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_corruption();
                self.entries.invalidate(identity);
                None
            }
        }
    }

    fn store(&self, identity: &ContentIdentity, record: &StructuredAnalysis) -> AnalysisResult<()> {
        let entry = CacheEntry::encode(record)?;
        self.entries.insert(identity.clone(), Arc::new(entry));
        Ok(())
    }
}

/// Removes the in-flight marker when the computation task ends, including
/// by panic.
struct MarkerGuard {
    inner: Arc<Inner>,
    identity: ContentIdentity,
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.identity);
    }
}

/// Shared analysis cache. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct AnalysisCache {
    inner: Arc<Inner>,
}

impl AnalysisCache {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            inner: Arc::new(Inner {
                entries,
                in_flight: DashMap::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                corruptions: AtomicU64::new(0),
            }),
        }
    }

    /// Stored record for an identity, if any.
    pub fn get(&self, identity: &ContentIdentity) -> Option<StructuredAnalysis> {
        match self.inner.lookup(identity) {
            Some(record) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("hit");
                Some(record)
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("miss");
                None
            }
        }
    }

    /// Store a record, replacing any previous one.
    pub fn put(&self, identity: &ContentIdentity, record: &StructuredAnalysis) -> AnalysisResult<()> {
        self.inner.store(identity, record)
    }

    /// When the stored record for an identity was inserted.
    pub fn inserted_at(&self, identity: &ContentIdentity) -> Option<DateTime<Utc>> {
        self.inner.entries.get(identity).map(|e| e.inserted_at())
    }

    /// Return the stored record, or compute it exactly once across all
    /// concurrent callers for the same identity.
    ///
    /// `compute` is only invoked by the leader. Its future runs on a spawned
    /// task; a successful result is stored before followers are released from
    /// the marker. Errors reach every waiting caller and are not stored.
    pub async fn get_or_compute<F, Fut>(
        &self,
        identity: &ContentIdentity,
        compute: F,
    ) -> AnalysisResult<(StructuredAnalysis, LookupOutcome)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AnalysisResult<StructuredAnalysis>> + Send + 'static,
    {
        if let Some(record) = self.inner.lookup(identity) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_lookup(LookupOutcome::Hit.as_str());
            return Ok((record, LookupOutcome::Hit));
        }

        // The shard guard must not be held across an await.
        let (shared, outcome) = match self.inner.in_flight.entry(identity.clone()) {
            Entry::Occupied(marker) => (marker.get().clone(), LookupOutcome::Follower),
            Entry::Vacant(slot) => {
                // A leader may have stored its result and left since the lookup.
                if let Some(record) = self.inner.lookup(identity) {
                    drop(slot);
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_lookup(LookupOutcome::Hit.as_str());
                    return Ok((record, LookupOutcome::Hit));
                }

                let shared = self.spawn_computation(identity.clone(), compute());
                slot.insert(shared.clone());
                (shared, LookupOutcome::Leader)
            }
        };

        match outcome {
            LookupOutcome::Follower => {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(identity = %identity.short(), "Joining in-flight analysis");
            }
            _ => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        metrics::record_cache_lookup(outcome.as_str());

        shared.await.map(|record| (record, outcome))
    }

    fn spawn_computation<Fut>(&self, identity: ContentIdentity, computation: Fut) -> SharedAnalysis
    where
        Fut: Future<Output = AnalysisResult<StructuredAnalysis>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let guard = MarkerGuard {
                inner: Arc::clone(&inner),
                identity: identity.clone(),
            };

            let result = computation.await;
            if let Ok(record) = &result {
                match inner.store(&identity, record) {
                    Ok(()) => info!(identity = %identity.short(), "Cached analysis"),
                    Err(e) => warn!(identity = %identity.short(), error = %e, "Failed to cache analysis"),
                }
            }

            drop(guard);
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(AnalysisError::internal(format!("Analysis task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    /// Drop the stored record for an identity.
    pub fn invalidate(&self, identity: &ContentIdentity) {
        self.inner.entries.invalidate(identity);
    }

    /// Drop every stored record.
    pub fn clear(&self) {
        self.inner.entries.invalidate_all();
        self.inner.entries.run_pending_tasks();
    }

    /// Number of stored records.
    pub fn len(&self) -> u64 {
        self.inner.entries.run_pending_tasks();
        self.inner.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of computations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            corruptions: self.inner.corruptions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    #[cfg(test)]
    fn put_raw(&self, identity: &ContentIdentity, bytes: &[u8]) {
        self.inner.entries.insert(
            identity.clone(),
            Arc::new(CacheEntry {
                bytes: bytes.to_vec(),
                inserted_at: Utc::now(),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn cache() -> AnalysisCache {
        AnalysisCache::new(&CacheConfig::default())
    }

    fn record(exercise: &str, reps: u32) -> StructuredAnalysis {
        StructuredAnalysis {
            exercise_name: exercise.to_string(),
            repetitions: reps,
            calories_burned: 4.2,
            performance_score: 7.5,
            ..Default::default()
        }
    }

    fn id(bytes: &[u8]) -> ContentIdentity {
        ContentIdentity::from_bytes(bytes)
    }

    #[test]
    fn test_put_then_get() {
        let cache = cache();
        let identity = id(b"a");

        assert!(cache.get(&identity).is_none());
        cache.put(&identity, &record("squat", 12)).unwrap();

        assert_eq!(cache.get(&identity), Some(record("squat", 12)));
        assert!(cache.inserted_at(&identity).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = cache();
        cache.put(&id(b"a"), &record("squat", 1)).unwrap();
        cache.put(&id(b"b"), &record("lunge", 2)).unwrap();

        cache.invalidate(&id(b"a"));
        assert!(cache.get(&id(b"a")).is_none());
        assert!(cache.get(&id(b"b")).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupted_entry_is_a_miss() {
        let cache = cache();
        let identity = id(b"a");
        cache.put_raw(&identity, b"{not json");

        assert!(cache.get(&identity).is_none());
        assert_eq!(cache.stats().corruptions, 1);
        // Invalidated, so the next read is a plain miss.
        assert!(cache.get(&identity).is_none());
        assert_eq!(cache.stats().corruptions, 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = AnalysisCache::new(&CacheConfig {
            max_entries: 16,
            ttl: Duration::from_millis(50),
        });
        let identity = id(b"a");
        cache.put(&identity, &record("plank", 0)).unwrap();
        assert!(cache.get(&identity).is_some());

        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.get(&identity).is_none());
    }

    #[test]
    fn test_capacity_bound() {
        let cache = AnalysisCache::new(&CacheConfig {
            max_entries: 4,
            ttl: Duration::from_secs(60),
        });
        for i in 0..20u8 {
            cache.put(&id(&[i]), &record("squat", i as u32)).unwrap();
        }
        assert!(cache.len() <= 4);
    }

    #[tokio::test]
    async fn test_get_or_compute_stores_result() {
        let cache = cache();
        let identity = id(b"video");

        let (first, outcome) = cache
            .get_or_compute(&identity, || async { Ok(record("squat", 12)) })
            .await
            .unwrap();
        assert_eq!(outcome, LookupOutcome::Leader);
        assert_eq!(first.repetitions, 12);

        let (second, outcome) = cache
            .get_or_compute(&identity, || async {
                Err(AnalysisError::internal("must not run"))
            })
            .await
            .unwrap();
        assert_eq!(outcome, LookupOutcome::Hit);
        assert_eq!(second, first);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = cache();
        let identity = id(b"same bytes");
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let identity = identity.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&identity, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(record("squat", 12))
                    })
                    .await
            }));
        }

        for handle in handles {
            let (analysis, _) = handle.await.unwrap().unwrap();
            assert_eq!(analysis.repetitions, 12);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.coalesced + stats.hits, 15);
    }

    #[tokio::test]
    async fn test_distinct_identities_compute_independently() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));

        for bytes in [&b"one"[..], &b"two"[..]] {
            let calls = Arc::clone(&calls);
            cache
                .get_or_compute(&id(bytes), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(record("squat", 1))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_is_shared_and_not_cached() {
        let cache = cache();
        let identity = id(b"broken");
        let calls = Arc::new(AtomicU32::new(0));

        let run = |cache: AnalysisCache, calls: Arc<AtomicU32>, identity: ContentIdentity| async move {
            cache
                .get_or_compute(&identity, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err(AnalysisError::service_unavailable("quota exhausted"))
                })
                .await
        };

        let (a, b) = tokio::join!(
            run(cache.clone(), Arc::clone(&calls), identity.clone()),
            run(cache.clone(), Arc::clone(&calls), identity.clone()),
        );
        assert_eq!(a.unwrap_err().kind(), "service_unavailable");
        assert_eq!(b.unwrap_err().kind(), "service_unavailable");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get(&identity).is_none());
        assert_eq!(cache.in_flight(), 0);

        // The next request recomputes.
        let _ = run(cache.clone(), Arc::clone(&calls), identity.clone()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_leader_still_populates_cache() {
        let cache = cache();
        let identity = id(b"impatient");

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            cache.get_or_compute(&identity, || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(record("deadlift", 5))
            }),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get(&identity).map(|r| r.repetitions), Some(5));
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_computation_releases_marker() {
        let cache = cache();
        let identity = id(b"panics");

        let err = cache
            .get_or_compute(&identity, || async {
                if true {
                    panic!("detector crashed");
                }
                Ok(record("squat", 1))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "internal");
        assert_eq!(cache.in_flight(), 0);
    }
}
