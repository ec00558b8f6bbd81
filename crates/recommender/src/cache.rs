//! Recommendation cache and freshness management
//!
//! Entries are JSON documents keyed `rec:{algorithm}:{user}:{scope}:{limit}`,
//! so one algorithm or one user can be invalidated by key prefix. Stores are
//! interchangeable behind `RecommendationStore`.
//!
//! Freshness is decided here, not by the store:
//! - an entry older than the TTL is stale
//! - an entry written under an older generation is stale
//! - a computation that started before an invalidation is never written
//! - stale and malformed entries are removed and never served
//!
//! Generations are random tokens kept in the store under `rec-gen:`, one
//! global, one per algorithm and one per user, so every instance sharing a
//! store sees the same invalidations. A marker lives for twice the entry TTL;
//! an entry older than its marker has expired before the marker does.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::RecommenderError;
use crate::types::{
    Algorithm, Recommendation, RecommendationResponse, RecommendationScope, UserId,
};

/// Prefix shared by every recommendation key
pub const KEY_NAMESPACE: &str = "rec:";

/// Prefix of generation markers. Outside `KEY_NAMESPACE` so clearing
/// entries never drops a marker.
pub const GENERATION_NAMESPACE: &str = "rec-gen:";

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CacheError> for RecommenderError {
    fn from(err: CacheError) -> Self {
        RecommenderError::Cache(err.to_string())
    }
}

/// Keyed string store holding serialized cache entries
#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Values of `keys` in order, `None` where a key is absent
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<u64, CacheError>;

    /// Remove every key starting with `prefix`, returning the count
    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    async fn clear(&self) -> Result<u64, CacheError> {
        self.invalidate_prefix(KEY_NAMESPACE).await
    }

    /// Number of recommendation entries, markers excluded
    async fn len(&self) -> Result<usize, CacheError>;
}

/// Process-local store. Expired keys are dropped on access and on every
/// scan, so markers of users that went quiet do not accumulate.
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RecommendationStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.value().1 > now)
            .map(|entry| entry.value().0.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<u64, CacheError> {
        Ok(self.entries.remove(key).map_or(0, |_| 1))
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|key, (_, expires)| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                *expires > now
            }
        });
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(KEY_NAMESPACE))
            .count())
    }
}

/// Redis store shared between service instances
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    #[instrument(skip(redis_url))]
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        info!("Initializing Redis recommendation store");

        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        let mut conn = manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;

        info!("Redis recommendation store initialized");
        Ok(Self { manager })
    }

    pub async fn health_check(&self) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let response = redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(response == "PONG")
    }
}

#[async_trait::async_trait]
impl RecommendationStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let values = redis::cmd("MGET")
            .arg(keys)
            .query_async::<_, Vec<Option<String>>>(&mut conn)
            .await?;
        Ok(values)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.manager.clone();
        Ok(conn.del(key).await?)
    }

    #[instrument(skip(self))]
    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.manager.clone();

        let keys: Vec<String> = conn.keys(format!("{}*", prefix)).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let count: u64 = conn.del(&keys).await?;
        debug!(deleted = count, "Deleted keys by prefix");
        Ok(count)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = conn.keys(format!("{}*", KEY_NAMESPACE)).await?;
        Ok(keys.len())
    }
}

/// Identity of one cached recommendation list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope: RecommendationScope,
    pub user_id: UserId,
    pub algorithm: Algorithm,
    pub limit: usize,
}

impl CacheKey {
    pub fn new(
        scope: RecommendationScope,
        user_id: UserId,
        algorithm: Algorithm,
        limit: usize,
    ) -> Self {
        Self {
            scope,
            user_id,
            algorithm,
            limit,
        }
    }

    pub fn render(&self) -> String {
        format!(
            "{}{}:{}:{}:{}",
            KEY_NAMESPACE, self.algorithm, self.user_id, self.scope, self.limit
        )
    }

    pub fn algorithm_prefix(algorithm: Algorithm) -> String {
        format!("{}{}:", KEY_NAMESPACE, algorithm)
    }

    pub fn user_prefix(algorithm: Algorithm, user_id: UserId) -> String {
        format!("{}{}:{}:", KEY_NAMESPACE, algorithm, user_id)
    }

    /// Marker keys this entry depends on: global, algorithm, user
    fn generation_keys(&self) -> [String; 3] {
        [
            global_marker(),
            algorithm_marker(self.algorithm),
            user_marker(self.user_id),
        ]
    }
}

fn global_marker() -> String {
    format!("{}global", GENERATION_NAMESPACE)
}

fn algorithm_marker(algorithm: Algorithm) -> String {
    format!("{}algorithm:{}", GENERATION_NAMESPACE, algorithm)
}

fn user_marker(user_id: UserId) -> String {
    format!("{}user:{}", GENERATION_NAMESPACE, user_id)
}

/// Marker tokens an entry was computed under. A missing marker is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Generation {
    global: Option<String>,
    algorithm: Option<String>,
    user: Option<String>,
}

impl Generation {
    fn from_markers(mut markers: impl Iterator<Item = Option<String>>) -> Self {
        Self {
            global: markers.next().flatten(),
            algorithm: markers.next().flatten(),
            user: markers.next().flatten(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    recommendations: Vec<Recommendation>,
    created_at: DateTime<Utc>,
    generation: Generation,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub ttl_secs: u64,
}

pub struct RecommendationCache {
    store: Arc<dyn RecommendationStore>,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RecommendationCache {
    pub fn new(store: Arc<dyn RecommendationStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            locks: DashMap::new(),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), ttl)
    }

    /// A disabled cache computes every request and stores nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::in_memory(Duration::ZERO)
        }
    }

    async fn generation(&self, key: &CacheKey) -> Result<Generation, CacheError> {
        let markers = self.store.get_many(&key.generation_keys()).await?;
        Ok(Generation::from_markers(markers.into_iter()))
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now - entry.created_at < ttl,
            Err(_) => true,
        }
    }

    /// Serve `key` from the cache, or compute it once and store the result.
    /// Results computed with degraded signals are returned but not stored.
    #[instrument(skip(self, key, compute), fields(key = %key.render()))]
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        force_refresh: bool,
        compute: F,
    ) -> Result<RecommendationResponse, RecommenderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RecommendationResponse, RecommenderError>>,
    {
        if !self.enabled {
            return compute().await;
        }

        let rendered = key.render();
        if !force_refresh {
            if let Some(recommendations) = self.read_fresh(&rendered, key).await {
                return Ok(self.hit(recommendations));
            }
        }

        let lock = Arc::clone(
            self.locks
                .entry(rendered.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = lock.lock().await;

        // Another request may have filled the key while this one waited
        let filled = if force_refresh {
            None
        } else {
            self.read_fresh(&rendered, key).await
        };
        let result = match filled {
            Some(recommendations) => Ok(self.hit(recommendations)),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let generation = match self.generation(key).await {
                    Ok(generation) => Some(generation),
                    Err(e) => {
                        warn!(error = %e, "Generation unavailable, result will not be cached");
                        None
                    }
                };
                let computed = compute().await;
                if let (Ok(response), Some(generation)) = (&computed, generation) {
                    if !response.degraded_signals.is_empty() {
                        debug!(degraded = ?response.degraded_signals, "Not caching degraded result");
                    } else if let Err(e) = self
                        .write(&rendered, key, generation, &response.recommendations)
                        .await
                    {
                        warn!(error = %e, "Cache write failed");
                    }
                }
                computed
            }
        };

        drop(guard);
        drop(lock);
        self.locks
            .remove_if(&rendered, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    fn hit(&self, recommendations: Vec<Recommendation>) -> RecommendationResponse {
        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!("Cache hit");
        RecommendationResponse {
            recommendations,
            cached: true,
            degraded_signals: Vec::new(),
        }
    }

    /// Entry and its markers are read in one round trip
    async fn read_fresh(&self, rendered: &str, key: &CacheKey) -> Option<Vec<Recommendation>> {
        let mut keys = vec![rendered.to_string()];
        keys.extend(key.generation_keys());

        let mut values = match self.store.get_many(&keys).await {
            Ok(values) if values.len() == keys.len() => values.into_iter(),
            Ok(values) => {
                warn!(expected = keys.len(), got = values.len(), "Short cache read, treating as miss");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };
        let raw = values.next().flatten()?;
        let current = Generation::from_markers(values);

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.generation == current && self.is_fresh(&entry, Utc::now()) => {
                return Some(entry.recommendations);
            }
            Ok(_) => debug!("Removing stale cache entry"),
            Err(e) => warn!(error = %e, "Removing malformed cache entry"),
        }

        if let Err(e) = self.store.remove(rendered).await {
            warn!(error = %e, "Failed to remove unusable cache entry");
        }
        None
    }

    async fn write(
        &self,
        rendered: &str,
        key: &CacheKey,
        generation: Generation,
        recommendations: &[Recommendation],
    ) -> Result<(), CacheError> {
        if self.generation(key).await? != generation {
            debug!("Discarding result computed before an invalidation");
            return Ok(());
        }

        let entry = CacheEntry {
            recommendations: recommendations.to_vec(),
            created_at: Utc::now(),
            generation,
        };
        let json = serde_json::to_string(&entry)?;
        self.store.put(rendered, json, self.ttl).await
    }

    /// Replace a marker with a fresh token, staling every entry under it
    async fn bump(&self, marker: String) -> Result<(), CacheError> {
        self.store
            .put(&marker, Uuid::new_v4().to_string(), self.ttl * 2)
            .await
    }

    /// Invalidate every entry of one user. Takes effect once the marker is
    /// written; store cleanup runs in the background.
    pub async fn invalidate_user(&self, user_id: UserId) -> Result<(), RecommenderError> {
        if !self.enabled {
            return Ok(());
        }
        self.bump(user_marker(user_id)).await?;
        let prefixes = Algorithm::ALL
            .iter()
            .map(|algorithm| CacheKey::user_prefix(*algorithm, user_id))
            .collect();
        self.spawn_cleanup(prefixes);
        debug!(user_id, "Invalidated user recommendations");
        Ok(())
    }

    /// Invalidate everything, e.g. after a catalog change
    pub async fn invalidate_all(&self) -> Result<(), RecommenderError> {
        if !self.enabled {
            return Ok(());
        }
        self.bump(global_marker()).await?;
        self.spawn_cleanup(vec![KEY_NAMESPACE.to_string()]);
        debug!("Invalidated all recommendations");
        Ok(())
    }

    /// Remove entries of one algorithm, or all entries, returning the count
    pub async fn clear(&self, algorithm: Option<Algorithm>) -> Result<u64, RecommenderError> {
        let removed = match algorithm {
            Some(algorithm) => {
                self.bump(algorithm_marker(algorithm)).await?;
                self.store
                    .invalidate_prefix(&CacheKey::algorithm_prefix(algorithm))
                    .await?
            }
            None => {
                self.bump(global_marker()).await?;
                self.store.clear().await?
            }
        };

        info!(algorithm = ?algorithm, removed, "Cleared recommendation cache");
        Ok(removed)
    }

    fn spawn_cleanup(&self, prefixes: Vec<String>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        handle.spawn(async move {
            for prefix in prefixes {
                if let Err(e) = store.invalidate_prefix(&prefix).await {
                    warn!(prefix = %prefix, error = %e, "Background cache cleanup failed");
                }
            }
        });
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let size = match self.store.len().await {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "Cache size unavailable");
                0
            }
        };

        CacheStats {
            enabled: self.enabled,
            hits,
            misses,
            hit_rate: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            } else {
                0.0
            },
            size,
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComponentScores, ItemKind};
    use std::sync::atomic::AtomicUsize;

    fn recommendation(item_id: i64, score: f64) -> Recommendation {
        Recommendation {
            item_id,
            name: format!("Course {}", item_id),
            kind: ItemKind::Course,
            score,
            components: ComponentScores {
                popularity: Some(score),
                ..ComponentScores::default()
            },
            recommendation_reason: "Is popular across the platform".to_string(),
        }
    }

    fn key(user_id: UserId) -> CacheKey {
        CacheKey::new(RecommendationScope::Courses, user_id, Algorithm::Popular, 5)
    }

    async fn compute_counted(
        calls: &AtomicUsize,
        score: f64,
    ) -> Result<RecommendationResponse, RecommenderError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(RecommendationResponse::computed(
            vec![recommendation(10, score)],
            Vec::new(),
        ))
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(key(42).render(), "rec:popular:42:courses:5");
        assert_eq!(
            CacheKey::new(
                RecommendationScope::Activities { course_id: 3 },
                42,
                Algorithm::Hybrid,
                10
            )
            .render(),
            "rec:hybrid:42:course-3:10"
        );
        assert!(key(42)
            .render()
            .starts_with(&CacheKey::user_prefix(Algorithm::Popular, 42)));
        assert!(!key(420)
            .render()
            .starts_with(&CacheKey::user_prefix(Algorithm::Popular, 42)));
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let cache = RecommendationCache::in_memory(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        let second = cache
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.1))
            .await
            .unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.recommendations, second.recommendations);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let cache = RecommendationCache::in_memory(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        let refreshed = cache
            .get_or_compute(&key(1), true, || compute_counted(&calls, 0.4))
            .await
            .unwrap();

        assert!(!refreshed.cached);
        assert_eq!(refreshed.recommendations[0].score, 0.4);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let after = cache
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.1))
            .await
            .unwrap();
        assert!(after.cached);
        assert_eq!(after.recommendations[0].score, 0.4);
    }

    #[tokio::test]
    async fn test_expired_entries_are_recomputed() {
        let cache = RecommendationCache::in_memory(Duration::ZERO);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let response = cache
                .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
                .await
                .unwrap();
            assert!(!response.cached);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_replaced() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put(&key(1).render(), "{not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = RecommendationCache::new(store.clone(), Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        let response = cache
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        assert!(!response.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = store.get(&key(1).render()).await.unwrap().unwrap();
        assert!(serde_json::from_str::<CacheEntry>(&stored).is_ok());
    }

    #[tokio::test]
    async fn test_user_invalidation_is_scoped() {
        let cache = RecommendationCache::in_memory(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        for user in [1, 2] {
            cache
                .get_or_compute(&key(user), false, || compute_counted(&calls, 0.9))
                .await
                .unwrap();
        }

        cache.invalidate_user(1).await.unwrap();

        let invalidated = cache
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        let untouched = cache
            .get_or_compute(&key(2), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();

        assert!(!invalidated.cached);
        assert!(untouched.cached);
    }

    #[tokio::test]
    async fn test_write_after_invalidation_is_discarded() {
        let cache = RecommendationCache::in_memory(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);
        let (cache_ref, calls_ref) = (&cache, &calls);

        cache
            .get_or_compute(&key(1), false, move || async move {
                // Enrollment changes while the computation is in flight
                cache_ref.invalidate_user(1).await.unwrap();
                compute_counted(calls_ref, 0.9).await
            })
            .await
            .unwrap();

        let next = cache
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        assert!(!next.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_degraded_results_are_not_cached() {
        let cache = RecommendationCache::in_memory(Duration::from_secs(300));

        let degraded = cache
            .get_or_compute(&key(1), false, || async {
                Ok(RecommendationResponse::computed(
                    vec![recommendation(10, 0.5)],
                    vec!["interests".to_string()],
                ))
            })
            .await
            .unwrap();
        assert_eq!(degraded.degraded_signals, vec!["interests".to_string()]);

        let calls = AtomicUsize::new(0);
        let next = cache
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        assert!(!next.cached);
    }

    #[tokio::test]
    async fn test_concurrent_misses_compute_once() {
        let cache = RecommendationCache::in_memory(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);
        let calls_ref = &calls;
        let slow = move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            compute_counted(calls_ref, 0.9).await
        };

        let (first, second) = (key(1), key(1));

        let (a, b) = tokio::join!(
            cache.get_or_compute(&first, false, slow),
            cache.get_or_compute(&second, false, slow),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_ne!(a.unwrap().cached, b.unwrap().cached);
    }

    #[tokio::test]
    async fn test_invalidation_reaches_instances_sharing_a_store() {
        let store: Arc<dyn RecommendationStore> = Arc::new(InMemoryStore::new());
        let a = RecommendationCache::new(store.clone(), Duration::from_secs(300));
        let b = RecommendationCache::new(store, Duration::from_secs(300));
        let calls = AtomicUsize::new(0);
        let (a_ref, calls_ref) = (&a, &calls);

        // B computes while A handles an enrollment event for the same user
        b.get_or_compute(&key(1), false, move || async move {
            a_ref.invalidate_user(1).await.unwrap();
            compute_counted(calls_ref, 0.9).await
        })
        .await
        .unwrap();

        let from_b = b
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        assert!(!from_b.cached);

        a.invalidate_user(1).await.unwrap();
        let after_event = b
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        assert!(!after_event.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_instances_sharing_a_store_share_hits_after_global_invalidation() {
        let store: Arc<dyn RecommendationStore> = Arc::new(InMemoryStore::new());
        let a = RecommendationCache::new(store.clone(), Duration::from_secs(300));
        let b = RecommendationCache::new(store, Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        a.invalidate_all().await.unwrap();
        // Let the background cleanup finish before entries are written
        tokio::task::yield_now().await;

        let mut cached = Vec::new();
        for cache in [&a, &b, &a, &b] {
            let response = cache
                .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
                .await
                .unwrap();
            cached.push(response.cached);
        }

        assert_eq!(cached, vec![false, true, true, true]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.stats().await.hits + b.stats().await.hits, 3);
    }

    #[tokio::test]
    async fn test_generation_markers_expire_and_are_not_counted() {
        let store = Arc::new(InMemoryStore::new());
        let cache = RecommendationCache::new(store.clone(), Duration::from_millis(10));

        for user in 1..=50 {
            cache.invalidate_user(user).await.unwrap();
        }
        assert_eq!(cache.stats().await.size, 0);
        assert_eq!(store.entries.len(), 50);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.len().await.unwrap(), 0);
        assert!(store.entries.is_empty());
    }

    #[tokio::test]
    async fn test_clear_by_algorithm() {
        let cache = RecommendationCache::in_memory(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);
        let hybrid = CacheKey::new(RecommendationScope::Courses, 1, Algorithm::Hybrid, 5);

        cache
            .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        cache
            .get_or_compute(&hybrid, false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();

        let removed = cache.clear(Some(Algorithm::Popular)).await.unwrap();
        assert_eq!(removed, 1);

        let hybrid_again = cache
            .get_or_compute(&hybrid, false, || compute_counted(&calls, 0.9))
            .await
            .unwrap();
        assert!(hybrid_again.cached);

        assert_eq!(cache.clear(None).await.unwrap(), 1);
        assert_eq!(cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let cache = RecommendationCache::disabled();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let response = cache
                .get_or_compute(&key(1), false, || compute_counted(&calls, 0.9))
                .await
                .unwrap();
            assert!(!response.cached);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.stats().await.enabled);
    }
}
