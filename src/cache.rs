//! Cache store and consistency coordination.
//!
//! The read path is cache-aside: handlers check here first, fall back to
//! Postgres, and populate on the way out with a per-resource TTL. After any
//! successful sync the affected resource class's key pattern (plus its
//! dependent classes) is invalidated so the next read sees fresh rows.
//!
//! Every key produced by the builders below starts with its resource class
//! prefix; each class owns exactly one invalidation pattern.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Resource classes with cached representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Teams,
    Players,
    Games,
    Stats,
}

impl ResourceClass {
    pub fn name(self) -> &'static str {
        match self {
            ResourceClass::Teams => "teams",
            ResourceClass::Players => "players",
            ResourceClass::Games => "games",
            ResourceClass::Stats => "stats",
        }
    }

    /// The invalidation pattern owned by this class.
    pub fn pattern(self) -> &'static str {
        match self {
            ResourceClass::Teams => "teams:*",
            ResourceClass::Players => "players:*",
            ResourceClass::Games => "games:*",
            ResourceClass::Stats => "stats:*",
        }
    }

    pub fn ttl(self) -> Duration {
        match self {
            // Teams change rarely; games and stats move during the season.
            ResourceClass::Teams => Duration::from_secs(3600),
            ResourceClass::Players => Duration::from_secs(900),
            ResourceClass::Games => Duration::from_secs(300),
            ResourceClass::Stats => Duration::from_secs(300),
        }
    }

    /// Classes to invalidate after this class syncs. Roster syncs rewrite
    /// player rows that team payloads embed; stats feed game summaries.
    pub fn invalidates(self) -> &'static [ResourceClass] {
        match self {
            ResourceClass::Teams => &[ResourceClass::Teams],
            ResourceClass::Players => &[ResourceClass::Players, ResourceClass::Teams],
            ResourceClass::Games => &[ResourceClass::Games],
            ResourceClass::Stats => &[ResourceClass::Stats, ResourceClass::Games],
        }
    }
}

pub fn teams_list_key() -> String {
    "teams:list".to_string()
}

pub fn games_list_key(
    season: Option<i32>,
    week: Option<i32>,
    team: Option<Uuid>,
    limit: i64,
    offset: i64,
) -> String {
    format!(
        "games:list:season={}:week={}:team={}:limit={}:offset={}",
        season.map_or_else(|| "any".to_string(), |s| s.to_string()),
        week.map_or_else(|| "any".to_string(), |w| w.to_string()),
        team.map_or_else(|| "any".to_string(), |t| t.to_string()),
        limit,
        offset
    )
}

pub fn players_list_key(
    team: Option<Uuid>,
    position: Option<&str>,
    limit: i64,
    offset: i64,
) -> String {
    format!(
        "players:list:team={}:pos={}:limit={}:offset={}",
        team.map_or_else(|| "any".to_string(), |t| t.to_string()),
        position.unwrap_or("any"),
        limit,
        offset
    )
}

pub fn stats_list_key(season: i32, week: i32, limit: i64, offset: i64) -> String {
    format!(
        "stats:list:season={}:week={}:limit={}:offset={}",
        season, week, limit, offset
    )
}

/// Get / set-with-TTL / pattern-delete surface of the cache store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Deletes every key matching `pattern`, returning how many were removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;
}

/// Redis-backed cache store.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Self> {
        let client = redis::Client::open(url).context("failed to create Redis client")?;
        let mut attempt = 0;
        loop {
            match redis::aio::ConnectionManager::new(client.clone()).await {
                Ok(conn) => {
                    info!("Connected to Redis");
                    return Ok(Self { conn });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(e).context(format!(
                            "failed to connect to Redis after {} attempts",
                            max_retries
                        ));
                    }
                    warn!("Redis connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.del(keys).await?;
        Ok(deleted)
    }
}

/// In-process fallback used when no `REDIS_URL` is configured. Same
/// semantics as the Redis store, including TTL expiry on read.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Patterns here are a literal prefix followed by `*`.
fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let map = self.inner.read().await;
            match map.get(key) {
                Some((value, deadline)) if *deadline > Instant::now() => {
                    return Ok(Some(value.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired entry: drop it.
        self.inner.write().await.remove(key);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut map = self.inner.write().await;
        map.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|key, _| !pattern_matches(pattern, key));
        Ok((before - map.len()) as u64)
    }
}

/// Keeps the cache store consistent with the canonical store. Invalidation
/// is best-effort: a cache failure is logged and swallowed, never allowed
/// to fail a sync that already committed.
#[derive(Clone)]
pub struct CacheCoordinator {
    store: Arc<dyn CacheStore>,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Invalidate a single class's pattern.
    pub async fn invalidate(&self, class: ResourceClass) {
        match self.store.delete_pattern(class.pattern()).await {
            Ok(deleted) => debug!(
                pattern = class.pattern(),
                deleted, "invalidated cache pattern"
            ),
            Err(e) => warn!(
                pattern = class.pattern(),
                error = %e,
                "cache invalidation failed"
            ),
        }
    }

    /// Invalidate everything affected by a completed sync of `class`.
    pub async fn invalidate_after_sync(&self, class: ResourceClass) {
        for affected in class.invalidates() {
            self.invalidate(*affected).await;
        }
        info!(resource = class.name(), "cache invalidated after sync");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_round_trip_and_expiry() {
        let cache = MemoryCache::new();
        cache
            .set_ex("teams:list", "[]", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("teams:list").await.unwrap(), Some("[]".into()));

        cache
            .set_ex("games:1", "{}", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("games:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalidation_removes_every_key_of_the_class() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set_ex("teams:list", "a", ttl).await.unwrap();
        cache.set_ex("teams:abc123", "b", ttl).await.unwrap();
        cache.set_ex("games:list:season=2025", "c", ttl).await.unwrap();

        let deleted = cache.delete_pattern("teams:*").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(cache.get("teams:list").await.unwrap(), None);
        assert_eq!(cache.get("teams:abc123").await.unwrap(), None);
        // Other classes untouched.
        assert_eq!(
            cache.get("games:list:season=2025").await.unwrap(),
            Some("c".into())
        );
    }

    #[tokio::test]
    async fn after_sync_spillover_clears_dependent_classes() {
        let store = Arc::new(MemoryCache::new());
        let coordinator = CacheCoordinator::new(store.clone());
        let ttl = Duration::from_secs(60);
        store.set_ex("stats:list:x", "a", ttl).await.unwrap();
        store.set_ex("games:list:y", "b", ttl).await.unwrap();
        store.set_ex("players:list:z", "c", ttl).await.unwrap();

        coordinator.invalidate_after_sync(ResourceClass::Stats).await;

        assert_eq!(store.get("stats:list:x").await.unwrap(), None);
        assert_eq!(store.get("games:list:y").await.unwrap(), None);
        assert_eq!(store.get("players:list:z").await.unwrap(), Some("c".into()));
    }

    #[test]
    fn every_class_owns_a_distinct_pattern() {
        let classes = [
            ResourceClass::Teams,
            ResourceClass::Players,
            ResourceClass::Games,
            ResourceClass::Stats,
        ];
        for a in &classes {
            for b in &classes {
                if a != b {
                    assert_ne!(a.pattern(), b.pattern());
                }
            }
        }
    }

    #[test]
    fn key_builders_stay_inside_their_pattern() {
        assert!(pattern_matches("teams:*", &teams_list_key()));
        assert!(pattern_matches(
            "games:*",
            &games_list_key(Some(2025), Some(5), None, 50, 0)
        ));
        assert!(pattern_matches(
            "players:*",
            &players_list_key(None, Some("QB"), 50, 0)
        ));
        assert!(pattern_matches("stats:*", &stats_list_key(2025, 5, 50, 0)));
    }
}
