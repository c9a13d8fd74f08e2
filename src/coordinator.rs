//! Fetch coordination: at most one in-flight sync per resource key.
//!
//! The registry is the only mutable shared state in this subsystem. Its lock
//! guards map operations exclusively and is never held across the sync
//! executor's I/O: acquire is check-and-insert, release is delete, and the
//! network call happens in between with no lock held. Releasing is done by a
//! drop guard so the registry cannot leak an entry on any exit path,
//! including panics.
//!
//! Callers that lose the acquire race get `Busy` plus a completion channel
//! for that specific fetch. The read path ignores the channel and degrades
//! gracefully; dependency sequencing awaits it (with a bound) and then
//! re-verifies the prerequisite instead of assuming it succeeded.

use crate::cache::{CacheCoordinator, ResourceClass};
use crate::error::FetchError;
use crate::policy::{EligibilityWindow, MIN_TEAM_COUNT};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long a dependent fetch waits for a colliding prerequisite fetch
/// before re-checking and moving on.
pub const PREREQ_WAIT: Duration = Duration::from_secs(10);

/// Overall deadline for a detached background fetch.
pub const BACKGROUND_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Coarse sync operations plus the canonical-store probes the coordinator
/// needs for eligibility and prerequisite checks. Each sync operation is
/// idempotent upstream-to-store; the coordinator treats them as black boxes
/// returning success or failure.
#[async_trait]
pub trait SyncBackend: Send + Sync + 'static {
    async fn catalog_size(&self) -> Result<i64>;
    async fn team_exists(&self, team_id: Uuid) -> Result<bool>;
    async fn sync_teams(&self) -> Result<()>;
    async fn sync_rosters(&self) -> Result<()>;
    async fn sync_games(&self, season: i32, week: Option<i32>) -> Result<()>;
    async fn sync_stats(&self, season: i32, week: i32) -> Result<()>;
}

/// Identity of one deduplicated fetch. Map key only, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    resource: &'static str,
    identifier: String,
}

impl FetchKey {
    fn new(resource: &'static str, identifier: impl Into<String>) -> Self {
        Self {
            resource,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.identifier)
    }
}

/// What a handler asks the coordinator to make fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    Teams,
    Roster { team_id: Uuid },
    Games { season: i32, week: Option<i32> },
    Stats { season: i32, week: i32 },
}

impl FetchRequest {
    fn key(&self) -> FetchKey {
        match self {
            FetchRequest::Teams => FetchKey::new("teams", "all"),
            FetchRequest::Roster { team_id } => FetchKey::new("rosters", team_id.to_string()),
            FetchRequest::Games { season, week } => match week {
                Some(week) => FetchKey::new("games", format!("{}-week-{}", season, week)),
                None => FetchKey::new("games", format!("{}-all", season)),
            },
            FetchRequest::Stats { season, week } => {
                FetchKey::new("stats", format!("{}-week-{}", season, week))
            }
        }
    }

    fn resource(&self) -> &'static str {
        match self {
            FetchRequest::Teams => "teams",
            FetchRequest::Roster { .. } => "rosters",
            FetchRequest::Games { .. } => "games",
            FetchRequest::Stats { .. } => "stats",
        }
    }

    fn class(&self) -> ResourceClass {
        match self {
            FetchRequest::Teams => ResourceClass::Teams,
            FetchRequest::Roster { .. } => ResourceClass::Players,
            FetchRequest::Games { .. } => ResourceClass::Games,
            FetchRequest::Stats { .. } => ResourceClass::Stats,
        }
    }
}

/// How an `ensure_fresh` call concluded. `Busy` and `Ineligible` are normal
/// outcomes: the caller proceeds with whatever data it already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched,
    Busy,
    Ineligible,
}

type Registry = Arc<Mutex<HashMap<FetchKey, watch::Sender<bool>>>>;

enum Acquire {
    Acquired(FetchGuard),
    Busy(watch::Receiver<bool>),
}

/// Holds a registry entry for the duration of one sync call. Dropping it,
/// on any path, removes the entry and signals waiters.
struct FetchGuard {
    key: FetchKey,
    registry: Registry,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        let mut map = match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(done) = map.remove(&self.key) {
            let _ = done.send(true);
        }
    }
}

pub struct FetchCoordinator<B: SyncBackend> {
    backend: B,
    cache: CacheCoordinator,
    registry: Registry,
}

impl<B: SyncBackend> FetchCoordinator<B> {
    pub fn new(backend: B, cache: CacheCoordinator) -> Self {
        Self {
            backend,
            cache,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of syncs currently executing. Surfaced on `/health`.
    pub fn in_flight(&self) -> usize {
        match self.registry.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Non-blocking check-and-insert. The lock covers only the map access.
    fn try_acquire(&self, key: &FetchKey) -> Acquire {
        let mut map = match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(done) = map.get(key) {
            return Acquire::Busy(done.subscribe());
        }
        let (tx, _rx) = watch::channel(false);
        map.insert(key.clone(), tx);
        Acquire::Acquired(FetchGuard {
            key: key.clone(),
            registry: Arc::clone(&self.registry),
        })
    }

    /// Single entry point for handlers whose query came back empty.
    ///
    /// Checks eligibility, deduplicates by key, sequences the team-catalog
    /// prerequisite, runs the sync, and invalidates the affected cache
    /// patterns after the key is released. Sync failures propagate; the
    /// caller is expected to log and serve what it has.
    pub async fn ensure_fresh(&self, request: FetchRequest) -> Result<FetchOutcome, FetchError> {
        if !self.eligible(&request).await? {
            debug!(key = %request.key(), "auto-fetch not eligible");
            return Ok(FetchOutcome::Ineligible);
        }

        let key = request.key();
        let guard = match self.try_acquire(&key) {
            Acquire::Acquired(guard) => guard,
            Acquire::Busy(_) => {
                debug!(%key, "fetch already in progress");
                return Ok(FetchOutcome::Busy);
            }
        };

        // Games, rosters, and stats all reference team rows.
        if !matches!(request, FetchRequest::Teams) {
            self.ensure_catalog().await?;
        }

        info!(%key, "auto-fetch starting");
        let result = self.run_sync(&request).await;

        // Release before invalidation: waiters should not observe the key
        // as in-flight while the cache is being cleaned up.
        drop(guard);

        match result {
            Ok(()) => {
                self.cache.invalidate_after_sync(request.class()).await;
                info!(%key, "auto-fetch completed");
                Ok(FetchOutcome::Fetched)
            }
            Err(source) => {
                warn!(%key, error = %source, "auto-fetch failed");
                Err(FetchError::Sync {
                    resource: request.resource(),
                    source,
                })
            }
        }
    }

    /// Submits `request` as a detached task, bounded by
    /// [`BACKGROUND_FETCH_TIMEOUT`]. The task keeps running if the
    /// originating request disconnects; the returned handle lets the caller
    /// observe the outcome if it wants to.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        request: FetchRequest,
    ) -> JoinHandle<Result<FetchOutcome, FetchError>> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::time::timeout(
                BACKGROUND_FETCH_TIMEOUT,
                coordinator.ensure_fresh(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(BACKGROUND_FETCH_TIMEOUT)),
            }
        })
    }

    async fn eligible(&self, request: &FetchRequest) -> Result<bool, FetchError> {
        let window = EligibilityWindow::current();
        match request {
            FetchRequest::Teams => {
                let count = self.probe("teams", self.backend.catalog_size()).await?;
                Ok(EligibilityWindow::catalog_fetch_allowed(count))
            }
            FetchRequest::Roster { team_id } => {
                let exists = self.probe("rosters", self.backend.team_exists(*team_id)).await?;
                Ok(EligibilityWindow::membership_fetch_allowed(exists))
            }
            FetchRequest::Games { season, week } => Ok(match week {
                Some(week) => window.games_fetch_allowed(*season, *week),
                None => window.season_in_window(*season),
            }),
            FetchRequest::Stats { season, week } => {
                Ok(window.games_fetch_allowed(*season, *week))
            }
        }
    }

    /// Fills the team catalog before a dependent sync runs. If another task
    /// is already filling it, waits for that fetch's completion signal and
    /// re-checks the count rather than assuming success.
    async fn ensure_catalog(&self) -> Result<(), FetchError> {
        let count = self.probe("teams", self.backend.catalog_size()).await?;
        if count >= MIN_TEAM_COUNT {
            return Ok(());
        }
        warn!(count, "team catalog below minimum, filling before dependent sync");

        let key = FetchKey::new("teams", "all");
        match self.try_acquire(&key) {
            Acquire::Acquired(guard) => {
                let result = self.backend.sync_teams().await;
                drop(guard);
                match result {
                    Ok(()) => {
                        self.cache.invalidate_after_sync(ResourceClass::Teams).await;
                        Ok(())
                    }
                    Err(source) => Err(FetchError::Sync {
                        resource: "teams",
                        source,
                    }),
                }
            }
            Acquire::Busy(mut done) => {
                debug!(%key, "catalog fetch already in progress, awaiting completion");
                let _ = tokio::time::timeout(PREREQ_WAIT, done.changed()).await;
                let count = self.probe("teams", self.backend.catalog_size()).await?;
                if count < MIN_TEAM_COUNT {
                    // Let the dependent sync surface its own failure.
                    warn!(count, "catalog still below minimum after waiting; proceeding");
                }
                Ok(())
            }
        }
    }

    async fn run_sync(&self, request: &FetchRequest) -> Result<()> {
        match request {
            FetchRequest::Teams => self.backend.sync_teams().await,
            FetchRequest::Roster { .. } => self.backend.sync_rosters().await,
            FetchRequest::Games { season, week } => {
                self.backend.sync_games(*season, *week).await
            }
            FetchRequest::Stats { season, week } => {
                self.backend.sync_stats(*season, *week).await
            }
        }
    }

    async fn probe<T>(
        &self,
        resource: &'static str,
        query: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T, FetchError> {
        query
            .await
            .map_err(|source| FetchError::Sync { resource, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_keys_are_distinct_per_resource_instance() {
        let week5 = FetchRequest::Games {
            season: 2025,
            week: Some(5),
        }
        .key();
        let week6 = FetchRequest::Games {
            season: 2025,
            week: Some(6),
        }
        .key();
        let whole = FetchRequest::Games {
            season: 2025,
            week: None,
        }
        .key();
        assert_ne!(week5, week6);
        assert_ne!(week5, whole);
        assert_eq!(week5.to_string(), "games:2025-week-5");
        assert_eq!(whole.to_string(), "games:2025-all");
    }

    #[test]
    fn identical_requests_share_a_key() {
        let a = FetchRequest::Stats {
            season: 2025,
            week: 3,
        };
        let b = FetchRequest::Stats {
            season: 2025,
            week: 3,
        };
        assert_eq!(a.key(), b.key());
    }
}
