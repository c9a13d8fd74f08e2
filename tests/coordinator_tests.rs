//! Concurrency and policy properties of the fetch coordinator, exercised
//! against a mock sync backend and the in-process cache store.

use async_trait::async_trait;
use gridiron_stats::cache::{CacheCoordinator, CacheStore, MemoryCache};
use gridiron_stats::coordinator::{FetchCoordinator, FetchOutcome, FetchRequest, SyncBackend};
use gridiron_stats::policy::SeasonInfo;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

struct MockState {
    catalog_size: AtomicI64,
    team_exists: AtomicBool,
    teams_syncs: AtomicUsize,
    rosters_syncs: AtomicUsize,
    games_syncs: AtomicUsize,
    stats_syncs: AtomicUsize,
    fail_games: AtomicBool,
    panic_games: AtomicBool,
    hold_games: AtomicBool,
    hold_teams: AtomicBool,
    gate: Semaphore,
    teams_gate: Semaphore,
    order: Mutex<Vec<&'static str>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            catalog_size: AtomicI64::new(0),
            team_exists: AtomicBool::new(false),
            teams_syncs: AtomicUsize::new(0),
            rosters_syncs: AtomicUsize::new(0),
            games_syncs: AtomicUsize::new(0),
            stats_syncs: AtomicUsize::new(0),
            fail_games: AtomicBool::new(false),
            panic_games: AtomicBool::new(false),
            hold_games: AtomicBool::new(false),
            hold_teams: AtomicBool::new(false),
            gate: Semaphore::new(0),
            teams_gate: Semaphore::new(0),
            order: Mutex::new(Vec::new()),
        }
    }
}

#[derive(Clone, Default)]
struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    fn with_catalog(count: i64) -> Self {
        let backend = Self::default();
        backend.state.catalog_size.store(count, Ordering::SeqCst);
        backend
    }
}

#[async_trait]
impl SyncBackend for MockBackend {
    async fn catalog_size(&self) -> anyhow::Result<i64> {
        Ok(self.state.catalog_size.load(Ordering::SeqCst))
    }

    async fn team_exists(&self, _team_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.state.team_exists.load(Ordering::SeqCst))
    }

    async fn sync_teams(&self) -> anyhow::Result<()> {
        self.state.order.lock().unwrap().push("teams");
        if self.state.hold_teams.load(Ordering::SeqCst) {
            let _permit = self.state.teams_gate.acquire().await?;
        }
        self.state.teams_syncs.fetch_add(1, Ordering::SeqCst);
        self.state.catalog_size.store(32, Ordering::SeqCst);
        Ok(())
    }

    async fn sync_rosters(&self) -> anyhow::Result<()> {
        self.state.order.lock().unwrap().push("rosters");
        self.state.rosters_syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn sync_games(&self, _season: i32, _week: Option<i32>) -> anyhow::Result<()> {
        self.state.order.lock().unwrap().push("games");
        if self.state.panic_games.load(Ordering::SeqCst) {
            panic!("sync executor panicked");
        }
        if self.state.hold_games.load(Ordering::SeqCst) {
            let _permit = self.state.gate.acquire().await?;
        }
        self.state.games_syncs.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_games.load(Ordering::SeqCst) {
            anyhow::bail!("upstream unavailable");
        }
        Ok(())
    }

    async fn sync_stats(&self, _season: i32, _week: i32) -> anyhow::Result<()> {
        self.state.order.lock().unwrap().push("stats");
        self.state.stats_syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn coordinator_with(
    backend: MockBackend,
) -> (Arc<FetchCoordinator<MockBackend>>, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let coordinator = Arc::new(FetchCoordinator::new(
        backend,
        CacheCoordinator::new(cache.clone()),
    ));
    (coordinator, cache)
}

fn current_season() -> i32 {
    SeasonInfo::current().year
}

fn games_request() -> FetchRequest {
    FetchRequest::Games {
        season: current_season(),
        week: Some(1),
    }
}

#[tokio::test]
async fn at_most_one_fetch_in_flight_per_key() {
    let backend = MockBackend::with_catalog(32);
    backend.state.hold_games.store(true, Ordering::SeqCst);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_fresh(games_request()).await })
        })
        .collect();

    // Let the winner reach the executor and the losers observe Busy.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(coordinator.in_flight(), 1);

    state.gate.add_permits(1);

    let mut fetched = 0;
    let mut busy = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            FetchOutcome::Fetched => fetched += 1,
            FetchOutcome::Busy => busy += 1,
            FetchOutcome::Ineligible => panic!("request should have been eligible"),
        }
    }

    assert_eq!(fetched, 1);
    assert_eq!(busy, 7);
    assert_eq!(state.games_syncs.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn busy_callers_return_immediately() {
    let backend = MockBackend::with_catalog(32);
    backend.state.hold_games.store(true, Ordering::SeqCst);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    let winner = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.ensure_fresh(games_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let outcome = coordinator.ensure_fresh(games_request()).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Busy);
    assert!(
        started.elapsed() < Duration::from_millis(50),
        "busy caller must not block on the in-flight fetch"
    );

    state.gate.add_permits(1);
    assert_eq!(winner.await.unwrap().unwrap(), FetchOutcome::Fetched);
}

#[tokio::test]
async fn independent_keys_fetch_concurrently() {
    let backend = MockBackend::with_catalog(32);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    let week1 = coordinator.ensure_fresh(FetchRequest::Games {
        season: current_season(),
        week: Some(1),
    });
    let week2 = coordinator.ensure_fresh(FetchRequest::Games {
        season: current_season(),
        week: Some(2),
    });
    let (a, b) = tokio::join!(week1, week2);

    assert_eq!(a.unwrap(), FetchOutcome::Fetched);
    assert_eq!(b.unwrap(), FetchOutcome::Fetched);
    assert_eq!(state.games_syncs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn registry_entry_released_after_failure() {
    let backend = MockBackend::with_catalog(32);
    backend.state.fail_games.store(true, Ordering::SeqCst);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    assert!(coordinator.ensure_fresh(games_request()).await.is_err());
    assert_eq!(coordinator.in_flight(), 0);

    // A later request is not shadow-banned by the failed one.
    assert!(coordinator.ensure_fresh(games_request()).await.is_err());
    assert_eq!(state.games_syncs.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn registry_entry_released_after_panic() {
    let backend = MockBackend::with_catalog(32);
    backend.state.panic_games.store(true, Ordering::SeqCst);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    let handle = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.ensure_fresh(games_request()).await })
    };
    assert!(handle.await.unwrap_err().is_panic());
    assert_eq!(coordinator.in_flight(), 0);

    state.panic_games.store(false, Ordering::SeqCst);
    let outcome = coordinator.ensure_fresh(games_request()).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Fetched);
}

#[tokio::test]
async fn catalog_prerequisite_filled_before_dependent_sync() {
    let backend = MockBackend::with_catalog(5);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    let outcome = coordinator.ensure_fresh(games_request()).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Fetched);
    assert_eq!(state.teams_syncs.load(Ordering::SeqCst), 1);
    assert_eq!(*state.order.lock().unwrap(), vec!["teams", "games"]);
}

#[tokio::test]
async fn full_catalog_skips_prerequisite_sync() {
    let backend = MockBackend::with_catalog(32);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    coordinator.ensure_fresh(games_request()).await.unwrap();
    assert_eq!(state.teams_syncs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dependent_fetch_awaits_colliding_catalog_sync() {
    let backend = MockBackend::with_catalog(5);
    backend.state.hold_teams.store(true, Ordering::SeqCst);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    // A teams fetch takes the catalog key and stalls inside the executor.
    let teams = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.ensure_fresh(FetchRequest::Teams).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.in_flight(), 1);

    // The dependent fetch collides on the prerequisite and must wait for
    // that sync's completion signal rather than start a second teams sync.
    let games = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.ensure_fresh(games_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.games_syncs.load(Ordering::SeqCst), 0);

    let started = std::time::Instant::now();
    state.teams_gate.add_permits(1);

    assert_eq!(teams.await.unwrap().unwrap(), FetchOutcome::Fetched);
    assert_eq!(games.await.unwrap().unwrap(), FetchOutcome::Fetched);
    // Woken by the completion signal, well inside the wait bound.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(state.teams_syncs.load(Ordering::SeqCst), 1);
    assert_eq!(*state.order.lock().unwrap(), vec!["teams", "games"]);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn stale_season_is_ineligible() {
    let backend = MockBackend::with_catalog(32);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    let outcome = coordinator
        .ensure_fresh(FetchRequest::Games {
            season: current_season() - 3,
            week: Some(1),
        })
        .await
        .unwrap();
    assert_eq!(outcome, FetchOutcome::Ineligible);
    assert_eq!(state.games_syncs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn complete_catalog_makes_teams_fetch_ineligible() {
    let backend = MockBackend::with_catalog(32);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    let outcome = coordinator.ensure_fresh(FetchRequest::Teams).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Ineligible);
    assert_eq!(state.teams_syncs.load(Ordering::SeqCst), 0);

    state.catalog_size.store(5, Ordering::SeqCst);
    let outcome = coordinator.ensure_fresh(FetchRequest::Teams).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Fetched);
    assert_eq!(state.teams_syncs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn roster_fetch_requires_known_team() {
    let backend = MockBackend::with_catalog(32);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);
    let request = FetchRequest::Roster {
        team_id: Uuid::new_v4(),
    };

    let outcome = coordinator.ensure_fresh(request.clone()).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Ineligible);
    assert_eq!(state.rosters_syncs.load(Ordering::SeqCst), 0);

    state.team_exists.store(true, Ordering::SeqCst);
    let outcome = coordinator.ensure_fresh(request).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Fetched);
    assert_eq!(state.rosters_syncs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cache_invalidated_only_on_success() {
    let backend = MockBackend::with_catalog(32);
    let state = backend.state.clone();
    let (coordinator, cache) = coordinator_with(backend);
    let ttl = Duration::from_secs(60);

    cache.set_ex("games:list:a", "stale", ttl).await.unwrap();
    cache.set_ex("teams:list", "teams", ttl).await.unwrap();

    coordinator.ensure_fresh(games_request()).await.unwrap();
    assert_eq!(cache.get("games:list:a").await.unwrap(), None);
    // Other classes keep their entries.
    assert_eq!(
        cache.get("teams:list").await.unwrap(),
        Some("teams".into())
    );

    // A failed sync must not invalidate anything.
    cache.set_ex("games:list:b", "stale", ttl).await.unwrap();
    state.fail_games.store(true, Ordering::SeqCst);
    assert!(coordinator.ensure_fresh(games_request()).await.is_err());
    assert_eq!(
        cache.get("games:list:b").await.unwrap(),
        Some("stale".into())
    );
}

#[tokio::test]
async fn spawned_refresh_outcome_is_observable() {
    let backend = MockBackend::with_catalog(32);
    let state = backend.state.clone();
    let (coordinator, _cache) = coordinator_with(backend);

    let handle = coordinator.spawn_refresh(FetchRequest::Stats {
        season: current_season(),
        week: 1,
    });
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, FetchOutcome::Fetched);
    assert_eq!(state.stats_syncs.load(Ordering::SeqCst), 1);
}
