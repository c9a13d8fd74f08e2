//! HTTP surface.
//!
//! Handlers follow the cache-aside read path: cache first, then Postgres;
//! on an empty result they hand the gap to the fetch coordinator and
//! re-query once if it actually fetched. `Busy` and `Ineligible` outcomes
//! and sync failures all degrade to serving whatever is on hand — a data
//! gap is never a 5xx. Responses produced by a successful auto-fetch carry
//! an `x-auto-fetched: true` header.

use crate::cache::{self, CacheCoordinator, ResourceClass};
use crate::coordinator::{FetchCoordinator, FetchOutcome, FetchRequest};
use crate::error::ApiError;
use crate::models::{GameFilters, PlayerFilters};
use crate::policy::SeasonInfo;
use crate::store::Queries;
use crate::sync::IngestionService;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Clone)]
pub struct AppState {
    pub store: Queries,
    pub cache: CacheCoordinator,
    pub coordinator: Arc<FetchCoordinator<IngestionService>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/teams", get(list_teams))
        .route("/v1/games", get(list_games))
        .route("/v1/players", get(list_players))
        .route("/v1/stats", get(list_stats))
        .with_state(state)
}

fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(50).clamp(1, MAX_PAGE_SIZE),
        offset.unwrap_or(0).max(0),
    )
}

fn fetched_header(auto_fetched: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if auto_fetched {
        headers.insert("x-auto-fetched", HeaderValue::from_static("true"));
    }
    headers
}

async fn cached_body(state: &AppState, key: &str) -> Option<Value> {
    match state.cache.store().get(key).await {
        Ok(Some(hit)) => serde_json::from_str(&hit).ok(),
        Ok(None) => None,
        Err(e) => {
            warn!(key, error = %e, "cache read failed");
            None
        }
    }
}

async fn write_cache(state: &AppState, key: &str, body: &Value, ttl: Duration) {
    match serde_json::to_string(body) {
        Ok(serialized) => {
            if let Err(e) = state.cache.store().set_ex(key, &serialized, ttl).await {
                warn!(key, error = %e, "cache write failed");
            }
        }
        Err(e) => warn!(key, error = %e, "failed to serialize cache body"),
    }
}

/// Runs a background fetch and reports whether it actually brought data in.
async fn try_auto_fetch(state: &AppState, request: FetchRequest) -> bool {
    match state.coordinator.spawn_refresh(request).await {
        Ok(Ok(FetchOutcome::Fetched)) => true,
        Ok(Ok(_)) => false, // busy or ineligible: serve what we have
        Ok(Err(e)) => {
            warn!(error = %e, "auto-fetch failed; serving existing data");
            false
        }
        Err(e) => {
            warn!(error = %e, "auto-fetch task failed");
            false
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let season = SeasonInfo::current();
    Json(json!({
        "service": "gridiron-stats",
        "status": "ok",
        "season": season,
        "syncs_in_flight": state.coordinator.in_flight(),
    }))
}

async fn list_teams(
    State(state): State<AppState>,
) -> Result<(HeaderMap, Json<Value>), ApiError> {
    let key = cache::teams_list_key();
    if let Some(body) = cached_body(&state, &key).await {
        return Ok((fetched_header(false), Json(body)));
    }

    let mut teams = state.store.list_teams().await?;
    let mut auto_fetched = false;
    if teams.is_empty() && try_auto_fetch(&state, FetchRequest::Teams).await {
        auto_fetched = true;
        teams = state.store.list_teams().await?;
    }

    let body = json!({ "data": teams, "meta": { "total": teams.len() } });
    if !teams.is_empty() {
        write_cache(&state, &key, &body, ResourceClass::Teams.ttl()).await;
    }
    Ok((fetched_header(auto_fetched), Json(body)))
}

#[derive(Debug, Deserialize)]
struct GamesQuery {
    season: Option<i32>,
    week: Option<i32>,
    team: Option<Uuid>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_games(
    State(state): State<AppState>,
    Query(query): Query<GamesQuery>,
) -> Result<(HeaderMap, Json<Value>), ApiError> {
    let (limit, offset) = clamp_page(query.limit, query.offset);
    let filters = GameFilters {
        season: query.season,
        week: query.week,
        team: query.team,
        limit,
        offset,
    };

    let key = cache::games_list_key(filters.season, filters.week, filters.team, limit, offset);
    if let Some(body) = cached_body(&state, &key).await {
        return Ok((fetched_header(false), Json(body)));
    }

    let (mut games, mut total) = state.store.list_games(&filters).await?;

    let mut auto_fetched = false;
    if total == 0 {
        if let Some(season) = filters.season {
            let request = FetchRequest::Games {
                season,
                week: filters.week,
            };
            if try_auto_fetch(&state, request).await {
                auto_fetched = true;
                (games, total) = state.store.list_games(&filters).await?;
            }
        }
    }

    let body = json!({
        "data": games,
        "meta": { "total": total, "limit": limit, "offset": offset }
    });
    if total > 0 {
        write_cache(&state, &key, &body, ResourceClass::Games.ttl()).await;
    }
    Ok((fetched_header(auto_fetched), Json(body)))
}

#[derive(Debug, Deserialize)]
struct PlayersQuery {
    team: Option<Uuid>,
    position: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_players(
    State(state): State<AppState>,
    Query(query): Query<PlayersQuery>,
) -> Result<(HeaderMap, Json<Value>), ApiError> {
    let (limit, offset) = clamp_page(query.limit, query.offset);
    let filters = PlayerFilters {
        team: query.team,
        position: query.position.clone(),
        limit,
        offset,
    };

    let key =
        cache::players_list_key(filters.team, filters.position.as_deref(), limit, offset);
    if let Some(body) = cached_body(&state, &key).await {
        return Ok((fetched_header(false), Json(body)));
    }

    let (mut players, mut total) = state.store.list_players(&filters).await?;

    let mut auto_fetched = false;
    if total == 0 {
        if let Some(team_id) = filters.team {
            if try_auto_fetch(&state, FetchRequest::Roster { team_id }).await {
                auto_fetched = true;
                (players, total) = state.store.list_players(&filters).await?;
            }
        }
    }

    let body = json!({
        "data": players,
        "meta": { "total": total, "limit": limit, "offset": offset }
    });
    if total > 0 {
        write_cache(&state, &key, &body, ResourceClass::Players.ttl()).await;
    }
    Ok((fetched_header(auto_fetched), Json(body)))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    season: i32,
    week: i32,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<(HeaderMap, Json<Value>), ApiError> {
    let (limit, offset) = clamp_page(query.limit, query.offset);

    let key = cache::stats_list_key(query.season, query.week, limit, offset);
    if let Some(body) = cached_body(&state, &key).await {
        return Ok((fetched_header(false), Json(body)));
    }

    let (mut lines, mut total) = state
        .store
        .list_stat_lines(query.season, query.week, limit, offset)
        .await?;

    let mut auto_fetched = false;
    if total == 0 {
        let request = FetchRequest::Stats {
            season: query.season,
            week: query.week,
        };
        if try_auto_fetch(&state, request).await {
            auto_fetched = true;
            (lines, total) = state
                .store
                .list_stat_lines(query.season, query.week, limit, offset)
                .await?;
        }
    }

    let body = json!({
        "data": lines,
        "meta": { "total": total, "limit": limit, "offset": offset }
    });
    if total > 0 {
        write_cache(&state, &key, &body, ResourceClass::Stats.ttl()).await;
    }
    Ok((fetched_header(auto_fetched), Json(body)))
}
