//! Sync executor: pulls data from the upstream provider and converges the
//! canonical store through idempotent upserts.
//!
//! Per-item failures are logged and skipped so one malformed record never
//! aborts a whole sync; a partially-applied sync is safe to resume because
//! every upsert is independently idempotent.

use crate::coordinator::SyncBackend;
use crate::models::{NewScoringPlay, StatLine};
use crate::resolver::EntityResolver;
use crate::store::Queries;
use crate::upstream::{ProviderClient, UpstreamScoringPlay};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};
use uuid::Uuid;

pub struct IngestionService {
    client: ProviderClient,
    store: Queries,
    resolver: EntityResolver,
}

impl IngestionService {
    pub fn new(client: ProviderClient, store: Queries, resolver: EntityResolver) -> Self {
        Self {
            client,
            store,
            resolver,
        }
    }

    async fn sync_game_summary(&self, game_id: Uuid, nfl_game_id: &str) -> Result<usize> {
        let summary = self
            .client
            .fetch_game_summary(nfl_game_id)
            .await
            .context("failed to fetch game summary")?;

        // Clean slate per game; re-syncs replace rather than accumulate.
        self.store.clear_scoring_plays(game_id).await?;

        let mut inserted = 0;
        for (index, play) in summary.scoring_plays.iter().enumerate() {
            let team_nfl_id: i32 = match play.team_id.parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(team_id = %play.team_id, "skipping play with invalid team id");
                    continue;
                }
            };
            let Some(team_id) = self.store.team_id_by_nfl_id(team_nfl_id).await? else {
                warn!(team_nfl_id, "skipping play for unknown team");
                continue;
            };

            let (scorer, assist) = parse_play_description(&play.text);

            // Resolution is best effort: unresolved names leave the link
            // columns empty while the description keeps the raw text.
            let mut scoring_player_id = None;
            if let Some(name) = &scorer {
                scoring_player_id = self.resolver.resolve_player(name, team_id).await?;
            }
            let mut assist_player_id = None;
            if let Some(name) = &assist {
                assist_player_id = self.resolver.resolve_player(name, team_id).await?;
            }

            self.store
                .insert_scoring_play(&build_scoring_play(
                    game_id,
                    team_id,
                    (index + 1) as i32,
                    play,
                    scoring_player_id,
                    assist_player_id,
                ))
                .await?;
            inserted += 1;
        }

        for line in &summary.player_stats {
            let team_nfl_id: i32 = match line.team_id.parse() {
                Ok(id) => id,
                Err(_) => continue,
            };
            let Some(team_id) = self.store.team_id_by_nfl_id(team_nfl_id).await? else {
                continue;
            };
            let player_id = self
                .resolver
                .resolve_player(&line.player_name, team_id)
                .await?;
            self.store
                .upsert_stat_line(&StatLine {
                    game_id,
                    team_id,
                    player_id,
                    player_name: line.player_name.clone(),
                    passing_yards: line.passing_yards,
                    rushing_yards: line.rushing_yards,
                    receiving_yards: line.receiving_yards,
                    touchdowns: line.touchdowns,
                })
                .await?;
        }

        Ok(inserted)
    }
}

#[async_trait]
impl SyncBackend for IngestionService {
    async fn catalog_size(&self) -> Result<i64> {
        Ok(self.store.team_count().await?)
    }

    async fn team_exists(&self, team_id: Uuid) -> Result<bool> {
        Ok(self.store.team_exists(team_id).await?)
    }

    async fn sync_teams(&self) -> Result<()> {
        info!("Starting teams sync");
        let response = self.client.fetch_teams().await?;
        if response.teams.is_empty() {
            return Err(anyhow!("no teams in upstream response"));
        }

        let mut upserted = 0;
        for team in &response.teams {
            if !team.active {
                continue;
            }
            let nfl_id: i32 = match team.id.parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(name = %team.name, "skipping team with invalid id");
                    continue;
                }
            };
            if let Err(e) = self
                .store
                .upsert_team(nfl_id, &team.name, &team.abbreviation, &team.location)
                .await
            {
                warn!(name = %team.name, error = %e, "failed to upsert team");
                continue;
            }
            upserted += 1;
        }

        info!(upserted, "Teams sync completed");
        Ok(())
    }

    async fn sync_rosters(&self) -> Result<()> {
        info!("Starting rosters sync");
        let teams = self.store.list_teams().await?;

        let mut upserted = 0;
        for team in &teams {
            let roster = match self.client.fetch_roster(team.nfl_id).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(team = %team.abbreviation, error = %e, "failed to fetch roster");
                    continue;
                }
            };
            for athlete in &roster.athletes {
                let nfl_id: i64 = match athlete.id.parse() {
                    Ok(id) => id,
                    Err(_) => {
                        warn!(name = %athlete.full_name, "skipping player with invalid id");
                        continue;
                    }
                };
                let jersey = athlete.jersey.as_deref().and_then(|j| j.parse().ok());
                if let Err(e) = self
                    .store
                    .upsert_player(
                        nfl_id,
                        &athlete.full_name,
                        athlete.position.as_deref(),
                        jersey,
                        team.id,
                    )
                    .await
                {
                    warn!(name = %athlete.full_name, error = %e, "failed to upsert player");
                    continue;
                }
                upserted += 1;
            }
        }

        info!(upserted, "Rosters sync completed");
        Ok(())
    }

    async fn sync_games(&self, season: i32, week: Option<i32>) -> Result<()> {
        info!(season, ?week, "Starting games sync");
        let scoreboard = self.client.fetch_scoreboard(season, week).await?;

        let mut upserted = 0;
        for event in &scoreboard.events {
            let home = match event.home_team_id.parse::<i32>() {
                Ok(id) => self.store.team_id_by_nfl_id(id).await?,
                Err(_) => None,
            };
            let away = match event.away_team_id.parse::<i32>() {
                Ok(id) => self.store.team_id_by_nfl_id(id).await?,
                Err(_) => None,
            };
            let (Some(home_team_id), Some(away_team_id)) = (home, away) else {
                warn!(event = %event.id, "skipping event with unknown team");
                continue;
            };

            let status = if event.completed {
                "completed"
            } else {
                "scheduled"
            };
            if let Err(e) = self
                .store
                .upsert_game(
                    &event.id,
                    season,
                    event.week,
                    home_team_id,
                    away_team_id,
                    event.home_score,
                    event.away_score,
                    event.date.unwrap_or_else(Utc::now),
                    status,
                )
                .await
            {
                warn!(event = %event.id, error = %e, "failed to upsert game");
                continue;
            }
            upserted += 1;
        }

        info!(season, upserted, "Games sync completed");
        Ok(())
    }

    async fn sync_stats(&self, season: i32, week: i32) -> Result<()> {
        info!(season, week, "Starting stats sync");
        let games = self.store.completed_games(season, week).await?;
        if games.is_empty() {
            info!(season, week, "No completed games to sync stats for");
            return Ok(());
        }

        let mut synced = 0;
        let mut total_plays = 0;
        for game in &games {
            match self.sync_game_summary(game.id, &game.nfl_game_id).await {
                Ok(plays) => {
                    synced += 1;
                    total_plays += plays;
                }
                Err(e) => {
                    warn!(game = %game.id, error = %e, "failed to sync game summary");
                }
            }
        }

        info!(
            synced,
            total = games.len(),
            total_plays,
            "Stats sync completed"
        );
        Ok(())
    }
}

/// Builds the insert payload for one scoring play. Player links may be
/// empty; the raw description always survives so unresolved names lose
/// nothing.
fn build_scoring_play(
    game_id: Uuid,
    team_id: Uuid,
    sequence: i32,
    play: &UpstreamScoringPlay,
    scoring_player_id: Option<Uuid>,
    assist_player_id: Option<Uuid>,
) -> NewScoringPlay {
    NewScoringPlay {
        game_id,
        team_id,
        quarter: play.quarter,
        time_remaining: play.clock.clone(),
        sequence,
        play_type: play.play_type.clone(),
        points: points_for(&play.play_type, &play.text),
        description: play.text.trim().to_string(),
        scoring_player_id,
        assist_player_id,
        home_score: play.home_score,
        away_score: play.away_score,
    }
}

fn passing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z.\-'\s]+?)\s+\d+\s+Yd\s+pass\s+from\s+([A-Za-z.\-'\s]+?)(?:\s+\(|$)")
            .expect("valid regex")
    })
}

fn rushing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z.\-'\s]+?)\s+\d+\s+Yd\s+Run(?:\s+\(|$)").expect("valid regex")
    })
}

fn field_goal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z.\-'\s]+?)\s+\d+\s+Yd\s+Field\s+Goal").expect("valid regex")
    })
}

fn defensive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([A-Za-z.\-'\s]+?)\s+\d+\s+Yd\s+(?:Fumble|Interception|Kickoff|Punt)\s+(?:Return|Recovered)",
        )
        .expect("valid regex")
    })
}

fn leading_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z.\-'\s]+?)\s+\d+").expect("valid regex"))
}

/// Extracts the scoring player and, for passing plays, the passer from a
/// play description.
///
/// "Travis Kelce 8 Yd pass from Patrick Mahomes (Harrison Butker Kick)"
/// yields ("Travis Kelce", "Patrick Mahomes"); "Derrick Henry 25 Yd Run"
/// yields just the runner.
pub fn parse_play_description(description: &str) -> (Option<String>, Option<String>) {
    let desc = description.trim();

    if let Some(captures) = passing_re().captures(desc) {
        return (
            captures.get(1).map(|m| m.as_str().trim().to_string()),
            captures.get(2).map(|m| m.as_str().trim().to_string()),
        );
    }
    for re in [rushing_re(), field_goal_re(), defensive_re(), leading_name_re()] {
        if let Some(captures) = re.captures(desc) {
            return (captures.get(1).map(|m| m.as_str().trim().to_string()), None);
        }
    }
    (None, None)
}

/// Point value of a scoring play, from the play type code when recognized,
/// otherwise inferred from the description.
pub fn points_for(play_type: &str, description: &str) -> i32 {
    match play_type {
        "TD" => 6,
        "FG" => 3,
        "XP" | "PAT" => 1,
        "2PT" => 2,
        "SF" | "SFTY" => 2,
        _ => {
            let lower = description.to_lowercase();
            if lower.contains("field goal") {
                3
            } else if lower.contains("touchdown") {
                6
            } else if lower.contains("safety") {
                2
            } else {
                0
            }
        }
    }
}
