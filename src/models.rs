use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Team {
    pub id: Uuid,
    pub nfl_id: i32,
    pub name: String,
    pub abbreviation: String,
    pub city: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Player {
    pub id: Uuid,
    pub nfl_id: i64,
    pub name: String,
    pub position: Option<String>,
    pub jersey_number: Option<i32>,
    pub team_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Game {
    pub id: Uuid,
    pub nfl_game_id: String,
    pub season: i32,
    pub week: i32,
    pub home_team_id: Uuid,
    pub away_team_id: Uuid,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub game_date: DateTime<Utc>,
    pub status: String,
}

/// A per-player, per-game stat line. `player_id` stays empty when the
/// resolver could not link the upstream name; `player_name` always keeps
/// the raw text so nothing is lost.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StatLine {
    pub game_id: Uuid,
    pub team_id: Uuid,
    pub player_id: Option<Uuid>,
    pub player_name: String,
    pub passing_yards: i32,
    pub rushing_yards: i32,
    pub receiving_yards: i32,
    pub touchdowns: i32,
}

/// Insert payload for a scoring play. As with stat lines, the description
/// keeps the raw upstream text even when player links are unresolved.
#[derive(Debug, Clone)]
pub struct NewScoringPlay {
    pub game_id: Uuid,
    pub team_id: Uuid,
    pub quarter: i32,
    pub time_remaining: String,
    pub sequence: i32,
    pub play_type: String,
    pub points: i32,
    pub description: String,
    pub scoring_player_id: Option<Uuid>,
    pub assist_player_id: Option<Uuid>,
    pub home_score: i32,
    pub away_score: i32,
}

#[derive(Debug, Clone, Default)]
pub struct GameFilters {
    pub season: Option<i32>,
    pub week: Option<i32>,
    pub team: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PlayerFilters {
    pub team: Option<Uuid>,
    pub position: Option<String>,
    pub limit: i64,
    pub offset: i64,
}
