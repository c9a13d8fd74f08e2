//! Canonical store queries.
//!
//! Reads used by handlers and the fetch coordinator, plus the idempotent
//! upserts the sync executor converges through. Every upsert is safe to
//! repeat, which is what makes partially-failed syncs resumable.

use crate::models::{Game, GameFilters, NewScoringPlay, Player, PlayerFilters, StatLine, Team};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct Queries {
    pool: PgPool,
}

impl Queries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn team_count(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM teams")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn team_exists(&self, id: Uuid) -> sqlx::Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM teams WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_teams(&self) -> sqlx::Result<Vec<Team>> {
        sqlx::query_as(
            "SELECT id, nfl_id, name, abbreviation, city FROM teams ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn team_id_by_nfl_id(&self, nfl_id: i32) -> sqlx::Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM teams WHERE nfl_id = $1")
            .bind(nfl_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn list_games(&self, filters: &GameFilters) -> sqlx::Result<(Vec<Game>, i64)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM games
            WHERE ($1::int IS NULL OR season = $1)
              AND ($2::int IS NULL OR week = $2)
              AND ($3::uuid IS NULL OR home_team_id = $3 OR away_team_id = $3)
            "#,
        )
        .bind(filters.season)
        .bind(filters.week)
        .bind(filters.team)
        .fetch_one(&self.pool)
        .await?;

        let games: Vec<Game> = sqlx::query_as(
            r#"
            SELECT id, nfl_game_id, season, week, home_team_id, away_team_id,
                   home_score, away_score, game_date, status
            FROM games
            WHERE ($1::int IS NULL OR season = $1)
              AND ($2::int IS NULL OR week = $2)
              AND ($3::uuid IS NULL OR home_team_id = $3 OR away_team_id = $3)
            ORDER BY game_date DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filters.season)
        .bind(filters.week)
        .bind(filters.team)
        .bind(filters.limit)
        .bind(filters.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((games, total))
    }

    pub async fn list_players(
        &self,
        filters: &PlayerFilters,
    ) -> sqlx::Result<(Vec<Player>, i64)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM players
            WHERE ($1::uuid IS NULL OR team_id = $1)
              AND ($2::text IS NULL OR position = $2)
            "#,
        )
        .bind(filters.team)
        .bind(filters.position.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let players: Vec<Player> = sqlx::query_as(
            r#"
            SELECT id, nfl_id, name, position, jersey_number, team_id
            FROM players
            WHERE ($1::uuid IS NULL OR team_id = $1)
              AND ($2::text IS NULL OR position = $2)
            ORDER BY name
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filters.team)
        .bind(filters.position.as_deref())
        .bind(filters.limit)
        .bind(filters.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((players, total))
    }

    pub async fn list_stat_lines(
        &self,
        season: i32,
        week: i32,
        limit: i64,
        offset: i64,
    ) -> sqlx::Result<(Vec<StatLine>, i64)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM stat_lines sl
            JOIN games g ON g.id = sl.game_id
            WHERE g.season = $1 AND g.week = $2
            "#,
        )
        .bind(season)
        .bind(week)
        .fetch_one(&self.pool)
        .await?;

        let lines: Vec<StatLine> = sqlx::query_as(
            r#"
            SELECT sl.game_id, sl.team_id, sl.player_id, sl.player_name,
                   sl.passing_yards, sl.rushing_yards, sl.receiving_yards, sl.touchdowns
            FROM stat_lines sl
            JOIN games g ON g.id = sl.game_id
            WHERE g.season = $1 AND g.week = $2
            ORDER BY sl.player_name
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(season)
        .bind(week)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((lines, total))
    }

    pub async fn completed_games(&self, season: i32, week: i32) -> sqlx::Result<Vec<Game>> {
        sqlx::query_as(
            r#"
            SELECT id, nfl_game_id, season, week, home_team_id, away_team_id,
                   home_score, away_score, game_date, status
            FROM games
            WHERE season = $1 AND week = $2 AND status = 'completed'
            ORDER BY game_date
            "#,
        )
        .bind(season)
        .bind(week)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn upsert_team(
        &self,
        nfl_id: i32,
        name: &str,
        abbreviation: &str,
        city: &str,
    ) -> sqlx::Result<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO teams (id, nfl_id, name, abbreviation, city, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (nfl_id) DO UPDATE SET
                name = EXCLUDED.name,
                abbreviation = EXCLUDED.abbreviation,
                city = EXCLUDED.city,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(nfl_id)
        .bind(name)
        .bind(abbreviation)
        .bind(city)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn upsert_player(
        &self,
        nfl_id: i64,
        name: &str,
        position: Option<&str>,
        jersey_number: Option<i32>,
        team_id: Uuid,
    ) -> sqlx::Result<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO players (id, nfl_id, name, position, jersey_number, team_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (nfl_id) DO UPDATE SET
                name = EXCLUDED.name,
                position = EXCLUDED.position,
                jersey_number = EXCLUDED.jersey_number,
                team_id = EXCLUDED.team_id,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(nfl_id)
        .bind(name)
        .bind(position)
        .bind(jersey_number)
        .bind(team_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_game(
        &self,
        nfl_game_id: &str,
        season: i32,
        week: i32,
        home_team_id: Uuid,
        away_team_id: Uuid,
        home_score: Option<i32>,
        away_score: Option<i32>,
        game_date: DateTime<Utc>,
        status: &str,
    ) -> sqlx::Result<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO games (id, nfl_game_id, season, week, home_team_id, away_team_id,
                               home_score, away_score, game_date, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            ON CONFLICT (nfl_game_id) DO UPDATE SET
                season = EXCLUDED.season,
                week = EXCLUDED.week,
                home_team_id = EXCLUDED.home_team_id,
                away_team_id = EXCLUDED.away_team_id,
                home_score = EXCLUDED.home_score,
                away_score = EXCLUDED.away_score,
                game_date = EXCLUDED.game_date,
                status = EXCLUDED.status,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(nfl_game_id)
        .bind(season)
        .bind(week)
        .bind(home_team_id)
        .bind(away_team_id)
        .bind(home_score)
        .bind(away_score)
        .bind(game_date)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Scoring plays are replaced wholesale per game on re-sync.
    pub async fn clear_scoring_plays(&self, game_id: Uuid) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM scoring_plays WHERE game_id = $1")
            .bind(game_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_scoring_play(&self, play: &NewScoringPlay) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scoring_plays (
                game_id, team_id, quarter, time_remaining, sequence_number,
                play_type, points, description,
                scoring_player_id, assist_player_id,
                home_score, away_score, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            "#,
        )
        .bind(play.game_id)
        .bind(play.team_id)
        .bind(play.quarter)
        .bind(&play.time_remaining)
        .bind(play.sequence)
        .bind(&play.play_type)
        .bind(play.points)
        .bind(&play.description)
        .bind(play.scoring_player_id)
        .bind(play.assist_player_id)
        .bind(play.home_score)
        .bind(play.away_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_stat_line(&self, line: &StatLine) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stat_lines (game_id, team_id, player_id, player_name,
                                    passing_yards, rushing_yards, receiving_yards, touchdowns)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (game_id, player_name) DO UPDATE SET
                team_id = EXCLUDED.team_id,
                player_id = EXCLUDED.player_id,
                passing_yards = EXCLUDED.passing_yards,
                rushing_yards = EXCLUDED.rushing_yards,
                receiving_yards = EXCLUDED.receiving_yards,
                touchdowns = EXCLUDED.touchdowns
            "#,
        )
        .bind(line.game_id)
        .bind(line.team_id)
        .bind(line.player_id)
        .bind(&line.player_name)
        .bind(line.passing_yards)
        .bind(line.rushing_yards)
        .bind(line.receiving_yards)
        .bind(line.touchdowns)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
