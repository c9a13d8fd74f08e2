//! Upstream provider HTTP client.
//!
//! Thin typed wrapper over the provider's JSON endpoints with rate limiting
//! and bounded retry. Only the fields the sync executor consumes are
//! modeled; everything else in the payloads is ignored.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{info, warn};

const USER_AGENT: &str = "GridIronStats/1.0";
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TeamsResponse {
    pub teams: Vec<UpstreamTeam>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamTeam {
    pub id: String,
    pub name: String,
    pub abbreviation: String,
    pub location: String,
    pub active: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RosterResponse {
    pub athletes: Vec<UpstreamAthlete>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamAthlete {
    pub id: String,
    pub full_name: String,
    pub position: Option<String>,
    pub jersey: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ScoreboardResponse {
    pub events: Vec<UpstreamEvent>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamEvent {
    pub id: String,
    pub date: Option<DateTime<Utc>>,
    pub week: i32,
    pub home_team_id: String,
    pub away_team_id: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub completed: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct GameSummaryResponse {
    pub scoring_plays: Vec<UpstreamScoringPlay>,
    pub player_stats: Vec<UpstreamStatLine>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamScoringPlay {
    pub team_id: String,
    pub quarter: i32,
    pub clock: String,
    pub play_type: String,
    pub text: String,
    pub home_score: i32,
    pub away_score: i32,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamStatLine {
    pub team_id: String,
    pub player_name: String,
    pub passing_yards: i32,
    pub rushing_yards: i32,
    pub receiving_yards: i32,
    pub touchdowns: i32,
}

pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl ProviderClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        // 60 requests per minute keeps us well under the provider's limit.
        let rate_limiter = RateLimiter::direct(Quota::per_minute(
            NonZeroU32::new(60).expect("nonzero quota"),
        ));

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let response = match self.http.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    if attempt == MAX_RETRIES - 1 {
                        return Err(e)
                            .context(format!("request failed after {} attempts", MAX_RETRIES));
                    }
                    warn!(url = %url, attempt, error = %e, "upstream request failed, retrying");
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt) + 1)).await;
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.as_u16() == 429 {
                if attempt == MAX_RETRIES - 1 {
                    return Err(anyhow!("rate limited after {} attempts", MAX_RETRIES));
                }
                warn!(url = %url, attempt, "upstream rate limited, backing off");
                tokio::time::sleep(Duration::from_secs((u64::from(attempt) + 2) * 2)).await;
                continue;
            }

            if !status.is_success() {
                return Err(anyhow!("upstream returned status {}: {}", status, body));
            }

            return serde_json::from_str(&body).context("Failed to parse upstream response");
        }

        Err(anyhow!("request failed after retries"))
    }

    pub async fn fetch_teams(&self) -> Result<TeamsResponse> {
        let response: TeamsResponse = self
            .get_json("/apis/site/v2/sports/football/nfl/teams")
            .await?;
        info!("Fetched {} teams from upstream", response.teams.len());
        Ok(response)
    }

    pub async fn fetch_roster(&self, team_nfl_id: i32) -> Result<RosterResponse> {
        self.get_json(&format!(
            "/apis/site/v2/sports/football/nfl/teams/{}/roster",
            team_nfl_id
        ))
        .await
    }

    pub async fn fetch_scoreboard(
        &self,
        season: i32,
        week: Option<i32>,
    ) -> Result<ScoreboardResponse> {
        let path = match week {
            Some(week) => format!(
                "/apis/site/v2/sports/football/nfl/scoreboard?season={}&week={}",
                season, week
            ),
            None => format!(
                "/apis/site/v2/sports/football/nfl/scoreboard?season={}",
                season
            ),
        };
        let response: ScoreboardResponse = self.get_json(&path).await?;
        info!(
            season,
            week = week.unwrap_or_default(),
            "Fetched {} events from upstream",
            response.events.len()
        );
        Ok(response)
    }

    pub async fn fetch_game_summary(&self, event_id: &str) -> Result<GameSummaryResponse> {
        self.get_json(&format!(
            "/apis/site/v2/sports/football/nfl/summary?event={}",
            event_id
        ))
        .await
    }
}
