//! Eligibility policy for automatic data repair.
//!
//! Pure decision functions: given a resource class and temporal parameters,
//! is an auto-fetch permitted? Handlers and the fetch coordinator funnel
//! every "should we reach upstream" question through here so the rules live
//! in one testable place instead of scattered conditionals.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

/// Auto-repair may reach back one season, but only this far into the new one.
pub const PRIOR_SEASON_GRACE_WEEKS: i32 = 4;

/// A complete team catalog. Fewer rows than this means the catalog needs a sync.
pub const MIN_TEAM_COUNT: i64 = 32;

/// Week range accepted when reaching back into the prior season.
pub const MAX_REGULAR_SEASON_WEEK: i32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonPhase {
    Offseason,
    Preseason,
    Regular,
    Postseason,
}

/// Where the wall clock falls in the NFL calendar.
///
/// The season year is the year the season starts in: September 2025 through
/// February 2026 is all season 2025.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SeasonInfo {
    pub year: i32,
    pub week: i32,
    pub phase: SeasonPhase,
}

impl SeasonInfo {
    pub fn current() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        let (year, month, day) = (now.year(), now.month(), now.day());

        let season_year = if month >= 9 {
            year
        } else if month <= 2 {
            year - 1
        } else {
            return Self {
                year,
                week: 0,
                phase: SeasonPhase::Offseason,
            };
        };

        let (week, phase) = if month == 9 && day < 5 {
            (0, SeasonPhase::Preseason)
        } else if (9..=12).contains(&month) {
            (week_of(season_year, now), SeasonPhase::Regular)
        } else if month == 1 {
            let week = week_of(season_year, now);
            if week <= MAX_REGULAR_SEASON_WEEK {
                (week, SeasonPhase::Regular)
            } else {
                (week, SeasonPhase::Postseason)
            }
        } else if month == 2 && day <= 15 {
            // Super Bowl window
            (22, SeasonPhase::Postseason)
        } else {
            (0, SeasonPhase::Offseason)
        };

        Self {
            year: season_year,
            week,
            phase,
        }
    }
}

/// Week of the season, counted from the first Thursday of September and
/// clamped to [1, 22].
fn week_of(season_year: i32, now: DateTime<Utc>) -> i32 {
    let Some(start) = season_start(season_year) else {
        return 1;
    };
    let days = (now.date_naive() - start).num_days();
    (days / 7 + 1).clamp(1, 22) as i32
}

fn season_start(season_year: i32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(season_year, 9, 1)?;
    let offset = (Weekday::Thu.num_days_from_monday() + 7
        - first.weekday().num_days_from_monday())
        % 7;
    Some(first + Duration::days(i64::from(offset)))
}

/// Temporal parameters the policy decisions are evaluated against.
/// Recomputed from the wall clock per call site; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityWindow {
    pub season: i32,
    pub week: i32,
}

impl EligibilityWindow {
    pub fn current() -> Self {
        let info = SeasonInfo::current();
        Self {
            season: info.year,
            week: info.week,
        }
    }

    /// Whether a season, independent of week, is inside the auto-fetch
    /// window: the current season always, the prior season only during the
    /// first few weeks of the new one.
    pub fn season_in_window(&self, season: i32) -> bool {
        if season == self.season {
            return true;
        }
        season == self.season - 1 && self.week <= PRIOR_SEASON_GRACE_WEEKS
    }

    /// Whether games (or per-game stats) for `season`/`week` may be fetched.
    /// The current season is always fetchable, postseason weeks included;
    /// prior-season fetches are limited to regular-season weeks.
    pub fn games_fetch_allowed(&self, season: i32, week: i32) -> bool {
        if season == self.season {
            return true;
        }
        (1..=MAX_REGULAR_SEASON_WEEK).contains(&week) && self.season_in_window(season)
    }

    /// Whether the team catalog may be (re)fetched given its current size.
    pub fn catalog_fetch_allowed(current_count: i64) -> bool {
        current_count < MIN_TEAM_COUNT
    }

    /// Rosters are only fetchable for a team that already exists.
    pub fn membership_fetch_allowed(scope_exists: bool) -> bool {
        scope_exists
    }
}
