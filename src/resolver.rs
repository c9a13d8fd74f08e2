//! Entity resolution: mapping loosely-formatted upstream player names to
//! canonical player ids.
//!
//! Three tiers, first hit wins:
//!   1. exact full-name match (case-insensitive) within the hinted team,
//!   2. surname match within the hinted team,
//!   3. exact full-name match with no team scope (covers stale hints,
//!      e.g. a player traded mid-season).
//!
//! Ambiguous matches are broken by ascending player id so resolution is
//! reproducible. True disambiguation would need a signal not modeled here
//! (position, jersey number). Failure to resolve is never an error: callers
//! persist their record anyway with the raw text retained and the link
//! column left empty.

use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlayerCandidate {
    pub id: Uuid,
    pub name: String,
}

/// Tier 1: case-insensitive exact match, smallest id on ties.
fn exact_match(candidates: &[PlayerCandidate], raw: &str) -> Option<Uuid> {
    candidates
        .iter()
        .filter(|c| c.name.eq_ignore_ascii_case(raw))
        .map(|c| c.id)
        .min()
}

/// Tier 2: surname-style match on the final token, smallest id on ties.
fn surname_match(candidates: &[PlayerCandidate], raw: &str) -> Option<Uuid> {
    let surname = raw.split_whitespace().next_back()?.to_lowercase();
    candidates
        .iter()
        .filter(|c| c.name.to_lowercase().contains(&surname))
        .map(|c| c.id)
        .min()
}

/// Runs the scoped tiers against an in-memory candidate set.
pub fn resolve_among(candidates: &[PlayerCandidate], raw: &str) -> Option<Uuid> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    exact_match(candidates, raw).or_else(|| surname_match(candidates, raw))
}

#[derive(Clone)]
pub struct EntityResolver {
    pool: PgPool,
}

impl EntityResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve `raw` against `team_id`'s current roster, falling back to an
    /// unscoped exact match. `Ok(None)` means unresolved.
    pub async fn resolve_player(
        &self,
        raw: &str,
        team_id: Uuid,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let roster: Vec<PlayerCandidate> = sqlx::query_as(
            "SELECT id, name FROM players WHERE team_id = $1 ORDER BY id",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        if let Some(id) = resolve_among(&roster, raw) {
            return Ok(Some(id));
        }

        // Tier 3: the scope hint may be stale.
        let unscoped: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM players WHERE LOWER(name) = LOWER($1) ORDER BY id LIMIT 1",
        )
        .bind(raw.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(unscoped.map(|(id,)| id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u128, name: &str) -> PlayerCandidate {
        PlayerCandidate {
            id: Uuid::from_u128(id),
            name: name.to_string(),
        }
    }

    fn kc_roster() -> Vec<PlayerCandidate> {
        vec![
            candidate(1, "Patrick Mahomes"),
            candidate(2, "Travis Kelce"),
            candidate(3, "Harrison Butker"),
        ]
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let roster = kc_roster();
        assert_eq!(
            resolve_among(&roster, "travis kelce"),
            Some(Uuid::from_u128(2))
        );
        assert_eq!(
            resolve_among(&roster, "PATRICK MAHOMES"),
            Some(Uuid::from_u128(1))
        );
    }

    #[test]
    fn surname_fallback_matches_final_token() {
        let roster = kc_roster();
        // "T. Kelce" fails tier 1, hits tier 2 on the surname.
        assert_eq!(resolve_among(&roster, "T. Kelce"), Some(Uuid::from_u128(2)));
    }

    #[test]
    fn unknown_name_is_unresolved() {
        assert_eq!(resolve_among(&kc_roster(), "Josh Allen"), None);
        assert_eq!(resolve_among(&kc_roster(), ""), None);
        assert_eq!(resolve_among(&kc_roster(), "   "), None);
    }

    #[test]
    fn ambiguous_surname_breaks_ties_by_id() {
        let roster = vec![
            candidate(9, "Derrick Smith"),
            candidate(4, "Jalen Smith"),
            candidate(7, "Marcus Smith"),
        ];
        // Same result regardless of roster order.
        assert_eq!(resolve_among(&roster, "C. Smith"), Some(Uuid::from_u128(4)));
        let mut reversed = roster.clone();
        reversed.reverse();
        assert_eq!(
            resolve_among(&reversed, "C. Smith"),
            Some(Uuid::from_u128(4))
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let roster = kc_roster();
        let first = resolve_among(&roster, "Kelce");
        let second = resolve_among(&roster, "Kelce");
        assert_eq!(first, second);
    }

    #[test]
    fn exact_beats_surname() {
        // "Marcus Jones" exists exactly; surname tier would also match
        // "DeAndre Jones" with a smaller id, but tier 1 wins outright.
        let roster = vec![
            candidate(1, "DeAndre Jones"),
            candidate(5, "Marcus Jones"),
        ];
        assert_eq!(
            resolve_among(&roster, "Marcus Jones"),
            Some(Uuid::from_u128(5))
        );
    }
}
