//! Odds engine: projections in, publishable betting lines out.
//!
//! Deterministic: the same matchups, week and configuration always give
//! the same spread, total and moneyline prices.

pub mod american;
pub mod projection;
pub mod source;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{
    BettingLine, BookError, MatchupInput, MoneyLine, SpreadLine, TeamInput, TeamLine, TeamSide,
    TotalLine,
};
use american::{
    favorite_win_probability, probability_to_american, round_to_cents, round_to_half, spread_odds,
    STANDARD_VIG,
};
use projection::{ProjectionConfig, ProjectionModel};

pub struct OddsEngine {
    projections: ProjectionModel,
}

impl OddsEngine {
    pub fn new(config: ProjectionConfig) -> Self {
        Self {
            projections: ProjectionModel::new(config),
        }
    }

    /// Price every matchup of a week. Fails as a whole if any matchup is
    /// malformed or a matchup id repeats.
    pub fn generate_lines(
        &self,
        week: u32,
        matchups: &[MatchupInput],
        now: DateTime<Utc>,
    ) -> Result<Vec<BettingLine>, BookError> {
        if week == 0 {
            return Err(BookError::InvalidWeek(week));
        }

        let mut seen = HashSet::new();
        for m in matchups {
            if !seen.insert(m.matchup_id.as_str()) {
                return Err(BookError::InvalidMatchup {
                    matchup_id: m.matchup_id.clone(),
                    reason: "duplicate matchup id".into(),
                });
            }
        }

        let lines = matchups
            .iter()
            .map(|m| self.generate_line(week, m, now))
            .collect::<Result<Vec<_>, _>>()?;

        info!(week, count = lines.len(), "Lines generated");
        Ok(lines)
    }

    /// Project both teams and price the matchup.
    pub fn generate_line(
        &self,
        week: u32,
        matchup: &MatchupInput,
        now: DateTime<Utc>,
    ) -> Result<BettingLine, BookError> {
        if week == 0 {
            return Err(BookError::InvalidWeek(week));
        }
        validate_matchup(matchup)?;

        let team_a = self.team_line(week, &matchup.team_a);
        let team_b = self.team_line(week, &matchup.team_b);
        Ok(price_line(&matchup.matchup_id, week, team_a, team_b, now))
    }

    fn team_line(&self, week: u32, team: &TeamInput) -> TeamLine {
        TeamLine {
            team_id: team.team_id.clone(),
            name: team.name.clone(),
            owner: team.owner.clone(),
            projected: round_to_cents(self.projections.project(week, team)),
            record: team.record.clone(),
        }
    }
}

/// Price a matchup from already-projected team scores.
///
/// Equal projections give a pick'em spread; the team with the lower
/// team id is listed as the favorite so the result never depends on
/// input order.
pub fn price_line(
    matchup_id: &str,
    week: u32,
    team_a: TeamLine,
    team_b: TeamLine,
    now: DateTime<Utc>,
) -> BettingLine {
    let favorite = if team_a.projected > team_b.projected {
        TeamSide::A
    } else if team_b.projected > team_a.projected {
        TeamSide::B
    } else if team_a.team_id <= team_b.team_id {
        TeamSide::A
    } else {
        TeamSide::B
    };

    let spread = round_to_half((team_a.projected - team_b.projected).abs());
    let p_favorite = favorite_win_probability(spread);
    let favorite_ml = probability_to_american(p_favorite);
    let underdog_ml = probability_to_american(1.0 - p_favorite);
    let (team_a_odds, team_b_odds) = match favorite {
        TeamSide::A => (favorite_ml, underdog_ml),
        TeamSide::B => (underdog_ml, favorite_ml),
    };
    let favorite_id = match favorite {
        TeamSide::A => team_a.team_id.clone(),
        TeamSide::B => team_b.team_id.clone(),
    };
    let total = round_to_cents(team_a.projected + team_b.projected);

    debug!(
        matchup_id,
        week,
        spread,
        favorite = %favorite_id,
        total,
        team_a_odds,
        team_b_odds,
        "Matchup priced"
    );

    BettingLine {
        line_id: Uuid::new_v4().to_string(),
        matchup_id: matchup_id.to_string(),
        week,
        team_a,
        team_b,
        spread: SpreadLine {
            favorite,
            favorite_id,
            line: spread,
            odds: spread_odds(spread),
        },
        total: TotalLine {
            line: total,
            over_odds: STANDARD_VIG,
            under_odds: STANDARD_VIG,
        },
        moneyline: MoneyLine { team_a_odds, team_b_odds },
        generated_at: now,
    }
}

fn validate_matchup(matchup: &MatchupInput) -> Result<(), BookError> {
    let invalid = |reason: String| BookError::InvalidMatchup {
        matchup_id: matchup.matchup_id.clone(),
        reason,
    };

    if matchup.matchup_id.trim().is_empty() {
        return Err(invalid("empty matchup id".into()));
    }
    if matchup.team_a.team_id == matchup.team_b.team_id {
        return Err(invalid(format!("team {} cannot play itself", matchup.team_a.team_id)));
    }
    for team in [&matchup.team_a, &matchup.team_b] {
        if let Some(score) = team.recent_score {
            if !score.is_finite() || score < 0.0 {
                return Err(invalid(format!("team {} has invalid score {score}", team.team_id)));
            }
        }
        if team.starter_points.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(invalid(format!("team {} has invalid starter points", team.team_id)));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
