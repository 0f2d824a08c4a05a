//! Weekly projection model.
//!
//! Turns a team's raw scoring data into the point estimate the odds engine
//! prices from: a base figure, a season-phase adjustment, and a small bonus
//! for balanced production across starters.

use tracing::debug;

use crate::types::TeamInput;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Fallback base projection and mean-reversion target.
    pub league_average: f64,
    /// Weight of the league average during the early season.
    pub reversion_weight: f64,
    /// Last week of the early season (mean reversion applies through it).
    pub early_season_end: u32,
    /// First week of the playoff boost.
    pub playoff_start: u32,
    /// Multiplicative boost from `playoff_start` onward.
    pub playoff_boost: f64,
    pub balance_adjustment: bool,
    /// Adjustment = `balance_scale / cv`, before the cap.
    pub balance_scale: f64,
    pub balance_cap: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            league_average: 95.0,
            reversion_weight: 0.15,
            early_season_end: 4,
            playoff_start: 13,
            playoff_boost: 0.05,
            balance_adjustment: true,
            balance_scale: 0.1,
            balance_cap: 0.5,
        }
    }
}

/// Which part of the season a week falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonPhase {
    Early,
    Regular,
    Playoffs,
}

impl SeasonPhase {
    pub fn for_week(week: u32, config: &ProjectionConfig) -> Self {
        if week <= config.early_season_end {
            SeasonPhase::Early
        } else if week < config.playoff_start {
            SeasonPhase::Regular
        } else {
            SeasonPhase::Playoffs
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

pub struct ProjectionModel {
    config: ProjectionConfig,
}

impl ProjectionModel {
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    /// Full projection for `team` in `week`.
    pub fn project(&self, week: u32, team: &TeamInput) -> f64 {
        let base = team.recent_score.unwrap_or(self.config.league_average);
        let phased = self.apply_phase(week, base);
        let balance = if self.config.balance_adjustment {
            self.balance_adjustment(&team.starter_points)
        } else {
            0.0
        };

        debug!(
            team_id = %team.team_id,
            week,
            base,
            phased,
            balance,
            "Projected team score"
        );

        phased + balance
    }

    /// Mean reversion early, pass-through mid-season, boost in the playoffs.
    pub fn apply_phase(&self, week: u32, base: f64) -> f64 {
        match SeasonPhase::for_week(week, &self.config) {
            SeasonPhase::Early => {
                let w = self.config.reversion_weight;
                (1.0 - w) * base + w * self.config.league_average
            }
            SeasonPhase::Regular => base,
            SeasonPhase::Playoffs => base * (1.0 + self.config.playoff_boost),
        }
    }

    /// Small upward nudge for teams whose starters scored evenly.
    ///
    /// Proportional to the inverse coefficient of variation, capped at
    /// `balance_cap`. Needs at least two scores with a positive mean.
    pub fn balance_adjustment(&self, scores: &[f64]) -> f64 {
        match coefficient_of_variation(scores) {
            Some(cv) if cv > 0.0 => (self.config.balance_scale / cv).min(self.config.balance_cap),
            Some(_) => self.config.balance_cap,
            None => 0.0,
        }
    }
}

/// Population standard deviation divided by the mean.
pub fn coefficient_of_variation(scores: &[f64]) -> Option<f64> {
    if scores.len() < 2 {
        return None;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return None;
    }
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() / mean)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
