//! Shared types for the FAAB book.
//!
//! These types form the data model used across all modules: the odds
//! engine produces `BettingLine`s, the wager and settlement services move
//! money between `Participant` balances, and every movement leaves a
//! `LedgerTransaction` behind.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Convert stored hundredths of a FAAB unit into a decimal amount.
pub fn cents_to_units(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Convert a decimal amount into hundredths, rounding half away from zero.
/// Amounts that do not fit the stored `i64` are `BookError::Corrupt`.
pub fn units_to_cents(amount: Decimal) -> Result<i64, BookError> {
    amount
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .checked_mul(dec!(100))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| BookError::Corrupt(format!("amount {amount} is out of range")))
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which market of a betting line a wager is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetType {
    Spread,
    Total,
    Moneyline,
}

impl BetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::Spread => "spread",
            BetType::Total => "total",
            BetType::Moneyline => "moneyline",
        }
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BetType {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spread" | "ats" => Ok(BetType::Spread),
            "total" | "over_under" | "ou" => Ok(BetType::Total),
            "moneyline" | "ml" => Ok(BetType::Moneyline),
            _ => Err(BookError::InvalidBetType(s.to_string())),
        }
    }
}

/// One of the two teams in a matchup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamSide {
    A,
    B,
}

impl TeamSide {
    pub fn other(&self) -> Self {
        match self {
            TeamSide::A => TeamSide::B,
            TeamSide::B => TeamSide::A,
        }
    }
}

/// What the bettor picked. Team picks apply to spread and moneyline,
/// over/under picks apply to totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    TeamA,
    TeamB,
    Over,
    Under,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::TeamA => "team_a",
            Selection::TeamB => "team_b",
            Selection::Over => "over",
            Selection::Under => "under",
        }
    }

    /// The team this selection backs, if it is a team pick.
    pub fn team_side(&self) -> Option<TeamSide> {
        match self {
            Selection::TeamA => Some(TeamSide::A),
            Selection::TeamB => Some(TeamSide::B),
            Selection::Over | Selection::Under => None,
        }
    }

    pub fn is_valid_for(&self, bet_type: BetType) -> bool {
        match bet_type {
            BetType::Spread | BetType::Moneyline => self.team_side().is_some(),
            BetType::Total => self.team_side().is_none(),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Selection {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "team_a" | "a" => Ok(Selection::TeamA),
            "team_b" | "b" => Ok(Selection::TeamB),
            "over" | "o" => Ok(Selection::Over),
            "under" | "u" => Ok(Selection::Under),
            _ => Err(BookError::UnknownSelection(s.to_string())),
        }
    }
}

/// Lifecycle of a wager. Moves out of `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    Push,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "pending",
            WagerStatus::Won => "won",
            WagerStatus::Lost => "lost",
            WagerStatus::Push => "push",
        }
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

impl std::str::FromStr for WagerStatus {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WagerStatus::Pending),
            "won" => Ok(WagerStatus::Won),
            "lost" => Ok(WagerStatus::Lost),
            "push" => Ok(WagerStatus::Push),
            _ => Err(BookError::Corrupt(format!("unknown wager status '{s}'"))),
        }
    }
}

/// Final result of a wager, supplied at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Won,
    Lost,
    Push,
}

impl From<Outcome> for WagerStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Won => WagerStatus::Won,
            Outcome::Lost => WagerStatus::Lost,
            Outcome::Push => WagerStatus::Push,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&WagerStatus::from(*self), f)
    }
}

impl std::str::FromStr for Outcome {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "won" | "win" => Ok(Outcome::Won),
            "lost" | "loss" => Ok(Outcome::Lost),
            "push" => Ok(Outcome::Push),
            _ => Err(BookError::InvalidOutcome(s.to_string())),
        }
    }
}

/// Why a participant's balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxReason {
    /// Starting FAAB granted when the participant is first synced.
    Opening,
    BetPlaced,
    BetWon,
    BetLost,
    BetPush,
}

impl TxReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxReason::Opening => "opening",
            TxReason::BetPlaced => "bet_placed",
            TxReason::BetWon => "bet_won",
            TxReason::BetLost => "bet_lost",
            TxReason::BetPush => "bet_push",
        }
    }

    /// Ledger reason recorded when a wager settles with `outcome`.
    pub fn for_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Won => TxReason::BetWon,
            Outcome::Lost => TxReason::BetLost,
            Outcome::Push => TxReason::BetPush,
        }
    }
}

impl fmt::Display for TxReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TxReason {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opening" => Ok(TxReason::Opening),
            "bet_placed" => Ok(TxReason::BetPlaced),
            "bet_won" => Ok(TxReason::BetWon),
            "bet_lost" => Ok(TxReason::BetLost),
            "bet_push" => Ok(TxReason::BetPush),
            _ => Err(BookError::Corrupt(format!("unknown ledger reason '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Participants & ledger
// ---------------------------------------------------------------------------

/// A league member holding a FAAB balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    /// Cached projection of the ledger; always equals the sum of the
    /// participant's transactions.
    pub balance: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) balance={:.2}{}",
            self.display_name,
            self.id,
            self.balance,
            if self.active { "" } else { " [inactive]" },
        )
    }
}

/// Append-only record of a single balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: i64,
    pub participant_id: String,
    /// Signed amount: negative for stakes, positive for payouts, zero for
    /// losing settlements.
    pub amount: Decimal,
    pub reason: TxReason,
    pub wager_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A participant whose cached balance disagrees with their ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDiscrepancy {
    pub participant_id: String,
    pub balance: Decimal,
    pub ledger_sum: Decimal,
}

// ---------------------------------------------------------------------------
// Projection inputs
// ---------------------------------------------------------------------------

/// Season aggregates supplied by the roster data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonRecord {
    pub wins: u32,
    pub losses: u32,
    pub points_for: f64,
    pub points_against: f64,
}

impl fmt::Display for SeasonRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.wins, self.losses)
    }
}

/// One team's weekly scoring data as delivered by the projection source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamInput {
    pub team_id: String,
    pub name: String,
    pub owner: String,
    /// Most recent (or custom) team point total. `None` falls back to the
    /// league average.
    #[serde(default)]
    pub recent_score: Option<f64>,
    /// Individual starter contributions from the most recent week.
    #[serde(default)]
    pub starter_points: Vec<f64>,
    #[serde(default)]
    pub record: SeasonRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupInput {
    pub matchup_id: String,
    pub team_a: TeamInput,
    pub team_b: TeamInput,
}

// ---------------------------------------------------------------------------
// Betting lines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamLine {
    pub team_id: String,
    pub name: String,
    pub owner: String,
    pub projected: f64,
    #[serde(default)]
    pub record: SeasonRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadLine {
    pub favorite: TeamSide,
    pub favorite_id: String,
    /// Non-negative margin the favorite must cover, in half points.
    pub line: f64,
    pub odds: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalLine {
    pub line: f64,
    pub over_odds: i32,
    pub under_odds: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyLine {
    pub team_a_odds: i32,
    pub team_b_odds: i32,
}

/// Published spread, total and moneyline for one matchup in one week.
///
/// Immutable once published. Regeneration publishes a new instance with a
/// fresh `line_id` under the same `matchup_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BettingLine {
    pub line_id: String,
    pub matchup_id: String,
    pub week: u32,
    pub team_a: TeamLine,
    pub team_b: TeamLine,
    pub spread: SpreadLine,
    pub total: TotalLine,
    pub moneyline: MoneyLine,
    pub generated_at: DateTime<Utc>,
}

impl fmt::Display for BettingLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fav = self.team(self.spread.favorite);
        write!(
            f,
            "[wk{} {}] {} vs {} | {} -{:.1} ({}) | O/U {:.2} | ML {:+}/{:+}",
            self.week,
            self.matchup_id,
            self.team_a.name,
            self.team_b.name,
            fav.name,
            self.spread.line,
            self.spread.odds,
            self.total.line,
            self.moneyline.team_a_odds,
            self.moneyline.team_b_odds,
        )
    }
}

impl BettingLine {
    pub fn team(&self, side: TeamSide) -> &TeamLine {
        match side {
            TeamSide::A => &self.team_a,
            TeamSide::B => &self.team_b,
        }
    }

    /// The odds (and line, where applicable) currently offered for a pick.
    pub fn quote(&self, bet_type: BetType, selection: Selection) -> Result<Quote, BookError> {
        match (bet_type, selection.team_side()) {
            (BetType::Spread, Some(side)) => {
                let line = if self.spread.line == 0.0 {
                    0.0
                } else if side == self.spread.favorite {
                    -self.spread.line
                } else {
                    self.spread.line
                };
                Ok(Quote { odds: self.spread.odds, line: Some(line) })
            }
            (BetType::Moneyline, Some(TeamSide::A)) => {
                Ok(Quote { odds: self.moneyline.team_a_odds, line: None })
            }
            (BetType::Moneyline, Some(TeamSide::B)) => {
                Ok(Quote { odds: self.moneyline.team_b_odds, line: None })
            }
            (BetType::Total, None) => {
                let odds = if selection == Selection::Over {
                    self.total.over_odds
                } else {
                    self.total.under_odds
                };
                Ok(Quote { odds, line: Some(self.total.line) })
            }
            _ => Err(BookError::InvalidSelection { bet_type, selection }),
        }
    }
}

/// Price offered for a single pick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub odds: i32,
    pub line: Option<f64>,
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{:+} @ {line}", self.odds),
            None => write!(f, "{:+}", self.odds),
        }
    }
}

// ---------------------------------------------------------------------------
// Wagers & settlement
// ---------------------------------------------------------------------------

/// A placed bet. Stake, odds and line are frozen at placement; status,
/// payout and `settled_at` are written exactly once by settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: String,
    pub participant_id: String,
    pub matchup_id: String,
    pub line_id: String,
    pub week: u32,
    pub bet_type: BetType,
    pub selection: Selection,
    pub stake: Decimal,
    pub odds: i32,
    pub line: Option<f64>,
    pub status: WagerStatus,
    pub payout: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Wager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} {:.2} @ {:+} ({})",
            self.id,
            self.participant_id,
            self.bet_type,
            self.selection,
            self.stake,
            self.odds,
            self.status,
        )
    }
}

impl Wager {
    pub fn is_pending(&self) -> bool {
        self.status == WagerStatus::Pending
    }
}

/// Final team scores used to grade a matchup's wagers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalScore {
    pub team_a: f64,
    pub team_b: f64,
}

impl FinalScore {
    pub fn for_side(&self, side: TeamSide) -> f64 {
        match side {
            TeamSide::A => self.team_a,
            TeamSide::B => self.team_b,
        }
    }

    pub fn combined(&self) -> f64 {
        self.team_a + self.team_b
    }
}

/// Result of settling one wager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub wager_id: String,
    pub participant_id: String,
    pub status: WagerStatus,
    pub payout: Decimal,
    pub settled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Broad error classes, used to decide how a caller should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input; rejected before any mutation. Correct and retry.
    Validation,
    /// A betting rule refused the request. Shown to the end user verbatim.
    BusinessRule,
    /// Duplicate or out-of-order request, usually a caller bug.
    StateConflict,
    /// Storage contention outlasted internal retries. Safe to retry.
    Transient,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::BusinessRule => "business_rule",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Domain-specific error types for the book.
#[derive(Debug, thiserror::Error)]
pub enum BookError {
    #[error("Stake must be a positive whole amount, got {0}")]
    InvalidStake(i64),

    #[error("Selection {selection} is not valid for a {bet_type} wager")]
    InvalidSelection { bet_type: BetType, selection: Selection },

    #[error("Unknown bet type: {0}")]
    InvalidBetType(String),

    #[error("Unknown selection: {0}")]
    UnknownSelection(String),

    #[error("Unknown outcome: {0}")]
    InvalidOutcome(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Week must be 1 or later, got {0}")]
    InvalidWeek(u32),

    #[error("Invalid matchup {matchup_id}: {reason}")]
    InvalidMatchup { matchup_id: String, reason: String },

    #[error("No published line for matchup {0}")]
    UnknownMatchup(String),

    #[error("Participant not found: {0}")]
    UnknownParticipant(String),

    #[error("Wager not found: {0}")]
    UnknownWager(String),

    #[error("Insufficient balance: stake {stake:.2}, available {available:.2}")]
    InsufficientBalance { stake: Decimal, available: Decimal },

    #[error("Lines are locked for week {week}")]
    LinesLocked { week: u32 },

    #[error("Line changed for matchup {matchup_id}: displayed {displayed}, now {current}")]
    LineChanged { matchup_id: String, displayed: Quote, current: Quote },

    #[error("Participant is inactive: {0}")]
    ParticipantInactive(String),

    #[error("Wager {wager_id} is already settled ({status})")]
    AlreadySettled { wager_id: String, status: WagerStatus },

    #[error("{operation} failed after {attempts} attempts: {message}")]
    Transient { operation: String, attempts: u32, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt ledger record: {0}")]
    Corrupt(String),

    #[error("Projection source error: {0}")]
    Source(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookError::InvalidStake(_)
            | BookError::InvalidSelection { .. }
            | BookError::InvalidBetType(_)
            | BookError::UnknownSelection(_)
            | BookError::InvalidOutcome(_)
            | BookError::MalformedRequest(_)
            | BookError::InvalidWeek(_)
            | BookError::InvalidMatchup { .. }
            | BookError::UnknownMatchup(_)
            | BookError::UnknownParticipant(_)
            | BookError::UnknownWager(_) => ErrorKind::Validation,
            BookError::InsufficientBalance { .. }
            | BookError::LinesLocked { .. }
            | BookError::LineChanged { .. }
            | BookError::ParticipantInactive(_) => ErrorKind::BusinessRule,
            BookError::AlreadySettled { .. } => ErrorKind::StateConflict,
            BookError::Transient { .. } => ErrorKind::Transient,
            BookError::Storage(_) if self.is_retryable() => ErrorKind::Transient,
            BookError::Storage(_)
            | BookError::Migration(_)
            | BookError::Corrupt(_)
            | BookError::Source(_)
            | BookError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failure is storage contention that may clear on retry
    /// (SQLite BUSY/LOCKED families, pool exhaustion).
    pub fn is_retryable(&self) -> bool {
        match self {
            BookError::Storage(sqlx::Error::PoolTimedOut) => true,
            BookError::Storage(sqlx::Error::Database(db)) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether the error names a record that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BookError::UnknownMatchup(_) | BookError::UnknownParticipant(_) | BookError::UnknownWager(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
