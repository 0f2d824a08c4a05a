//! The sportsbook facade.
//!
//! Owns the odds engine, the lock scheduler and the wager and settlement
//! services over one ledger store, and exposes the operations callers use:
//! publishing lines, placing and settling wagers, and reading balances and
//! ledgers. All methods take `&self`, so one instance can be shared across
//! tasks behind an `Arc`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::engine::lock::LockScheduler;
use crate::engine::settlement::{MatchupSettlement, SettlementService};
use crate::engine::wager::{PlaceWagerRequest, WagerService};
use crate::odds::source::ProjectionSource;
use crate::odds::OddsEngine;
use crate::storage::retry::RetryPolicy;
use crate::storage::LedgerStore;
use crate::types::{
    BettingLine, BookError, FinalScore, LedgerDiscrepancy, LedgerTransaction, MatchupInput, Outcome,
    Participant, Settlement, Wager,
};

/// Source of the current time for operations that do not take one.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Sportsbook {
    store: LedgerStore,
    odds: OddsEngine,
    scheduler: LockScheduler,
    wagers: WagerService,
    settlement: SettlementService,
    starting_balance: Decimal,
    clock: Clock,
}

impl Sportsbook {
    pub fn new(
        store: LedgerStore,
        odds: OddsEngine,
        scheduler: LockScheduler,
        retry: RetryPolicy,
        starting_balance: Decimal,
    ) -> Self {
        Self {
            wagers: WagerService::new(store.clone(), scheduler.clone(), retry.clone()),
            settlement: SettlementService::new(store.clone(), retry),
            store,
            odds,
            scheduler,
            starting_balance,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn from_config(store: LedgerStore, config: &AppConfig) -> Result<Self, BookError> {
        let scheduler = LockScheduler::from_config(&config.schedule)?;
        Ok(Self::new(
            store,
            OddsEngine::new(config.odds.projection()),
            scheduler,
            config.storage.retry_policy(),
            Decimal::from(config.book.starting_balance),
        ))
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    // -- Lines -------------------------------------------------------------

    pub async fn generate_lines(
        &self,
        week: u32,
        matchups: &[MatchupInput],
    ) -> Result<Vec<BettingLine>, BookError> {
        self.generate_lines_at(week, matchups, self.now()).await
    }

    /// Price and publish a week's lines, superseding any current ones.
    pub async fn generate_lines_at(
        &self,
        week: u32,
        matchups: &[MatchupInput],
        now: DateTime<Utc>,
    ) -> Result<Vec<BettingLine>, BookError> {
        if week == 0 {
            return Err(BookError::InvalidWeek(week));
        }
        if self.scheduler.is_locked(now, week) {
            return Err(BookError::LinesLocked { week });
        }

        let lines = self.odds.generate_lines(week, matchups, now)?;
        self.store.publish_lines(&lines).await?;

        info!(week, count = lines.len(), "Lines published");
        Ok(lines)
    }

    /// Current lines for `week`.
    pub async fn lines(&self, week: u32) -> Result<Vec<BettingLine>, BookError> {
        if week == 0 {
            return Err(BookError::InvalidWeek(week));
        }
        self.store.lines_for_week(week).await
    }

    pub async fn refresh_lines(
        &self,
        source: &dyn ProjectionSource,
        week: u32,
    ) -> Result<Vec<BettingLine>, BookError> {
        self.refresh_lines_at(source, week, self.now()).await
    }

    /// Pull `week`'s matchups from `source` and republish their lines.
    pub async fn refresh_lines_at(
        &self,
        source: &dyn ProjectionSource,
        week: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<BettingLine>, BookError> {
        if self.scheduler.is_locked(now, week) {
            return Err(BookError::LinesLocked { week });
        }
        let matchups = source.matchups(week).await?;
        self.generate_lines_at(week, &matchups, now).await
    }

    // -- Wagers ------------------------------------------------------------

    pub async fn place_wager(&self, req: &PlaceWagerRequest) -> Result<Wager, BookError> {
        self.wagers.place_wager_at(req, self.now()).await
    }

    pub async fn place_wager_at(
        &self,
        req: &PlaceWagerRequest,
        now: DateTime<Utc>,
    ) -> Result<Wager, BookError> {
        self.wagers.place_wager_at(req, now).await
    }

    pub async fn settle_wager(&self, wager_id: &str, outcome: Outcome) -> Result<Settlement, BookError> {
        self.settlement.settle_wager_at(wager_id, outcome, self.now()).await
    }

    pub async fn settle_wager_at(
        &self,
        wager_id: &str,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Settlement, BookError> {
        self.settlement.settle_wager_at(wager_id, outcome, now).await
    }

    pub async fn settle_matchup(
        &self,
        matchup_id: &str,
        score: FinalScore,
    ) -> Result<MatchupSettlement, BookError> {
        self.settlement.settle_matchup_at(matchup_id, score, self.now()).await
    }

    pub async fn settle_matchup_at(
        &self,
        matchup_id: &str,
        score: FinalScore,
        now: DateTime<Utc>,
    ) -> Result<MatchupSettlement, BookError> {
        self.settlement.settle_matchup_at(matchup_id, score, now).await
    }

    // -- Participants ------------------------------------------------------

    pub async fn sync_participant(&self, id: &str, display_name: &str) -> Result<Participant, BookError> {
        self.sync_participant_at(id, display_name, self.now()).await
    }

    /// Create a member with the starting balance, or refresh and reactivate
    /// an existing one. Never changes an existing balance.
    pub async fn sync_participant_at(
        &self,
        id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Participant, BookError> {
        let (participant, created) = self
            .store
            .upsert_participant(id, display_name, self.starting_balance, now)
            .await?;
        if created {
            info!(participant_id = id, balance = %participant.balance, "Participant created");
        } else {
            info!(participant_id = id, "Participant synced");
        }
        Ok(participant)
    }

    pub async fn deactivate_participant(&self, id: &str) -> Result<Participant, BookError> {
        let participant = self.store.deactivate_participant(id, self.now()).await?;
        info!(participant_id = id, "Participant deactivated");
        Ok(participant)
    }

    pub async fn balance(&self, participant_id: &str) -> Result<Decimal, BookError> {
        self.store.balance(participant_id).await
    }

    pub async fn ledger(&self, participant_id: &str) -> Result<Vec<LedgerTransaction>, BookError> {
        self.store.ledger(participant_id).await
    }

    pub async fn wagers(&self, participant_id: &str) -> Result<Vec<Wager>, BookError> {
        if self.store.participant(participant_id).await?.is_none() {
            return Err(BookError::UnknownParticipant(participant_id.to_string()));
        }
        self.store.wagers_for_participant(participant_id).await
    }

    pub async fn audit(&self) -> Result<Vec<LedgerDiscrepancy>, BookError> {
        self.store.audit().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
