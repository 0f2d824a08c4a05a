//! Wager service.
//!
//! Validates a bet against the currently published line and commits the
//! debit, the wager and its ledger entry as one unit. The debit is a
//! compare-and-swap on the balance row, so concurrent placements by the
//! same participant can never overdraw it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::lock::LockScheduler;
use crate::storage::retry::{with_backoff, RetryPolicy};
use crate::storage::{self, LedgerStore};
use crate::types::{
    cents_to_units, BetType, BettingLine, BookError, Quote, Selection, TxReason, Wager, WagerStatus,
};

/// A bet as submitted by a participant, with the price they were shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceWagerRequest {
    pub participant_id: String,
    pub matchup_id: String,
    pub bet_type: BetType,
    pub selection: Selection,
    /// Whole FAAB units.
    pub stake: i64,
    pub displayed_odds: i32,
    /// Line shown to the bettor, from the selected side's perspective.
    /// Checked only when supplied.
    #[serde(default)]
    pub displayed_line: Option<f64>,
}

pub struct WagerService {
    store: LedgerStore,
    scheduler: LockScheduler,
    retry: RetryPolicy,
}

impl WagerService {
    pub fn new(store: LedgerStore, scheduler: LockScheduler, retry: RetryPolicy) -> Self {
        Self { store, scheduler, retry }
    }

    /// Place a wager as of `now`.
    ///
    /// Fails without side effects on invalid input, a locked week, a price
    /// that moved since it was displayed, an inactive participant or an
    /// insufficient balance.
    pub async fn place_wager_at(
        &self,
        req: &PlaceWagerRequest,
        now: DateTime<Utc>,
    ) -> Result<Wager, BookError> {
        if req.stake <= 0 {
            return Err(BookError::InvalidStake(req.stake));
        }
        if !req.selection.is_valid_for(req.bet_type) {
            return Err(BookError::InvalidSelection {
                bet_type: req.bet_type,
                selection: req.selection,
            });
        }

        let line = self
            .store
            .current_line(&req.matchup_id)
            .await?
            .ok_or_else(|| BookError::UnknownMatchup(req.matchup_id.clone()))?;

        if self.scheduler.is_locked(now, line.week) {
            debug!(
                participant_id = %req.participant_id,
                matchup_id = %req.matchup_id,
                week = line.week,
                "Wager rejected: lines locked"
            );
            return Err(BookError::LinesLocked { week: line.week });
        }

        verify_price(req, &line)?;

        let wager = with_backoff(&self.retry, "place_wager", || self.commit_wager(req, now)).await?;

        info!(
            wager_id = %wager.id,
            participant_id = %wager.participant_id,
            matchup_id = %wager.matchup_id,
            bet_type = %wager.bet_type,
            selection = %wager.selection,
            stake = %wager.stake,
            odds = wager.odds,
            "Wager placed"
        );
        Ok(wager)
    }

    async fn commit_wager(
        &self,
        req: &PlaceWagerRequest,
        now: DateTime<Utc>,
    ) -> Result<Wager, BookError> {
        let stake_cents = req
            .stake
            .checked_mul(100)
            .ok_or(BookError::InvalidStake(req.stake))?;
        let mut tx = self.store.begin().await?;

        // Debit first so the transaction takes the write lock up front.
        let remaining = storage::debit(&mut tx, &req.participant_id, stake_cents, now).await?;

        // The line may have been republished since the pre-check.
        let line = storage::current_line_in(&mut tx, &req.matchup_id)
            .await?
            .ok_or_else(|| BookError::UnknownMatchup(req.matchup_id.clone()))?;
        let quote = verify_price(req, &line)?;

        let wager = Wager {
            id: Uuid::new_v4().to_string(),
            participant_id: req.participant_id.clone(),
            matchup_id: line.matchup_id.clone(),
            line_id: line.line_id.clone(),
            week: line.week,
            bet_type: req.bet_type,
            selection: req.selection,
            stake: Decimal::from(req.stake),
            odds: quote.odds,
            line: quote.line,
            status: WagerStatus::Pending,
            payout: None,
            placed_at: now,
            settled_at: None,
        };

        storage::insert_wager(&mut tx, &wager).await?;
        storage::append_transaction(
            &mut tx,
            &wager.participant_id,
            -stake_cents,
            TxReason::BetPlaced,
            Some(&wager.id),
            now,
        )
        .await?;
        tx.commit().await?;

        debug!(wager_id = %wager.id, balance = %cents_to_units(remaining), "Stake debited");
        Ok(wager)
    }
}

/// The current quote for the request's pick, if it still matches what the
/// bettor was shown.
fn verify_price(req: &PlaceWagerRequest, line: &BettingLine) -> Result<Quote, BookError> {
    let current = line.quote(req.bet_type, req.selection)?;
    let line_moved = match req.displayed_line {
        Some(shown) => current.line != Some(shown),
        None => false,
    };

    if current.odds != req.displayed_odds || line_moved {
        debug!(
            matchup_id = %req.matchup_id,
            displayed_odds = req.displayed_odds,
            current = %current,
            "Wager rejected: price moved"
        );
        return Err(BookError::LineChanged {
            matchup_id: req.matchup_id.clone(),
            displayed: Quote {
                odds: req.displayed_odds,
                line: req.displayed_line.or(current.line),
            },
            current,
        });
    }
    Ok(current)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
