//! Settlement service.
//!
//! Moves a pending wager to its final status exactly once and credits the
//! payout in the same transaction. Grading from final scores lives here
//! too, so a whole matchup can be settled in one call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::odds::american::{self, round_to_cents};
use crate::storage::retry::{with_backoff, RetryPolicy};
use crate::storage::{self, LedgerStore};
use crate::types::{
    cents_to_units, units_to_cents, BetType, BookError, FinalScore, Outcome, Selection, Settlement,
    TxReason, Wager, WagerStatus,
};

/// Outcome of settling every pending wager on a matchup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchupSettlement {
    pub matchup_id: String,
    pub settled: Vec<Settlement>,
    /// Wagers another caller settled first.
    pub skipped: usize,
}

pub struct SettlementService {
    store: LedgerStore,
    retry: RetryPolicy,
}

impl SettlementService {
    pub fn new(store: LedgerStore, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Settle one wager. A second settlement of the same wager fails with
    /// `AlreadySettled` and changes nothing.
    pub async fn settle_wager_at(
        &self,
        wager_id: &str,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Settlement, BookError> {
        let wager = self
            .store
            .wager(wager_id)
            .await?
            .ok_or_else(|| BookError::UnknownWager(wager_id.to_string()))?;

        if !wager.is_pending() {
            warn!(wager_id, status = %wager.status, requested = %outcome, "Wager already settled");
            return Err(BookError::AlreadySettled {
                wager_id: wager_id.to_string(),
                status: wager.status,
            });
        }

        let payout = american::payout(wager.stake, wager.odds, outcome);
        let payout_cents = units_to_cents(payout)?;

        let result = with_backoff(&self.retry, "settle_wager", || {
            self.commit_settlement(&wager, outcome, payout_cents, now)
        })
        .await;

        if let Err(BookError::AlreadySettled { status, .. }) = &result {
            warn!(wager_id, status = %status, requested = %outcome, "Wager settled concurrently");
        }
        let settlement = result?;

        info!(
            wager_id,
            participant_id = %settlement.participant_id,
            status = %settlement.status,
            payout = %settlement.payout,
            "Wager settled"
        );
        Ok(settlement)
    }

    async fn commit_settlement(
        &self,
        wager: &Wager,
        outcome: Outcome,
        payout_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Settlement, BookError> {
        let status = WagerStatus::from(outcome);
        let mut tx = self.store.begin().await?;

        if !storage::mark_settled(&mut tx, &wager.id, status, payout_cents, now).await? {
            let current = storage::wager_in(&mut tx, &wager.id)
                .await?
                .map(|w| w.status)
                .unwrap_or(status);
            return Err(BookError::AlreadySettled { wager_id: wager.id.clone(), status: current });
        }

        if payout_cents > 0 {
            let balance = storage::credit(&mut tx, &wager.participant_id, payout_cents, now).await?;
            debug!(wager_id = %wager.id, balance = %cents_to_units(balance), "Payout credited");
        }
        storage::append_transaction(
            &mut tx,
            &wager.participant_id,
            payout_cents,
            TxReason::for_outcome(outcome),
            Some(&wager.id),
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(Settlement {
            wager_id: wager.id.clone(),
            participant_id: wager.participant_id.clone(),
            status,
            payout: cents_to_units(payout_cents),
            settled_at: now,
        })
    }

    /// Grade and settle every pending wager on `matchup_id`.
    pub async fn settle_matchup_at(
        &self,
        matchup_id: &str,
        score: FinalScore,
        now: DateTime<Utc>,
    ) -> Result<MatchupSettlement, BookError> {
        for value in [score.team_a, score.team_b] {
            if !value.is_finite() || value < 0.0 {
                return Err(BookError::InvalidMatchup {
                    matchup_id: matchup_id.to_string(),
                    reason: format!("invalid final score {value}"),
                });
            }
        }
        if self.store.current_line(matchup_id).await?.is_none() {
            return Err(BookError::UnknownMatchup(matchup_id.to_string()));
        }

        let pending = self.store.pending_wagers_for_matchup(matchup_id).await?;
        let mut report = MatchupSettlement {
            matchup_id: matchup_id.to_string(),
            settled: Vec::with_capacity(pending.len()),
            skipped: 0,
        };

        for wager in &pending {
            let outcome = grade(wager, &score)?;
            match self.settle_wager_at(&wager.id, outcome, now).await {
                Ok(settlement) => report.settled.push(settlement),
                Err(BookError::AlreadySettled { .. }) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        info!(
            matchup_id,
            team_a = score.team_a,
            team_b = score.team_b,
            settled = report.settled.len(),
            skipped = report.skipped,
            "Matchup settled"
        );
        Ok(report)
    }
}

/// Decide a wager's outcome from the final scores.
///
/// Spread: selected score plus the frozen line against the other score.
/// Total: combined score against the frozen total. Moneyline: straight up.
/// Exact ties push.
pub fn grade(wager: &Wager, score: &FinalScore) -> Result<Outcome, BookError> {
    let margin = match (wager.bet_type, wager.selection.team_side()) {
        (BetType::Spread, Some(side)) => {
            let line = frozen_line(wager)?;
            score.for_side(side) + line - score.for_side(side.other())
        }
        (BetType::Moneyline, Some(side)) => score.for_side(side) - score.for_side(side.other()),
        (BetType::Total, None) => {
            let line = frozen_line(wager)?;
            match wager.selection {
                Selection::Over => score.combined() - line,
                _ => line - score.combined(),
            }
        }
        _ => {
            return Err(BookError::InvalidSelection {
                bet_type: wager.bet_type,
                selection: wager.selection,
            })
        }
    };

    let margin = round_to_cents(margin);
    Ok(if margin > 0.0 {
        Outcome::Won
    } else if margin < 0.0 {
        Outcome::Lost
    } else {
        Outcome::Push
    })
}

fn frozen_line(wager: &Wager) -> Result<f64, BookError> {
    wager
        .line
        .ok_or_else(|| BookError::Corrupt(format!("{} wager {} has no line", wager.bet_type, wager.id)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::lock::LockScheduler;
    use crate::engine::wager::{PlaceWagerRequest, WagerService};
    use crate::odds::projection::ProjectionConfig;
    use crate::odds::OddsEngine;
    use crate::types::{MatchupInput, SeasonRecord, TeamInput};
    use chrono::{FixedOffset, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn tuesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 14, 12, 0, 0).unwrap()
    }

    fn team(id: &str, score: f64) -> TeamInput {
        TeamInput {
            team_id: id.into(),
            name: format!("Team {id}"),
            owner: format!("owner-{id}"),
            recent_score: Some(score),
            starter_points: vec![],
            record: SeasonRecord::default(),
        }
    }

    struct Book {
        store: LedgerStore,
        wagers: WagerService,
        settlement: SettlementService,
    }

    async fn setup() -> Book {
        let store = LedgerStore::open_in_memory().await.unwrap();
        store.upsert_participant("u1", "Alex", dec!(100), tuesday()).await.unwrap();
        store.upsert_participant("u2", "Sam", dec!(100), tuesday()).await.unwrap();

        let engine = OddsEngine::new(ProjectionConfig { balance_adjustment: false, ..Default::default() });
        let m = MatchupInput { matchup_id: "m1".into(), team_a: team("t1", 120.0), team_b: team("t2", 100.0) };
        store.publish_lines(&engine.generate_lines(6, &[m], tuesday()).unwrap()).await.unwrap();

        let retry = RetryPolicy::new(2, Duration::from_millis(1));
        let scheduler = LockScheduler::new(FixedOffset::west_opt(5 * 3600).unwrap());
        Book {
            wagers: WagerService::new(store.clone(), scheduler, retry.clone()),
            settlement: SettlementService::new(store.clone(), retry),
            store,
        }
    }

    async fn place(book: &Book, who: &str, bet_type: BetType, selection: Selection, stake: i64, odds: i32) -> Wager {
        let req = PlaceWagerRequest {
            participant_id: who.into(),
            matchup_id: "m1".into(),
            bet_type,
            selection,
            stake,
            displayed_odds: odds,
            displayed_line: None,
        };
        book.wagers.place_wager_at(&req, tuesday()).await.unwrap()
    }

    fn wager(bet_type: BetType, selection: Selection, line: Option<f64>) -> Wager {
        Wager {
            id: "w1".into(),
            participant_id: "u1".into(),
            matchup_id: "m1".into(),
            line_id: "l1".into(),
            week: 6,
            bet_type,
            selection,
            stake: dec!(10),
            odds: -110,
            line,
            status: WagerStatus::Pending,
            payout: None,
            placed_at: tuesday(),
            settled_at: None,
        }
    }

    #[test]
    fn test_grade_spread() {
        let score = FinalScore { team_a: 125.0, team_b: 100.0 };
        assert_eq!(grade(&wager(BetType::Spread, Selection::TeamA, Some(-20.0)), &score).unwrap(), Outcome::Won);
        assert_eq!(grade(&wager(BetType::Spread, Selection::TeamB, Some(20.0)), &score).unwrap(), Outcome::Lost);
        assert_eq!(grade(&wager(BetType::Spread, Selection::TeamA, Some(-25.0)), &score).unwrap(), Outcome::Push);
        // Decimal scores that land exactly on the number still push.
        let close = FinalScore { team_a: 120.7, team_b: 100.2 };
        assert_eq!(grade(&wager(BetType::Spread, Selection::TeamA, Some(-20.5)), &close).unwrap(), Outcome::Push);
    }

    #[test]
    fn test_grade_total_and_moneyline() {
        let score = FinalScore { team_a: 110.0, team_b: 110.0 };
        assert_eq!(grade(&wager(BetType::Total, Selection::Over, Some(219.5)), &score).unwrap(), Outcome::Won);
        assert_eq!(grade(&wager(BetType::Total, Selection::Under, Some(219.5)), &score).unwrap(), Outcome::Lost);
        assert_eq!(grade(&wager(BetType::Total, Selection::Under, Some(220.0)), &score).unwrap(), Outcome::Push);
        assert_eq!(grade(&wager(BetType::Moneyline, Selection::TeamB, None), &score).unwrap(), Outcome::Push);

        let score = FinalScore { team_a: 90.0, team_b: 110.0 };
        assert_eq!(grade(&wager(BetType::Moneyline, Selection::TeamB, None), &score).unwrap(), Outcome::Won);
    }

    #[test]
    fn test_grade_requires_frozen_line() {
        let err = grade(&wager(BetType::Total, Selection::Over, None), &FinalScore { team_a: 1.0, team_b: 1.0 });
        assert!(matches!(err, Err(BookError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_won_wager_pays_stake_plus_profit() {
        let book = setup().await;
        let w = place(&book, "u1", BetType::Total, Selection::Over, 20, -110).await;
        assert_eq!(book.store.balance("u1").await.unwrap(), dec!(80));

        let s = book.settlement.settle_wager_at(&w.id, Outcome::Won, tuesday()).await.unwrap();
        assert_eq!(s.status, WagerStatus::Won);
        assert_eq!(s.payout, dec!(38.18));
        assert_eq!(book.store.balance("u1").await.unwrap(), dec!(118.18));

        let ledger = book.store.ledger("u1").await.unwrap();
        assert_eq!(ledger.last().unwrap().reason, TxReason::BetWon);
        assert_eq!(ledger.last().unwrap().amount, dec!(38.18));
        assert!(book.store.audit().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_refunds_and_loss_records_zero() {
        let book = setup().await;
        let push = place(&book, "u1", BetType::Total, Selection::Under, 10, -110).await;
        let lost = place(&book, "u1", BetType::Total, Selection::Over, 10, -110).await;

        book.settlement.settle_wager_at(&push.id, Outcome::Push, tuesday()).await.unwrap();
        let s = book.settlement.settle_wager_at(&lost.id, Outcome::Lost, tuesday()).await.unwrap();
        assert_eq!(s.payout, Decimal::ZERO);
        assert_eq!(book.store.balance("u1").await.unwrap(), dec!(90));

        let ledger = book.store.ledger("u1").await.unwrap();
        let reasons: Vec<_> = ledger.iter().map(|t| t.reason).collect();
        assert_eq!(
            reasons,
            vec![TxReason::Opening, TxReason::BetPlaced, TxReason::BetPlaced, TxReason::BetPush, TxReason::BetLost]
        );
        assert_eq!(ledger[4].amount, Decimal::ZERO);

        let settled = book.store.wager(&lost.id).await.unwrap().unwrap();
        assert_eq!(settled.status, WagerStatus::Lost);
        assert_eq!(settled.payout, Some(Decimal::ZERO));
        assert!(settled.settled_at.is_some());
    }

    #[tokio::test]
    async fn test_second_settlement_is_rejected() {
        let book = setup().await;
        let w = place(&book, "u1", BetType::Total, Selection::Over, 20, -110).await;
        book.settlement.settle_wager_at(&w.id, Outcome::Won, tuesday()).await.unwrap();

        let err = book.settlement.settle_wager_at(&w.id, Outcome::Lost, tuesday()).await.unwrap_err();
        assert!(matches!(err, BookError::AlreadySettled { status: WagerStatus::Won, .. }));
        assert_eq!(book.store.balance("u1").await.unwrap(), dec!(118.18));
        assert_eq!(book.store.ledger("u1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_wager() {
        let book = setup().await;
        assert!(matches!(
            book.settlement.settle_wager_at("nope", Outcome::Won, tuesday()).await,
            Err(BookError::UnknownWager(_))
        ));
    }

    #[tokio::test]
    async fn test_inactive_participant_still_settles() {
        let book = setup().await;
        let w = place(&book, "u1", BetType::Moneyline, Selection::TeamB, 10, 355).await;
        book.store.deactivate_participant("u1", tuesday()).await.unwrap();

        let s = book.settlement.settle_wager_at(&w.id, Outcome::Won, tuesday()).await.unwrap();
        assert_eq!(s.payout, dec!(45.50));
        assert_eq!(book.store.balance("u1").await.unwrap(), dec!(135.50));
    }

    #[tokio::test]
    async fn test_settle_matchup_grades_all_pending() {
        let book = setup().await;
        let fav = place(&book, "u1", BetType::Spread, Selection::TeamA, 10, -120).await;
        let over = place(&book, "u2", BetType::Total, Selection::Over, 10, -110).await;
        let dog = place(&book, "u2", BetType::Moneyline, Selection::TeamB, 5, 355).await;
        book.settlement.settle_wager_at(&dog.id, Outcome::Lost, tuesday()).await.unwrap();

        let report = book
            .settlement
            .settle_matchup_at("m1", FinalScore { team_a: 130.0, team_b: 100.0 }, tuesday())
            .await
            .unwrap();
        assert_eq!(report.settled.len(), 2);
        assert_eq!(report.skipped, 0);

        let fav = book.store.wager(&fav.id).await.unwrap().unwrap();
        assert_eq!(fav.status, WagerStatus::Won);
        // 10 @ -120 -> 10 + 8.333.. = 18.33
        assert_eq!(fav.payout, Some(dec!(18.33)));
        let over = book.store.wager(&over.id).await.unwrap().unwrap();
        assert_eq!(over.status, WagerStatus::Won);
        assert!(book.store.pending_wagers_for_matchup("m1").await.unwrap().is_empty());
        assert!(book.store.audit().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settle_matchup_validates_input() {
        let book = setup().await;
        let bad = FinalScore { team_a: f64::NAN, team_b: 100.0 };
        assert!(matches!(
            book.settlement.settle_matchup_at("m1", bad, tuesday()).await,
            Err(BookError::InvalidMatchup { .. })
        ));
        let ok = FinalScore { team_a: 100.0, team_b: 100.0 };
        assert!(matches!(
            book.settlement.settle_matchup_at("m9", ok, tuesday()).await,
            Err(BookError::UnknownMatchup(_))
        ));
    }
}
