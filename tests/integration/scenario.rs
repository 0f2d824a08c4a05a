//! Full betting cycles through the `Sportsbook` facade.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use faabook::engine::wager::PlaceWagerRequest;
use faabook::storage::LedgerStore;
use faabook::types::{BetType, BookError, FinalScore, Outcome, Selection, TxReason, WagerStatus};

use crate::harness::{matchup, open_book, sample_matchups, StaticSource, TempDb};

fn bet(who: &str, matchup_id: &str, bet_type: BetType, selection: Selection, stake: i64, odds: i32) -> PlaceWagerRequest {
    PlaceWagerRequest {
        participant_id: who.into(),
        matchup_id: matchup_id.into(),
        bet_type,
        selection,
        stake,
        displayed_odds: odds,
        displayed_line: None,
    }
}

#[tokio::test]
async fn test_place_and_win_end_to_end() {
    let db = TempDb::new();
    let book = open_book(&db).await;
    let source = StaticSource::new().with_week(6, sample_matchups());

    book.sync_participant("alex", "Alex").await.unwrap();
    let lines = book.refresh_lines(&source, 6).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(source.calls(), 1);

    let wager = book
        .place_wager(&bet("alex", "m1", BetType::Total, Selection::Over, 20, -110))
        .await
        .unwrap();
    assert_eq!(book.balance("alex").await.unwrap(), dec!(80));

    let settlement = book.settle_wager(&wager.id, Outcome::Won).await.unwrap();
    assert_eq!(settlement.payout, dec!(38.18));
    assert_eq!(book.balance("alex").await.unwrap(), dec!(118.18));

    let again = book.settle_wager(&wager.id, Outcome::Lost).await.unwrap_err();
    assert!(matches!(again, BookError::AlreadySettled { .. }));
    assert_eq!(book.balance("alex").await.unwrap(), dec!(118.18));

    let ledger = book.ledger("alex").await.unwrap();
    let reasons: Vec<TxReason> = ledger.iter().map(|t| t.reason).collect();
    assert_eq!(reasons, vec![TxReason::Opening, TxReason::BetPlaced, TxReason::BetWon]);
    let sum: Decimal = ledger.iter().map(|t| t.amount).sum();
    assert_eq!(sum, dec!(118.18));
    assert!(book.audit().await.unwrap().is_empty());

    book.close().await;
}

#[tokio::test]
async fn test_spread_favorite_covers_end_to_end() {
    let db = TempDb::new();
    let book = open_book(&db).await;
    book.sync_participant("alex", "Alex").await.unwrap();
    let lines = book.generate_lines(6, &sample_matchups()).await.unwrap();

    let m2 = lines.iter().find(|l| l.matchup_id == "m2").unwrap();
    assert_eq!(m2.spread.favorite_id, "t3");
    assert_eq!(m2.spread.line, 3.0);
    assert_eq!(m2.spread.odds, -110);

    // t3 -3 @ -110, stake 20.
    let mut req = bet("alex", "m2", BetType::Spread, Selection::TeamA, 20, -110);
    req.displayed_line = Some(-3.0);
    let wager = book.place_wager(&req).await.unwrap();
    assert_eq!(wager.line, Some(-3.0));
    assert_eq!(book.balance("alex").await.unwrap(), dec!(80));

    let report = book
        .settle_matchup("m2", FinalScore { team_a: 112.0, team_b: 101.0 })
        .await
        .unwrap();
    assert_eq!(report.settled.len(), 1);
    assert_eq!(report.settled[0].status, WagerStatus::Won);
    assert_eq!(report.settled[0].payout, dec!(38.18));
    assert_eq!(book.balance("alex").await.unwrap(), dec!(118.18));

    let ledger = book.ledger("alex").await.unwrap();
    let amounts: Vec<Decimal> = ledger.iter().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![dec!(100), dec!(-20), dec!(38.18)]);
    assert!(book.audit().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_republished_line_keeps_old_wager_terms() {
    let db = TempDb::new();
    let book = open_book(&db).await;
    let source = StaticSource::new().with_week(6, sample_matchups());
    book.sync_participant("alex", "Alex").await.unwrap();
    book.refresh_lines(&source, 6).await.unwrap();

    let early = book
        .place_wager(&bet("alex", "m1", BetType::Spread, Selection::TeamA, 10, -120))
        .await
        .unwrap();
    assert_eq!(early.line, Some(-20.0));

    // Injury news: t1 projects lower, the spread shrinks to 6.
    source.set_week(6, vec![matchup("m1", ("t1", 106.0), ("t2", 100.0))]);
    book.refresh_lines(&source, 6).await.unwrap();

    let stale = book
        .place_wager(&bet("alex", "m1", BetType::Spread, Selection::TeamA, 10, -120))
        .await
        .unwrap_err();
    assert!(matches!(stale, BookError::LineChanged { .. }));

    let late = book
        .place_wager(&bet("alex", "m1", BetType::Spread, Selection::TeamA, 10, -105))
        .await
        .unwrap();
    assert_eq!(late.line, Some(-6.0));
    assert_ne!(late.line_id, early.line_id);

    // Won by 10: covers -6, misses -20.
    let report = book
        .settle_matchup("m1", FinalScore { team_a: 110.0, team_b: 100.0 })
        .await
        .unwrap();
    assert_eq!(report.settled.len(), 2);

    let early = book.store().wager(&early.id).await.unwrap().unwrap();
    let late = book.store().wager(&late.id).await.unwrap().unwrap();
    assert_eq!(early.status, WagerStatus::Lost);
    assert_eq!(late.status, WagerStatus::Won);
    // 10 @ -105 -> 10 + 9.52
    assert_eq!(late.payout, Some(dec!(19.52)));
    assert_eq!(book.balance("alex").await.unwrap(), dec!(99.52));

    // m2 was dropped from the second publication but its line is still current.
    assert_eq!(book.lines(6).await.unwrap().len(), 2);
    assert!(book.audit().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_settle_matchup_across_participants() {
    let db = TempDb::new();
    let book = open_book(&db).await;
    book.generate_lines(6, &sample_matchups()).await.unwrap();
    for (id, name) in [("alex", "Alex"), ("sam", "Sam"), ("kim", "Kim")] {
        book.sync_participant(id, name).await.unwrap();
    }

    book.place_wager(&bet("alex", "m2", BetType::Spread, Selection::TeamA, 25, -110)).await.unwrap();
    book.place_wager(&bet("sam", "m2", BetType::Moneyline, Selection::TeamB, 10, 122)).await.unwrap();
    book.place_wager(&bet("kim", "m2", BetType::Total, Selection::Under, 40, -110)).await.unwrap();
    book.place_wager(&bet("kim", "m1", BetType::Total, Selection::Under, 5, -110)).await.unwrap();

    // t3 wins by exactly 3: spread pushes, favourite wins, total 205 pushes.
    let report = book
        .settle_matchup("m2", FinalScore { team_a: 104.0, team_b: 101.0 })
        .await
        .unwrap();
    assert_eq!(report.settled.len(), 3);
    assert_eq!(report.skipped, 0);

    assert_eq!(book.balance("alex").await.unwrap(), dec!(100));
    assert_eq!(book.balance("sam").await.unwrap(), dec!(90));
    assert_eq!(book.balance("kim").await.unwrap(), dec!(95));

    // The m1 wager is untouched.
    let kim = book.wagers("kim").await.unwrap();
    assert_eq!(kim.iter().filter(|w| w.is_pending()).count(), 1);
    assert!(book.audit().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inactive_member_settles_but_cannot_bet() {
    let db = TempDb::new();
    let book = open_book(&db).await;
    book.generate_lines(6, &sample_matchups()).await.unwrap();
    book.sync_participant("alex", "Alex").await.unwrap();

    let wager = book
        .place_wager(&bet("alex", "m1", BetType::Moneyline, Selection::TeamB, 10, 355))
        .await
        .unwrap();
    book.deactivate_participant("alex").await.unwrap();

    let err = book
        .place_wager(&bet("alex", "m1", BetType::Moneyline, Selection::TeamB, 10, 355))
        .await
        .unwrap_err();
    assert!(matches!(err, BookError::ParticipantInactive(_)));

    book.settle_wager(&wager.id, Outcome::Won).await.unwrap();
    assert_eq!(book.balance("alex").await.unwrap(), dec!(135.50));

    // Re-syncing reactivates without touching the balance.
    let p = book.sync_participant("alex", "Alex").await.unwrap();
    assert!(p.active);
    assert_eq!(p.balance, dec!(135.50));
}

#[tokio::test]
async fn test_source_failure_keeps_previous_lines() {
    let db = TempDb::new();
    let book = open_book(&db).await;
    let source = StaticSource::new().with_week(6, sample_matchups());
    let first = book.refresh_lines(&source, 6).await.unwrap();

    source.set_error("feed down");
    let err = book.refresh_lines(&source, 6).await.unwrap_err();
    assert!(matches!(err, BookError::Source(_)));

    let current = book.lines(6).await.unwrap();
    assert_eq!(current, first);
}

#[tokio::test]
async fn test_ledger_survives_restart() {
    let db = TempDb::new();
    {
        let book = open_book(&db).await;
        book.generate_lines(6, &sample_matchups()).await.unwrap();
        book.sync_participant("alex", "Alex").await.unwrap();
        book.place_wager(&bet("alex", "m1", BetType::Total, Selection::Over, 30, -110))
            .await
            .unwrap();
        book.close().await;
    }

    let store = LedgerStore::open(&db.storage_config()).await.unwrap();
    store.migrate().await.unwrap();
    assert_eq!(store.balance("alex").await.unwrap(), dec!(70));
    assert_eq!(store.ledger("alex").await.unwrap().len(), 2);
    assert_eq!(store.pending_wagers_for_matchup("m1").await.unwrap().len(), 1);
    assert!(store.audit().await.unwrap().is_empty());
    store.close().await;
}
