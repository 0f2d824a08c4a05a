//! Concurrent placement and settlement against one participant.
//!
//! Many tasks race on the same balance row; the ledger must never overdraw
//! and a wager must pay out at most once.

use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use faabook::engine::wager::PlaceWagerRequest;
use faabook::types::{BetType, BookError, FinalScore, Outcome, Selection};

use crate::harness::{open_book, sample_matchups, TempDb};

fn over(stake: i64) -> PlaceWagerRequest {
    PlaceWagerRequest {
        participant_id: "alex".into(),
        matchup_id: "m1".into(),
        bet_type: BetType::Total,
        selection: Selection::Over,
        stake,
        displayed_odds: -110,
        displayed_line: Some(220.0),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_wagers_never_overdraw() {
    let db = TempDb::new();
    let book = Arc::new(open_book(&db).await);
    book.generate_lines(6, &sample_matchups()).await.unwrap();
    book.sync_participant("alex", "Alex").await.unwrap();

    let handles = (0..10).map(|_| {
        let book = book.clone();
        tokio::spawn(async move { book.place_wager(&over(30)).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    let placed = results.iter().filter(|r| r.is_ok()).count();
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(err, BookError::InsufficientBalance { .. } | BookError::Transient { .. }),
            "unexpected error: {err}"
        );
    }
    assert!(placed >= 1 && placed <= 3, "placed {placed}");

    let balance = book.balance("alex").await.unwrap();
    assert_eq!(balance, dec!(100) - Decimal::from(30 * placed as i64));
    assert!(balance >= Decimal::ZERO);
    assert_eq!(book.wagers("alex").await.unwrap().len(), placed);
    assert!(book.audit().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exact_balance_race() {
    let db = TempDb::new();
    let book = Arc::new(open_book(&db).await);
    book.generate_lines(6, &sample_matchups()).await.unwrap();
    book.sync_participant("alex", "Alex").await.unwrap();

    // Two bets of the full balance: at most one can land.
    let handles = (0..2).map(|_| {
        let book = book.clone();
        tokio::spawn(async move { book.place_wager(&over(100)).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    let placed = results.iter().filter(|r| r.is_ok()).count();
    assert!(placed <= 1);
    let expected = if placed == 1 { Decimal::ZERO } else { dec!(100) };
    assert_eq!(book.balance("alex").await.unwrap(), expected);
    assert!(book.audit().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlement_pays_once() {
    let db = TempDb::new();
    let book = Arc::new(open_book(&db).await);
    book.generate_lines(6, &sample_matchups()).await.unwrap();
    book.sync_participant("alex", "Alex").await.unwrap();
    let wager = book.place_wager(&over(20)).await.unwrap();

    let handles = (0..8).map(|_| {
        let book = book.clone();
        let id = wager.id.clone();
        tokio::spawn(async move { book.settle_wager(&id, Outcome::Won).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    let settled = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(settled, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(err, BookError::AlreadySettled { .. } | BookError::Transient { .. }),
            "unexpected error: {err}"
        );
    }

    assert_eq!(book.balance("alex").await.unwrap(), dec!(118.18));
    assert_eq!(book.ledger("alex").await.unwrap().len(), 3);
    assert!(book.audit().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_matchup_settlements() {
    let db = TempDb::new();
    let book = Arc::new(open_book(&db).await);
    book.generate_lines(6, &sample_matchups()).await.unwrap();
    book.sync_participant("alex", "Alex").await.unwrap();
    for _ in 0..5 {
        book.place_wager(&over(10)).await.unwrap();
    }

    let score = FinalScore { team_a: 130.0, team_b: 100.0 };
    let handles = (0..3).map(|_| {
        let book = book.clone();
        tokio::spawn(async move { book.settle_matchup("m1", score).await })
    });
    let reports: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let settled: usize = reports.iter().map(|r| r.settled.len()).sum();
    assert_eq!(settled, 5);

    // 50 staked, five 19.09 payouts
    assert_eq!(book.balance("alex").await.unwrap(), dec!(145.45));
    assert!(book.store().pending_wagers_for_matchup("m1").await.unwrap().is_empty());
    assert!(book.audit().await.unwrap().is_empty());
}
