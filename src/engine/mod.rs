//! Core engine: lock schedule, wager placement, settlement, and the
//! `Sportsbook` facade that ties them to the odds engine and ledger store.

pub mod book;
pub mod lock;
pub mod settlement;
pub mod wager;
