//! faabook: betting lines, wagers and settlement over a fantasy league's
//! FAAB (free agent acquisition budget) currency.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod engine;
pub mod odds;
pub mod storage;
pub mod types;
