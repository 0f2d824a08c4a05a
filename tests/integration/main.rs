//! End-to-end tests against a file-backed ledger store.

mod concurrency;
mod harness;
mod scenario;
