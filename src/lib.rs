//! Gavel - auction lifecycle and bidding transaction engine.
//!
//! Core of a collectible-marketplace auction system: bid placement
//! under concurrency, a wallet ledger with an append-only entry trail,
//! a time-driven auction state machine, a durable delayed-task
//! scheduler, and per-auction event fan-out.

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod hub;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod orders;
pub mod scheduler;
pub mod storage;
