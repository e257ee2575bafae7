//! # Cadence Store
//!
//! SQLite-backed persistence for the follow-up engine — survives restarts,
//! supports concurrent access through WAL mode. One database holds the
//! campaign definitions (config store + step catalog), the execution ledger,
//! the append-only history, and the conversation directory.

mod configs;
mod conversations;
mod db;
mod executions;
mod history;

pub use configs::{ConfigDraft, ConfigUpdate, StepDraft};
pub use db::FollowupStore;
