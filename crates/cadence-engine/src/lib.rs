//! # Cadence Engine
//!
//! The follow-up automation core: multi-step, time-delayed outbound
//! messaging sequences per conversation, with an execution ledger, an
//! infinite-loop re-cycling mode, and funnel classification derived from
//! immutable history.
//!
//! ## Architecture
//! ```text
//! Config + Step Catalog (store)
//!   → Scheduler: next due step per conversation, business-hours clamped
//!   → Engine tick (tokio interval): scan due executions
//!     → Executor: atomic claim → send via Messenger → completed/failed
//!       → Loop Controller: on terminal step, re-enter the loop range
//!         or close the sequence (no_response)
//!   → Classifier (read side): history events → funnel category
//! ```

pub mod classifier;
pub mod engine;
pub mod executor;
pub mod funnel;
pub mod looper;
pub mod scheduler;

pub use classifier::classify;
pub use engine::{FollowupEngine, spawn_engine};
pub use executor::ExecutionOutcome;
pub use funnel::{FunnelCounts, FunnelEntry};
pub use looper::LoopDecision;
