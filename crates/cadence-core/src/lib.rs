//! # Cadence Core
//!
//! Shared foundation for the follow-up automation engine: domain types,
//! configuration, the error type, and the traits that mark the boundary to
//! external collaborators (messaging transport, conversation directory).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use traits::{ConversationDirectory, Messenger};
pub use types::{
    DelayUnit, DeliveryReceipt, EventType, ExecutionStatus, FollowupConfig, FollowupExecution,
    FollowupHistoryEvent, FollowupStep, FunnelCategory,
};
