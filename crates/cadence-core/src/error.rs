//! Error types for the Cadence engine.

use thiserror::Error;

/// Result alias used across all Cadence crates.
pub type Result<T> = std::result::Result<T, CadenceError>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum CadenceError {
    /// Configuration file problems (missing, unreadable, invalid TOML).
    #[error("Config error: {0}")]
    Config(String),

    /// SQLite persistence errors.
    #[error("Store error: {0}")]
    Store(String),

    /// Messaging channel errors (send failures, timeouts, API rejections).
    #[error("Channel error: {0}")]
    Channel(String),

    /// Scheduling was requested for a disabled campaign. Recoverable: the
    /// caller logs and skips, no execution is created.
    #[error("Campaign {0} is inactive")]
    ConfigInactive(String),

    /// Scheduling was requested for a campaign with an empty step catalog.
    /// Recoverable in the same way as `ConfigInactive`.
    #[error("Campaign {0} has no steps")]
    NoSteps(String),

    /// A campaign delete was rejected because pending executions still
    /// reference it.
    #[error("Campaign {0} still has scheduled executions")]
    ConfigInUse(String),

    /// Campaign validation failed at write time (loop range out of bounds,
    /// inverted business-hours window, duplicate step order).
    #[error("Invalid campaign: {0}")]
    InvalidConfig(String),

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
