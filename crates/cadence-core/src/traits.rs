//! Boundary traits for external collaborators.
//!
//! The engine never talks to WhatsApp or the conversation owner directly;
//! it goes through these seams so tests can substitute mocks and deployments
//! can swap transports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::DeliveryReceipt;

/// Outbound messaging transport.
#[async_trait]
pub trait Messenger: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one rendered message to a conversation. Implementations must
    /// bound their own network I/O; the executor additionally wraps the call
    /// in a timeout and treats expiry as a send failure.
    async fn send(&self, conversation_id: &str, body: &str) -> Result<DeliveryReceipt>;
}

/// Read/write access to conversation state owned by the messaging side:
/// pause flag and inbound-message timestamps.
pub trait ConversationDirectory: Send + Sync {
    fn is_paused(&self, conversation_id: &str) -> Result<bool>;

    fn set_paused(&self, conversation_id: &str, paused: bool) -> Result<()>;

    /// Timestamp of the most recent human message, if any.
    fn last_inbound_at(&self, conversation_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Called by the webhook intake for every inbound human message.
    fn record_inbound(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<()>;
}
