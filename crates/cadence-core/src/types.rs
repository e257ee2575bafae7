//! Domain types for follow-up campaigns, steps, executions, and history.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A follow-up campaign: binds an agent to an ordered message sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupConfig {
    pub id: String,
    /// Which conversational agent this campaign belongs to.
    pub agent_id: String,
    pub name: String,
    /// Disabled campaigns never schedule. Soft-disable instead of delete
    /// while executions reference the campaign.
    pub is_active: bool,
    /// When true the engine auto-advances to the next step after each
    /// completed send; when false every step needs an explicit schedule call.
    pub auto_message: bool,
    /// Business-hours window start (campaign-local wall clock).
    pub business_start: NaiveTime,
    /// Business-hours window end, exclusive.
    pub business_end: NaiveTime,
    /// Optional infinite-loop range: re-enter at this step order...
    pub loop_from: Option<i64>,
    /// ...after completing this step order without a reply.
    pub loop_to: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FollowupConfig {
    /// The loop range, when both ends are configured.
    pub fn loop_range(&self) -> Option<(i64, i64)> {
        match (self.loop_from, self.loop_to) {
            (Some(from), Some(to)) => Some((from, to)),
            _ => None,
        }
    }
}

/// One templated, delay-offset message in a campaign sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupStep {
    pub id: String,
    pub config_id: String,
    /// 1-based position in the sequence, unique per campaign.
    pub step_order: i64,
    pub title: String,
    pub delay_value: i64,
    pub delay_unit: DelayUnit,
    /// Message template sent to the conversation.
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl FollowupStep {
    /// Delay offset of this step as a chrono duration.
    pub fn delay(&self) -> chrono::Duration {
        match self.delay_unit {
            DelayUnit::Minutes => chrono::Duration::minutes(self.delay_value),
            DelayUnit::Hours => chrono::Duration::hours(self.delay_value),
            DelayUnit::Days => chrono::Duration::days(self.delay_value),
        }
    }
}

/// Unit for a step's delay offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelayUnit::Minutes => "minutes",
            DelayUnit::Hours => "hours",
            DelayUnit::Days => "days",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "hours" => DelayUnit::Hours,
            "days" => DelayUnit::Days,
            _ => DelayUnit::Minutes,
        }
    }
}

/// One attempt to deliver one step to one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupExecution {
    pub id: String,
    pub config_id: String,
    pub conversation_id: String,
    pub step_id: String,
    pub status: ExecutionStatus,
    /// When the executor should pick this up.
    pub scheduled_at: DateTime<Utc>,
    /// Stamped at the scheduled→sent claim.
    pub sent_at: Option<DateTime<Utc>>,
    /// Set on executions created by a loop re-entry.
    pub is_infinite_loop: bool,
    /// How many loop cycles this conversation has been through. Only the
    /// loop controller increments this.
    pub loop_iteration: i64,
    /// Failure reason, for the operator error log.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Execution lifecycle. `scheduled → sent → completed` on the happy path,
/// `scheduled → failed` on send errors, `scheduled → cancelled` when the
/// conversation is paused or cancelled before the due time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Scheduled,
    Sent,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Scheduled => "scheduled",
            ExecutionStatus::Sent => "sent",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => ExecutionStatus::Sent,
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            "cancelled" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Scheduled,
        }
    }

    /// Terminal statuses free the conversation for the next step.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// An immutable fact about a conversation's engagement. Append-only; the
/// classifier reads the full event list instead of a mutable status column,
/// so funnel categories stay recomputable from raw history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupHistoryEvent {
    pub id: String,
    pub conversation_id: String,
    pub event_type: EventType,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle event kinds recorded per conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserResponded,
    NoResponse,
    AgentPaused,
    Cancelled,
    InfiniteLoop,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserResponded => "user_responded",
            EventType::NoResponse => "no_response",
            EventType::AgentPaused => "agent_paused",
            EventType::Cancelled => "cancelled",
            EventType::InfiniteLoop => "infinite_loop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_responded" => Some(EventType::UserResponded),
            "no_response" => Some(EventType::NoResponse),
            "agent_paused" => Some(EventType::AgentPaused),
            "cancelled" => Some(EventType::Cancelled),
            "infinite_loop" => Some(EventType::InfiniteLoop),
            _ => None,
        }
    }
}

/// Funnel bucket a conversation is classified into for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelCategory {
    Active,
    Responded,
    Lost,
    InfiniteLoop,
}

impl FunnelCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelCategory::Active => "active",
            FunnelCategory::Responded => "responded",
            FunnelCategory::Lost => "lost",
            FunnelCategory::InfiniteLoop => "infinite_loop",
        }
    }
}

/// Acknowledgement from the messaging transport that a message was accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider-side message id.
    pub message_id: String,
    pub accepted_at: DateTime<Utc>,
}
