//! Funnel classifier — a pure function from raw history to a category.
//!
//! The priority order is a business decision, not a scan order: a reply
//! always wins no matter when it happened relative to a loop re-entry,
//! because any engagement counts as success. Classification reads the full
//! event list rather than a mutable status column, so it can be recomputed
//! at any time and stays consistent even when events arrive out of order.

use cadence_core::types::{EventType, FollowupExecution, FollowupHistoryEvent, FunnelCategory};

/// Classify a conversation from its history and most recent execution.
///
/// Returns `None` for paused conversations — they are excluded from every
/// funnel bucket. A conversation with no history at all is `Active`;
/// missing events are never an error.
pub fn classify(
    history: &[FollowupHistoryEvent],
    latest_execution: Option<&FollowupExecution>,
) -> Option<FunnelCategory> {
    let has = |t: EventType| history.iter().any(|e| e.event_type == t);

    if has(EventType::AgentPaused) {
        return None;
    }
    if has(EventType::UserResponded) {
        return Some(FunnelCategory::Responded);
    }
    if has(EventType::NoResponse) {
        return Some(FunnelCategory::Lost);
    }
    if has(EventType::InfiniteLoop) || latest_execution.is_some_and(|e| e.is_infinite_loop) {
        return Some(FunnelCategory::InfiniteLoop);
    }
    Some(FunnelCategory::Active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::ExecutionStatus;
    use chrono::{Duration, Utc};

    fn event(event_type: EventType, offset_secs: i64) -> FollowupHistoryEvent {
        FollowupHistoryEvent {
            id: format!("evt-{offset_secs}"),
            conversation_id: "conv-1".into(),
            event_type,
            payload: None,
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    fn loop_execution() -> FollowupExecution {
        FollowupExecution {
            id: "exec-1".into(),
            config_id: "cfg-1".into(),
            conversation_id: "conv-1".into(),
            step_id: "step-1".into(),
            status: ExecutionStatus::Scheduled,
            scheduled_at: Utc::now(),
            sent_at: None,
            is_infinite_loop: true,
            loop_iteration: 2,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_history_is_active() {
        assert_eq!(classify(&[], None), Some(FunnelCategory::Active));
    }

    #[test]
    fn test_reply_beats_no_response_in_either_order() {
        // no_response first, reply later
        let h = vec![event(EventType::NoResponse, 0), event(EventType::UserResponded, 10)];
        assert_eq!(classify(&h, None), Some(FunnelCategory::Responded));

        // reply first, no_response later — the reply still wins
        let h = vec![event(EventType::UserResponded, 0), event(EventType::NoResponse, 10)];
        assert_eq!(classify(&h, None), Some(FunnelCategory::Responded));
    }

    #[test]
    fn test_reply_beats_loop() {
        let h = vec![event(EventType::InfiniteLoop, 0), event(EventType::UserResponded, 10)];
        assert_eq!(classify(&h, None), Some(FunnelCategory::Responded));
    }

    #[test]
    fn test_no_response_is_lost() {
        let h = vec![event(EventType::NoResponse, 0)];
        assert_eq!(classify(&h, None), Some(FunnelCategory::Lost));
    }

    #[test]
    fn test_loop_from_event_or_execution_flag() {
        let h = vec![event(EventType::InfiniteLoop, 0)];
        assert_eq!(classify(&h, None), Some(FunnelCategory::InfiniteLoop));

        let exec = loop_execution();
        assert_eq!(classify(&[], Some(&exec)), Some(FunnelCategory::InfiniteLoop));
    }

    #[test]
    fn test_paused_excluded_regardless_of_other_history() {
        let h = vec![
            event(EventType::UserResponded, 0),
            event(EventType::AgentPaused, 5),
            event(EventType::InfiniteLoop, 10),
        ];
        assert_eq!(classify(&h, None), None);
    }

    #[test]
    fn test_cancelled_event_alone_stays_active() {
        // Operator cancellation is not a funnel outcome by itself.
        let h = vec![event(EventType::Cancelled, 0)];
        assert_eq!(classify(&h, None), Some(FunnelCategory::Active));
    }
}
