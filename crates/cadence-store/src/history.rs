//! Append-only engagement history.
//!
//! No update or delete paths exist on purpose: the classifier derives funnel
//! categories by scanning these rows, so they must stay an immutable record.

use cadence_core::error::Result;
use cadence_core::types::{EventType, FollowupHistoryEvent};
use chrono::Utc;
use rusqlite::params;

use crate::db::{FollowupStore, parse_ts, store_err};

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<FollowupHistoryEvent>> {
    let event_str: String = row.get(2)?;
    let Some(event_type) = EventType::parse(&event_str) else {
        return Ok(None); // unknown kinds are skipped, not misfiled
    };
    let payload: Option<String> = row.get(3)?;
    Ok(Some(FollowupHistoryEvent {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        event_type,
        payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
        created_at: parse_ts(&row.get::<_, String>(4)?),
    }))
}

impl FollowupStore {
    /// Append one lifecycle event. Pure insert.
    pub fn append_history(
        &self,
        conversation_id: &str,
        event_type: EventType,
        payload: Option<serde_json::Value>,
    ) -> Result<FollowupHistoryEvent> {
        let event = FollowupHistoryEvent {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            event_type,
            payload,
            created_at: Utc::now(),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO followup_history (id, conversation_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id,
                event.conversation_id,
                event.event_type.as_str(),
                event.payload.as_ref().map(|p| p.to_string()),
                event.created_at.to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        tracing::debug!(
            "🧾 History: {} ← {}",
            event.conversation_id,
            event.event_type.as_str()
        );
        Ok(event)
    }

    /// Full event list for a conversation, oldest first.
    pub fn history_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<FollowupHistoryEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, conversation_id, event_type, payload, created_at
                 FROM followup_history WHERE conversation_id = ?1 ORDER BY created_at",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![conversation_id], row_to_event)
            .map_err(store_err)?;
        Ok(rows.filter_map(|r| r.ok()).flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_ordered() {
        let store = FollowupStore::open_in_memory().unwrap();
        store
            .append_history("conv-1", EventType::InfiniteLoop, Some(serde_json::json!({"iteration": 1})))
            .unwrap();
        store
            .append_history("conv-1", EventType::UserResponded, None)
            .unwrap();
        store.append_history("conv-2", EventType::NoResponse, None).unwrap();

        let events = store.history_for_conversation("conv-1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::InfiniteLoop);
        assert_eq!(events[0].payload.as_ref().unwrap()["iteration"], 1);
        assert_eq!(events[1].event_type, EventType::UserResponded);
    }
}
