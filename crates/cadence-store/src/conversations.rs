//! Conversation directory — the engine's view of conversation state owned
//! by the messaging side: pause flag and inbound-message timestamps, fed by
//! the gateway webhook.

use cadence_core::error::Result;
use cadence_core::traits::ConversationDirectory;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{FollowupStore, parse_ts_opt, store_err};

impl FollowupStore {
    fn ensure_conversation(&self, conversation_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![conversation_id, now],
        )
        .map_err(store_err)?;
        Ok(())
    }
}

impl ConversationDirectory for FollowupStore {
    fn is_paused(&self, conversation_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let paused = conn
            .query_row(
                "SELECT is_paused FROM conversations WHERE id = ?1",
                params![conversation_id],
                |r| r.get::<_, i64>(0),
            )
            .map(|v| v != 0);
        match paused {
            Ok(p) => Ok(p),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(store_err(e)),
        }
    }

    fn set_paused(&self, conversation_id: &str, paused: bool) -> Result<()> {
        self.ensure_conversation(conversation_id)?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE conversations SET is_paused = ?1, updated_at = ?2 WHERE id = ?3",
            params![paused as i64, Utc::now().to_rfc3339(), conversation_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn last_inbound_at(&self, conversation_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let ts = conn.query_row(
            "SELECT last_inbound_at FROM conversations WHERE id = ?1",
            params![conversation_id],
            |r| r.get::<_, Option<String>>(0),
        );
        match ts {
            Ok(s) => Ok(parse_ts_opt(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    fn record_inbound(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.ensure_conversation(conversation_id)?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE conversations SET last_inbound_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![at.to_rfc3339(), Utc::now().to_rfc3339(), conversation_id],
        )
        .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_conversation_defaults() {
        let store = FollowupStore::open_in_memory().unwrap();
        assert!(!store.is_paused("nobody").unwrap());
        assert!(store.last_inbound_at("nobody").unwrap().is_none());
    }

    #[test]
    fn test_pause_and_inbound_roundtrip() {
        let store = FollowupStore::open_in_memory().unwrap();
        store.set_paused("conv-1", true).unwrap();
        assert!(store.is_paused("conv-1").unwrap());
        store.set_paused("conv-1", false).unwrap();
        assert!(!store.is_paused("conv-1").unwrap());

        let at = Utc::now();
        store.record_inbound("conv-1", at).unwrap();
        let got = store.last_inbound_at("conv-1").unwrap().unwrap();
        assert_eq!(got.timestamp(), at.timestamp());
    }
}
