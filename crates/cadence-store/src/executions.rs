//! Execution ledger — one row per (conversation, step) delivery attempt.
//!
//! Rows are never deleted; they are the audit trail the classifier and the
//! dashboards read. The two writes that matter for correctness are the
//! guarded insert (idempotent scheduling) and the conditional claim
//! (`scheduled → sent` happens exactly once even with racing ticks).

use cadence_core::error::{CadenceError, Result};
use cadence_core::types::{ExecutionStatus, FollowupExecution};
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{FollowupStore, parse_ts, parse_ts_opt, store_err};

const EXEC_COLS: &str = "id, config_id, conversation_id, step_id, status, scheduled_at, \
                         sent_at, is_infinite_loop, loop_iteration, error, created_at";

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<FollowupExecution> {
    Ok(FollowupExecution {
        id: row.get(0)?,
        config_id: row.get(1)?,
        conversation_id: row.get(2)?,
        step_id: row.get(3)?,
        status: ExecutionStatus::parse(&row.get::<_, String>(4)?),
        scheduled_at: parse_ts(&row.get::<_, String>(5)?),
        sent_at: parse_ts_opt(row.get(6)?),
        is_infinite_loop: row.get::<_, i64>(7)? != 0,
        loop_iteration: row.get(8)?,
        error: row.get(9)?,
        created_at: parse_ts(&row.get::<_, String>(10)?),
    })
}

impl FollowupStore {
    /// Insert a `scheduled` execution unless one already exists for this
    /// (conversation, step) pair. Returns `None` on the duplicate — the
    /// idempotent-scheduling no-op.
    pub fn insert_scheduled(
        &self,
        config_id: &str,
        conversation_id: &str,
        step_id: &str,
        scheduled_at: DateTime<Utc>,
        is_infinite_loop: bool,
        loop_iteration: i64,
    ) -> Result<Option<FollowupExecution>> {
        let id = uuid::Uuid::new_v4().to_string();
        let inserted = {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO followup_executions
                 (id, config_id, conversation_id, step_id, status, scheduled_at,
                  is_infinite_loop, loop_iteration, created_at)
                 SELECT ?1, ?2, ?3, ?4, 'scheduled', ?5, ?6, ?7, ?8
                 WHERE NOT EXISTS (
                     SELECT 1 FROM followup_executions
                     WHERE conversation_id = ?3 AND step_id = ?4 AND status = 'scheduled'
                 )",
                params![
                    id,
                    config_id,
                    conversation_id,
                    step_id,
                    scheduled_at.to_rfc3339(),
                    is_infinite_loop as i64,
                    loop_iteration,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_err)?
        };

        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(self.get_execution(&id)?))
    }

    /// Get an execution by id.
    pub fn get_execution(&self, id: &str) -> Result<FollowupExecution> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {EXEC_COLS} FROM followup_executions WHERE id = ?1"),
            params![id],
            row_to_execution,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                CadenceError::NotFound(format!("execution {id}"))
            }
            other => store_err(other),
        })
    }

    /// Claim an execution for sending: the single atomic
    /// `scheduled → sent` transition. Returns false when another tick
    /// already claimed (or cancelled) the row.
    pub fn claim_for_send(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE followup_executions SET status='sent', sent_at=?1
                 WHERE id=?2 AND status='scheduled'",
                params![now.to_rfc3339(), id],
            )
            .map_err(store_err)?;
        Ok(n == 1)
    }

    /// Delivery confirmed: `sent → completed`.
    pub fn mark_completed(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE followup_executions SET status='completed' WHERE id=?1 AND status='sent'",
                params![id],
            )
            .map_err(store_err)?;
        if n == 0 {
            return Err(CadenceError::Store(format!(
                "execution {id} not in sent state"
            )));
        }
        Ok(())
    }

    /// Send failed: terminal, with the reason kept for the operator log.
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE followup_executions SET status='failed', error=?1 WHERE id=?2",
            params![error, id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Cancel a single execution if it is still pending.
    pub fn cancel_execution(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE followup_executions SET status='cancelled' WHERE id=?1 AND status='scheduled'",
                params![id],
            )
            .map_err(store_err)?;
        Ok(n == 1)
    }

    /// Cancel every pending execution of a conversation (pause/cancel path).
    /// Returns how many rows were cancelled.
    pub fn cancel_scheduled_for_conversation(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE followup_executions SET status='cancelled'
             WHERE conversation_id=?1 AND status='scheduled'",
            params![conversation_id],
        )
        .map_err(store_err)
    }

    /// Executions due for sending: `scheduled_at ≤ now`, oldest first.
    pub fn due_executions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<FollowupExecution>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXEC_COLS} FROM followup_executions
                 WHERE status = 'scheduled' AND scheduled_at <= ?1
                 ORDER BY scheduled_at LIMIT ?2"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![now.to_rfc3339(), limit as i64], row_to_execution)
            .map_err(store_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// The conversation's progress marker: its most recent non-cancelled
    /// execution, plus that step's order. Cancelled rows are skipped so a
    /// resumed conversation re-enters at the right step. Recency (not
    /// highest step order) is what makes loop re-entries advance: after a
    /// re-entry the newest execution sits at the loop's entry step, below
    /// older completed rows.
    pub fn latest_progress(
        &self,
        conversation_id: &str,
        config_id: &str,
    ) -> Result<Option<(FollowupExecution, i64)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT e.id, e.config_id, e.conversation_id, e.step_id, e.status, e.scheduled_at,
                        e.sent_at, e.is_infinite_loop, e.loop_iteration, e.error, e.created_at,
                        s.step_order
                 FROM followup_executions e
                 JOIN followup_steps s ON s.id = e.step_id
                 WHERE e.conversation_id = ?1 AND e.config_id = ?2 AND e.status != 'cancelled'
                 ORDER BY e.created_at DESC, s.step_order DESC
                 LIMIT 1",
            )
            .map_err(store_err)?;
        let row = stmt
            .query_row(params![conversation_id, config_id], |row| {
                Ok((row_to_execution(row)?, row.get::<_, i64>(11)?))
            });
        match row {
            Ok(pair) => Ok(Some(pair)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    /// Most recently created execution for a conversation, any status.
    /// The classifier's "most recent execution" input.
    pub fn latest_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<FollowupExecution>> {
        let conn = self.lock()?;
        let row = conn.query_row(
            &format!(
                "SELECT {EXEC_COLS} FROM followup_executions
                 WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT 1"
            ),
            params![conversation_id],
            row_to_execution,
        );
        match row {
            Ok(exec) => Ok(Some(exec)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    /// When the most recent step went out to this conversation, if ever.
    pub fn last_outbound_at(&self, conversation_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let ts: Option<String> = conn
            .query_row(
                "SELECT MAX(sent_at) FROM followup_executions WHERE conversation_id = ?1",
                params![conversation_id],
                |r| r.get(0),
            )
            .map_err(store_err)?;
        Ok(parse_ts_opt(ts))
    }

    /// Whether any step has been sent to this conversation. Gates the
    /// `user_responded` history event on inbound messages.
    pub fn has_sent_step(&self, conversation_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM followup_executions
                 WHERE conversation_id = ?1 AND sent_at IS NOT NULL",
                params![conversation_id],
                |r| r.get(0),
            )
            .map_err(store_err)?;
        Ok(n > 0)
    }

    /// Failed executions, newest first — the operator-visible error log.
    pub fn failed_executions(&self, limit: usize) -> Result<Vec<FollowupExecution>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXEC_COLS} FROM followup_executions
                 WHERE status = 'failed' ORDER BY created_at DESC LIMIT ?1"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_execution)
            .map_err(store_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Distinct conversations a campaign has touched, optionally limited to
    /// executions created after `since`.
    pub fn conversations_for_config(
        &self,
        config_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let since_str = since.map(|t| t.to_rfc3339()).unwrap_or_default();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT conversation_id FROM followup_executions
                 WHERE config_id = ?1 AND (?2 = '' OR created_at >= ?2)
                 ORDER BY conversation_id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![config_id, since_str], |row| row.get::<_, String>(0))
            .map_err(store_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Pending-execution count for a campaign (delete guard).
    pub fn count_scheduled_for_config(&self, config_id: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM followup_executions
             WHERE config_id = ?1 AND status = 'scheduled'",
            params![config_id],
            |r| r.get(0),
        )
        .map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{ConfigDraft, StepDraft};
    use cadence_core::types::DelayUnit;
    use chrono::NaiveTime;

    fn seeded() -> (FollowupStore, String, String) {
        let store = FollowupStore::open_in_memory().unwrap();
        let cfg = store
            .insert_config(&ConfigDraft {
                agent_id: "agent-1".into(),
                name: "test".into(),
                auto_message: true,
                business_start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                business_end: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            })
            .unwrap();
        let step = store
            .insert_step(
                &cfg.id,
                &StepDraft {
                    step_order: 1,
                    title: "first".into(),
                    delay_value: 0,
                    delay_unit: DelayUnit::Minutes,
                    message: "hi".into(),
                },
            )
            .unwrap();
        (store, cfg.id, step.id)
    }

    #[test]
    fn test_guarded_insert_is_idempotent() {
        let (store, cfg, step) = seeded();
        let now = Utc::now();

        let first = store
            .insert_scheduled(&cfg, "conv-1", &step, now, false, 0)
            .unwrap();
        assert!(first.is_some());

        let dup = store
            .insert_scheduled(&cfg, "conv-1", &step, now, false, 0)
            .unwrap();
        assert!(dup.is_none());

        // A different conversation is unaffected
        let other = store
            .insert_scheduled(&cfg, "conv-2", &step, now, false, 0)
            .unwrap();
        assert!(other.is_some());
    }

    #[test]
    fn test_claim_exactly_once() {
        let (store, cfg, step) = seeded();
        let now = Utc::now();
        let exec = store
            .insert_scheduled(&cfg, "conv-1", &step, now, false, 0)
            .unwrap()
            .unwrap();

        assert!(store.claim_for_send(&exec.id, now).unwrap());
        // Racing second claimer observes the row already taken
        assert!(!store.claim_for_send(&exec.id, now).unwrap());

        let claimed = store.get_execution(&exec.id).unwrap();
        assert_eq!(claimed.status, ExecutionStatus::Sent);
        assert!(claimed.sent_at.is_some());
    }

    #[test]
    fn test_cancel_only_hits_pending() {
        let (store, cfg, step) = seeded();
        let now = Utc::now();
        let exec = store
            .insert_scheduled(&cfg, "conv-1", &step, now, false, 0)
            .unwrap()
            .unwrap();
        store.claim_for_send(&exec.id, now).unwrap();
        store.mark_completed(&exec.id).unwrap();

        // Completed rows are not cancellable
        assert_eq!(store.cancel_scheduled_for_conversation("conv-1").unwrap(), 0);
        assert_eq!(
            store.get_execution(&exec.id).unwrap().status,
            ExecutionStatus::Completed
        );
    }

    #[test]
    fn test_due_ordering_and_cutoff() {
        let (store, cfg, step) = seeded();
        let now = Utc::now();
        store
            .insert_scheduled(&cfg, "conv-1", &step, now - chrono::Duration::minutes(5), false, 0)
            .unwrap();
        store
            .insert_scheduled(&cfg, "conv-2", &step, now + chrono::Duration::hours(1), false, 0)
            .unwrap();

        let due = store.due_executions(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].conversation_id, "conv-1");
    }

    #[test]
    fn test_delete_config_rejected_while_pending() {
        let (store, cfg, step) = seeded();
        let exec = store
            .insert_scheduled(&cfg, "conv-1", &step, Utc::now(), false, 0)
            .unwrap()
            .unwrap();

        assert!(matches!(
            store.delete_config(&cfg),
            Err(CadenceError::ConfigInUse(_))
        ));

        // Drained campaign deletes fine
        store.claim_for_send(&exec.id, Utc::now()).unwrap();
        store.mark_completed(&exec.id).unwrap();
        store.delete_config(&cfg).unwrap();
    }

    #[test]
    fn test_failed_log() {
        let (store, cfg, step) = seeded();
        let exec = store
            .insert_scheduled(&cfg, "conv-1", &step, Utc::now(), false, 0)
            .unwrap()
            .unwrap();
        store.mark_failed(&exec.id, "API error 500").unwrap();

        let failed = store.failed_executions(10).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("API error 500"));
    }
}
