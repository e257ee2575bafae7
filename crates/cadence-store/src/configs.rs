//! Campaign config + step catalog CRUD.
//!
//! All loop-range and business-window validation happens here, at write
//! time, so the engine can assume any active campaign is well-formed.

use cadence_core::error::{CadenceError, Result};
use cadence_core::types::{DelayUnit, FollowupConfig, FollowupStep};
use chrono::{NaiveTime, Utc};
use rusqlite::params;

use crate::db::{FollowupStore, format_time, parse_time, parse_ts, store_err};

/// Input for creating a campaign. Loop ranges are configured through
/// [`ConfigUpdate`] once the step catalog exists, so the range can be
/// validated against real steps.
#[derive(Debug, Clone)]
pub struct ConfigDraft {
    pub agent_id: String,
    pub name: String,
    pub auto_message: bool,
    pub business_start: NaiveTime,
    pub business_end: NaiveTime,
}

/// Partial campaign update. `loop_from`/`loop_to` set the loop range when
/// both are present; `clear_loop` removes it.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub auto_message: Option<bool>,
    pub business_start: Option<NaiveTime>,
    pub business_end: Option<NaiveTime>,
    pub loop_from: Option<i64>,
    pub loop_to: Option<i64>,
    pub clear_loop: bool,
}

/// Input for creating a step.
#[derive(Debug, Clone)]
pub struct StepDraft {
    pub step_order: i64,
    pub title: String,
    pub delay_value: i64,
    pub delay_unit: DelayUnit,
    pub message: String,
}

const CONFIG_COLS: &str = "id, agent_id, name, is_active, auto_message, business_start, \
                           business_end, loop_from, loop_to, created_at, updated_at";
const STEP_COLS: &str =
    "id, config_id, step_order, title, delay_value, delay_unit, message, created_at";

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<FollowupConfig> {
    Ok(FollowupConfig {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get::<_, i64>(3)? != 0,
        auto_message: row.get::<_, i64>(4)? != 0,
        business_start: parse_time(&row.get::<_, String>(5)?),
        business_end: parse_time(&row.get::<_, String>(6)?),
        loop_from: row.get(7)?,
        loop_to: row.get(8)?,
        created_at: parse_ts(&row.get::<_, String>(9)?),
        updated_at: parse_ts(&row.get::<_, String>(10)?),
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<FollowupStep> {
    Ok(FollowupStep {
        id: row.get(0)?,
        config_id: row.get(1)?,
        step_order: row.get(2)?,
        title: row.get(3)?,
        delay_value: row.get(4)?,
        delay_unit: DelayUnit::parse(&row.get::<_, String>(5)?),
        message: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?),
    })
}

impl FollowupStore {
    /// Create a campaign. Starts active, without a loop range.
    pub fn insert_config(&self, draft: &ConfigDraft) -> Result<FollowupConfig> {
        if draft.business_start > draft.business_end {
            return Err(CadenceError::InvalidConfig(format!(
                "business window start {} is after end {}",
                draft.business_start, draft.business_end
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO followup_configs
             (id, agent_id, name, is_active, auto_message, business_start, business_end, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                draft.agent_id,
                draft.name,
                draft.auto_message as i64,
                format_time(draft.business_start),
                format_time(draft.business_end),
                now,
            ],
        )
        .map_err(store_err)?;
        drop(conn);

        tracing::info!("📋 Campaign created: '{}' ({})", draft.name, id);
        self.get_config(&id)
    }

    /// Get a campaign by id.
    pub fn get_config(&self, id: &str) -> Result<FollowupConfig> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CONFIG_COLS} FROM followup_configs WHERE id = ?1"),
            params![id],
            row_to_config,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                CadenceError::NotFound(format!("campaign {id}"))
            }
            other => store_err(other),
        })
    }

    /// List all campaigns, newest first.
    pub fn list_configs(&self) -> Result<Vec<FollowupConfig>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONFIG_COLS} FROM followup_configs ORDER BY created_at DESC"
            ))
            .map_err(store_err)?;
        let rows = stmt.query_map([], row_to_config).map_err(store_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Apply a partial update. Loop ranges are validated against the
    /// campaign's current step catalog before they land.
    pub fn update_config(&self, id: &str, update: &ConfigUpdate) -> Result<FollowupConfig> {
        let mut config = self.get_config(id)?;

        if let Some(name) = &update.name {
            config.name = name.clone();
        }
        if let Some(active) = update.is_active {
            config.is_active = active;
        }
        if let Some(auto) = update.auto_message {
            config.auto_message = auto;
        }
        if let Some(start) = update.business_start {
            config.business_start = start;
        }
        if let Some(end) = update.business_end {
            config.business_end = end;
        }
        if config.business_start > config.business_end {
            return Err(CadenceError::InvalidConfig(format!(
                "business window start {} is after end {}",
                config.business_start, config.business_end
            )));
        }

        if update.clear_loop {
            config.loop_from = None;
            config.loop_to = None;
        } else if update.loop_from.is_some() || update.loop_to.is_some() {
            let from = update.loop_from.ok_or_else(|| {
                CadenceError::InvalidConfig("loop range needs both from and to".into())
            })?;
            let to = update.loop_to.ok_or_else(|| {
                CadenceError::InvalidConfig("loop range needs both from and to".into())
            })?;
            self.validate_loop_range(id, from, to)?;
            config.loop_from = Some(from);
            config.loop_to = Some(to);
        }

        let conn = self.lock()?;
        conn.execute(
            "UPDATE followup_configs SET name=?1, is_active=?2, auto_message=?3,
             business_start=?4, business_end=?5, loop_from=?6, loop_to=?7, updated_at=?8
             WHERE id=?9",
            params![
                config.name,
                config.is_active as i64,
                config.auto_message as i64,
                format_time(config.business_start),
                format_time(config.business_end),
                config.loop_from,
                config.loop_to,
                Utc::now().to_rfc3339(),
                id,
            ],
        )
        .map_err(store_err)?;
        drop(conn);

        self.get_config(id)
    }

    /// Enable/disable a campaign (soft delete).
    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE followup_configs SET is_active=?1, updated_at=?2 WHERE id=?3",
                params![active as i64, Utc::now().to_rfc3339(), id],
            )
            .map_err(store_err)?;
        if n == 0 {
            return Err(CadenceError::NotFound(format!("campaign {id}")));
        }
        Ok(())
    }

    /// Delete a campaign and its steps. Rejected while scheduled executions
    /// still reference the campaign — disable it instead and let them drain.
    /// Completed/failed executions are kept for audit.
    pub fn delete_config(&self, id: &str) -> Result<()> {
        self.get_config(id)?;
        let pending = self.count_scheduled_for_config(id)?;
        if pending > 0 {
            return Err(CadenceError::ConfigInUse(id.to_string()));
        }
        let conn = self.lock()?;
        conn.execute("DELETE FROM followup_steps WHERE config_id=?1", params![id])
            .map_err(store_err)?;
        conn.execute("DELETE FROM followup_configs WHERE id=?1", params![id])
            .map_err(store_err)?;
        tracing::info!("🗑️ Campaign deleted: {}", id);
        Ok(())
    }

    fn validate_loop_range(&self, config_id: &str, from: i64, to: i64) -> Result<()> {
        if from > to {
            return Err(CadenceError::InvalidConfig(format!(
                "loop range from {from} is after to {to}"
            )));
        }
        let steps = self.steps_for_config(config_id)?;
        for order in [from, to] {
            if !steps.iter().any(|s| s.step_order == order) {
                return Err(CadenceError::InvalidConfig(format!(
                    "loop range references missing step order {order}"
                )));
            }
        }
        Ok(())
    }

    // ─── Step catalog ──────────────────────────────────────

    /// Add a step to a campaign.
    pub fn insert_step(&self, config_id: &str, draft: &StepDraft) -> Result<FollowupStep> {
        self.get_config(config_id)?;
        if draft.step_order < 1 {
            return Err(CadenceError::InvalidConfig(format!(
                "step order must be 1-based, got {}",
                draft.step_order
            )));
        }
        if draft.delay_value < 0 {
            return Err(CadenceError::InvalidConfig(format!(
                "negative delay {}",
                draft.delay_value
            )));
        }

        let exists: i64 = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT COUNT(*) FROM followup_steps WHERE config_id=?1 AND step_order=?2",
                params![config_id, draft.step_order],
                |r| r.get(0),
            )
            .map_err(store_err)?
        };
        if exists > 0 {
            return Err(CadenceError::InvalidConfig(format!(
                "step order {} already exists for campaign {config_id}",
                draft.step_order
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO followup_steps
             (id, config_id, step_order, title, delay_value, delay_unit, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                config_id,
                draft.step_order,
                draft.title,
                draft.delay_value,
                draft.delay_unit.as_str(),
                draft.message,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        drop(conn);

        self.get_step(&id)
    }

    /// Get a step by id.
    pub fn get_step(&self, id: &str) -> Result<FollowupStep> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {STEP_COLS} FROM followup_steps WHERE id = ?1"),
            params![id],
            row_to_step,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => CadenceError::NotFound(format!("step {id}")),
            other => store_err(other),
        })
    }

    /// All steps of a campaign, in sequence order.
    pub fn steps_for_config(&self, config_id: &str) -> Result<Vec<FollowupStep>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {STEP_COLS} FROM followup_steps WHERE config_id = ?1 ORDER BY step_order"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![config_id], row_to_step)
            .map_err(store_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete a step. Rejected when the step anchors its campaign's loop
    /// range — clear or move the range first.
    pub fn delete_step(&self, id: &str) -> Result<()> {
        let step = self.get_step(id)?;
        let config = self.get_config(&step.config_id)?;
        if let Some((from, to)) = config.loop_range()
            && (step.step_order == from || step.step_order == to)
        {
            return Err(CadenceError::InvalidConfig(format!(
                "step order {} anchors the loop range ({from}..{to})",
                step.step_order
            )));
        }
        let conn = self.lock()?;
        conn.execute("DELETE FROM followup_steps WHERE id=?1", params![id])
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn draft() -> ConfigDraft {
        ConfigDraft {
            agent_id: "agent-1".into(),
            name: "trial-welcome".into(),
            auto_message: true,
            business_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            business_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        }
    }

    fn step(order: i64, delay_value: i64, unit: DelayUnit) -> StepDraft {
        StepDraft {
            step_order: order,
            title: format!("step-{order}"),
            delay_value,
            delay_unit: unit,
            message: format!("message {order}"),
        }
    }

    #[test]
    fn test_config_crud() {
        let store = FollowupStore::open_in_memory().unwrap();
        let cfg = store.insert_config(&draft()).unwrap();
        assert!(cfg.is_active);
        assert!(cfg.loop_range().is_none());

        let fetched = store.get_config(&cfg.id).unwrap();
        assert_eq!(fetched.name, "trial-welcome");

        store.set_active(&cfg.id, false).unwrap();
        assert!(!store.get_config(&cfg.id).unwrap().is_active);

        store.delete_config(&cfg.id).unwrap();
        assert!(matches!(
            store.get_config(&cfg.id),
            Err(CadenceError::NotFound(_))
        ));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let store = FollowupStore::open_in_memory().unwrap();
        let mut d = draft();
        d.business_start = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        d.business_end = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert!(matches!(
            store.insert_config(&d),
            Err(CadenceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_steps_ordered_and_unique() {
        let store = FollowupStore::open_in_memory().unwrap();
        let cfg = store.insert_config(&draft()).unwrap();

        store.insert_step(&cfg.id, &step(2, 1, DelayUnit::Hours)).unwrap();
        store.insert_step(&cfg.id, &step(1, 0, DelayUnit::Minutes)).unwrap();
        let steps = store.steps_for_config(&cfg.id).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_order, 1);
        assert_eq!(steps[1].step_order, 2);

        assert!(matches!(
            store.insert_step(&cfg.id, &step(1, 0, DelayUnit::Minutes)),
            Err(CadenceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_loop_range_validated_against_steps() {
        let store = FollowupStore::open_in_memory().unwrap();
        let cfg = store.insert_config(&draft()).unwrap();
        store.insert_step(&cfg.id, &step(1, 0, DelayUnit::Minutes)).unwrap();
        store.insert_step(&cfg.id, &step(2, 1, DelayUnit::Hours)).unwrap();

        // Range referencing a missing step
        let bad = ConfigUpdate {
            loop_from: Some(1),
            loop_to: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            store.update_config(&cfg.id, &bad),
            Err(CadenceError::InvalidConfig(_))
        ));

        // Inverted range
        let inverted = ConfigUpdate {
            loop_from: Some(2),
            loop_to: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            store.update_config(&cfg.id, &inverted),
            Err(CadenceError::InvalidConfig(_))
        ));

        // Valid range
        let ok = ConfigUpdate {
            loop_from: Some(1),
            loop_to: Some(2),
            ..Default::default()
        };
        let updated = store.update_config(&cfg.id, &ok).unwrap();
        assert_eq!(updated.loop_range(), Some((1, 2)));

        // Anchoring step can't be deleted while the range points at it
        let steps = store.steps_for_config(&cfg.id).unwrap();
        assert!(matches!(
            store.delete_step(&steps[0].id),
            Err(CadenceError::InvalidConfig(_))
        ));

        // Clearing the range frees the step
        let clear = ConfigUpdate { clear_loop: true, ..Default::default() };
        store.update_config(&cfg.id, &clear).unwrap();
        store.delete_step(&steps[0].id).unwrap();
    }
}
