//! Funnel read API — the aggregation dashboards consume. Strictly
//! read-only: it never writes engine state, so it can run on every refresh.

use cadence_core::error::Result;
use cadence_core::traits::ConversationDirectory;
use cadence_core::types::FunnelCategory;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use cadence_store::FollowupStore;

use crate::classifier;

/// One conversation's funnel row.
#[derive(Debug, Clone, Serialize)]
pub struct FunnelEntry {
    pub conversation_id: String,
    pub category: FunnelCategory,
    pub current_step_order: Option<i64>,
    pub current_step_title: Option<String>,
    pub loop_iteration: i64,
    pub last_interaction: Option<DateTime<Utc>>,
}

/// Aggregate counts per category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FunnelCounts {
    pub active: usize,
    pub responded: usize,
    pub lost: usize,
    pub infinite_loop: usize,
}

impl FunnelCounts {
    pub fn total(&self) -> usize {
        self.active + self.responded + self.lost + self.infinite_loop
    }
}

/// List every non-paused conversation a campaign has touched, classified.
/// `window` restricts to conversations with executions created inside the
/// trailing duration.
pub fn list_by_category(
    store: &FollowupStore,
    directory: &dyn ConversationDirectory,
    config_id: &str,
    window: Option<Duration>,
) -> Result<Vec<FunnelEntry>> {
    let since = window.map(|w| Utc::now() - w);
    let mut entries = Vec::new();

    for conversation_id in store.conversations_for_config(config_id, since)? {
        let history = store.history_for_conversation(&conversation_id)?;
        let latest = store.latest_for_conversation(&conversation_id)?;
        let Some(category) = classifier::classify(&history, latest.as_ref()) else {
            continue; // paused conversations are not shown
        };

        let progress = store.latest_progress(&conversation_id, config_id)?;
        let (current_step_order, current_step_title) = match &progress {
            Some((exec, order)) => {
                let title = store.get_step(&exec.step_id).map(|s| s.title).ok();
                (Some(*order), title)
            }
            None => (None, None),
        };

        let last_interaction = [
            store.last_outbound_at(&conversation_id)?,
            history.last().map(|e| e.created_at),
            directory.last_inbound_at(&conversation_id)?,
        ]
        .into_iter()
        .flatten()
        .max();

        entries.push(FunnelEntry {
            conversation_id,
            category,
            current_step_order,
            current_step_title,
            loop_iteration: latest.map(|e| e.loop_iteration).unwrap_or(0),
            last_interaction,
        });
    }

    Ok(entries)
}

/// Fold entries into per-category counts.
pub fn category_counts(entries: &[FunnelEntry]) -> FunnelCounts {
    let mut counts = FunnelCounts::default();
    for entry in entries {
        match entry.category {
            FunnelCategory::Active => counts.active += 1,
            FunnelCategory::Responded => counts.responded += 1,
            FunnelCategory::Lost => counts.lost += 1,
            FunnelCategory::InfiniteLoop => counts.infinite_loop += 1,
        }
    }
    counts
}
