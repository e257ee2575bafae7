//! Loop controller — decides what happens when a completed execution lands
//! on the terminal step of its sequence.
//!
//! This is the only code path that increments `loop_iteration`, which keeps
//! the counter monotonic and auditable.

use cadence_core::error::Result;
use cadence_core::types::{EventType, FollowupConfig, FollowupExecution, FollowupStep};

use cadence_store::FollowupStore;

use crate::scheduler;

/// Outcome of the terminal-step decision.
#[derive(Debug)]
pub enum LoopDecision {
    /// The completed step was not the terminal one; the scheduler may
    /// advance the sequence as usual.
    NotTerminal,
    /// The user replied since the step was sent — the sequence is over and
    /// classification will show `responded`.
    Replied,
    /// No loop range is configured; the sequence ended unanswered and a
    /// `no_response` event was recorded.
    SequenceEnded,
    /// Looped back to the configured entry step with a bumped iteration.
    Reentered(FollowupExecution),
}

/// Run the terminal-step check for a just-completed execution.
pub fn after_completed(
    store: &FollowupStore,
    config: &FollowupConfig,
    steps: &[FollowupStep],
    completed: &FollowupExecution,
) -> Result<LoopDecision> {
    let Some(step) = steps.iter().find(|s| s.id == completed.step_id) else {
        return Ok(LoopDecision::NotTerminal);
    };
    if step.step_order < scheduler::terminal_order(config, steps) {
        return Ok(LoopDecision::NotTerminal);
    }

    // Any engagement counts as success. Reply events only exist after a
    // step was sent, so a recorded reply anywhere in the history — even one
    // that landed mid-cycle while later steps were already pending — stops
    // the loop.
    let replied = store
        .history_for_conversation(&completed.conversation_id)?
        .iter()
        .any(|e| e.event_type == EventType::UserResponded);
    if replied {
        return Ok(LoopDecision::Replied);
    }

    if config.loop_range().is_none() {
        store.append_history(&completed.conversation_id, EventType::NoResponse, None)?;
        tracing::info!(
            "🔚 Sequence ended unanswered for {} (campaign {})",
            completed.conversation_id,
            config.id
        );
        return Ok(LoopDecision::SequenceEnded);
    }

    match scheduler::schedule_reentry(store, config, steps, completed)? {
        Some(reentry) => {
            store.append_history(
                &completed.conversation_id,
                EventType::InfiniteLoop,
                Some(serde_json::json!({ "iteration": reentry.loop_iteration })),
            )?;
            tracing::info!(
                "🔁 Loop re-entry for {} — iteration {}",
                completed.conversation_id,
                reentry.loop_iteration
            );
            Ok(LoopDecision::Reentered(reentry))
        }
        // Entry step already pending (racing tick) — nothing to do.
        None => Ok(LoopDecision::NotTerminal),
    }
}
