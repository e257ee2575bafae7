//! Executor — consumes due executions and drives the per-execution state
//! machine: `scheduled → sent → completed`, or `failed`/`cancelled`.

use std::time::Duration;

use cadence_core::error::Result;
use cadence_core::traits::{ConversationDirectory, Messenger};
use cadence_core::types::{EventType, ExecutionStatus, FollowupExecution};
use chrono::Utc;

use cadence_store::FollowupStore;

/// What happened to one execution on this tick.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Message sent and delivery confirmed.
    Completed(FollowupExecution),
    /// The conversation was paused between scheduling and execution; nothing
    /// was sent.
    CancelledPaused,
    /// Another tick claimed (or cancelled) this execution first.
    AlreadyClaimed,
    /// The send failed or timed out; the execution is terminally `failed`.
    Failed(String),
}

/// Execute one due execution.
///
/// The pause precondition is checked here, at execution time, because the
/// conversation may have been paused since scheduling. The claim is the
/// atomic conditional update — exactly one caller wins it, so exactly one
/// outbound message leaves per execution.
pub async fn execute(
    store: &FollowupStore,
    directory: &dyn ConversationDirectory,
    messenger: &dyn Messenger,
    send_timeout: Duration,
    execution_id: &str,
) -> Result<ExecutionOutcome> {
    let exec = store.get_execution(execution_id)?;
    if exec.status != ExecutionStatus::Scheduled {
        return Ok(ExecutionOutcome::AlreadyClaimed);
    }

    if directory.is_paused(&exec.conversation_id)? {
        if store.cancel_execution(execution_id)? {
            store.append_history(&exec.conversation_id, EventType::AgentPaused, None)?;
            tracing::info!(
                "⏸️ Conversation {} paused — execution {} cancelled",
                exec.conversation_id,
                execution_id
            );
        }
        return Ok(ExecutionOutcome::CancelledPaused);
    }

    if !store.claim_for_send(execution_id, Utc::now())? {
        return Ok(ExecutionOutcome::AlreadyClaimed);
    }

    let step = match store.get_step(&exec.step_id) {
        Ok(step) => step,
        // A claimed row must settle one way or the other; a missing step
        // (deleted mid-flight) fails it instead of stranding it in `sent`.
        Err(e) => {
            let reason = format!("step lookup failed: {e}");
            store.mark_failed(execution_id, &reason)?;
            tracing::error!("❌ {} for execution {}", reason, execution_id);
            return Ok(ExecutionOutcome::Failed(reason));
        }
    };
    let sent = tokio::time::timeout(
        send_timeout,
        messenger.send(&exec.conversation_id, &step.message),
    )
    .await;

    match sent {
        Ok(Ok(receipt)) => {
            store.mark_completed(execution_id)?;
            tracing::info!(
                "📨 Step {} delivered to {} (msg {})",
                step.step_order,
                exec.conversation_id,
                receipt.message_id
            );
            Ok(ExecutionOutcome::Completed(store.get_execution(execution_id)?))
        }
        Ok(Err(e)) => {
            let reason = e.to_string();
            store.mark_failed(execution_id, &reason)?;
            tracing::error!(
                "❌ Send failed for execution {} ({}): {}",
                execution_id,
                exec.conversation_id,
                reason
            );
            Ok(ExecutionOutcome::Failed(reason))
        }
        Err(_) => {
            let reason = format!("send timed out after {}s", send_timeout.as_secs());
            store.mark_failed(execution_id, &reason)?;
            tracing::error!(
                "❌ Send timeout for execution {} ({})",
                execution_id,
                exec.conversation_id
            );
            Ok(ExecutionOutcome::Failed(reason))
        }
    }
}
