//! Scheduler — computes the next due step for a conversation and creates
//! the pending execution record.

use cadence_core::error::{CadenceError, Result};
use cadence_core::types::{ExecutionStatus, FollowupConfig, FollowupExecution, FollowupStep};
use chrono::{DateTime, NaiveTime, Utc};

use cadence_store::FollowupStore;

/// Schedule the next step of a campaign for a conversation.
///
/// Returns `Ok(None)` when there is nothing to do: the conversation already
/// has a pending or in-flight execution, or it sits on the terminal step
/// (the loop controller owns what happens there). Errors with
/// `ConfigInactive`/`NoSteps` are recoverable — callers log and move on.
pub fn schedule_next(
    store: &FollowupStore,
    conversation_id: &str,
    config_id: &str,
) -> Result<Option<FollowupExecution>> {
    let config = store.get_config(config_id)?;
    if !config.is_active {
        return Err(CadenceError::ConfigInactive(config_id.to_string()));
    }
    let steps = store.steps_for_config(config_id)?;
    if steps.is_empty() {
        return Err(CadenceError::NoSteps(config_id.to_string()));
    }

    let now = Utc::now();
    let (next_step, base, in_loop, iteration) =
        match store.latest_progress(conversation_id, config_id)? {
            // Fresh conversation: enter at the first step, counted from now.
            None => (steps[0].clone(), now, false, 0),
            Some((exec, order)) => match exec.status {
                // Step in flight — never schedule N+1 before N settles.
                ExecutionStatus::Scheduled | ExecutionStatus::Sent => return Ok(None),
                // Failed sends are terminal per execution; a fresh attempt at
                // the same step is an explicit re-scheduling pass.
                ExecutionStatus::Failed => {
                    let step = steps
                        .iter()
                        .find(|s| s.id == exec.step_id)
                        .cloned()
                        .ok_or_else(|| CadenceError::NotFound(format!("step {}", exec.step_id)))?;
                    (step, now, exec.is_infinite_loop, exec.loop_iteration)
                }
                ExecutionStatus::Completed => {
                    if order >= terminal_order(&config, &steps) {
                        return Ok(None);
                    }
                    let Some(step) = steps.iter().find(|s| s.step_order > order).cloned() else {
                        return Ok(None);
                    };
                    (
                        step,
                        exec.sent_at.unwrap_or(now),
                        exec.is_infinite_loop,
                        exec.loop_iteration,
                    )
                }
                // Cancelled rows are filtered by the progress query; if a
                // conversation only ever had cancelled steps it starts over.
                ExecutionStatus::Cancelled => (steps[0].clone(), now, false, 0),
            },
        };

    let due = clamp_into_window(base + next_step.delay(), config.business_start, config.business_end);
    let created = store.insert_scheduled(
        config_id,
        conversation_id,
        &next_step.id,
        due,
        in_loop,
        iteration,
    )?;

    match &created {
        Some(exec) => tracing::info!(
            "📆 Scheduled step {} for {} at {}",
            next_step.step_order,
            conversation_id,
            exec.scheduled_at
        ),
        None => tracing::debug!(
            "Step {} already pending for {} — no-op",
            next_step.step_order,
            conversation_id
        ),
    }
    Ok(created)
}

/// Re-enter the loop range after an unanswered terminal step. Only the loop
/// controller calls this; it is the one place the iteration counter grows.
pub(crate) fn schedule_reentry(
    store: &FollowupStore,
    config: &FollowupConfig,
    steps: &[FollowupStep],
    completed: &FollowupExecution,
) -> Result<Option<FollowupExecution>> {
    let (from, _) = config
        .loop_range()
        .ok_or_else(|| CadenceError::InvalidConfig("loop re-entry without a range".into()))?;
    let step = steps
        .iter()
        .find(|s| s.step_order == from)
        .ok_or_else(|| CadenceError::NotFound(format!("loop entry step order {from}")))?;

    let base = completed.sent_at.unwrap_or_else(Utc::now);
    let due = clamp_into_window(base + step.delay(), config.business_start, config.business_end);
    store.insert_scheduled(
        &config.id,
        &completed.conversation_id,
        &step.id,
        due,
        true,
        completed.loop_iteration + 1,
    )
}

/// The step order after which the sequence either loops or ends.
pub(crate) fn terminal_order(config: &FollowupConfig, steps: &[FollowupStep]) -> i64 {
    config
        .loop_range()
        .map(|(_, to)| to)
        .unwrap_or_else(|| steps.iter().map(|s| s.step_order).max().unwrap_or(0))
}

/// Clamp a due time into the business-hours window. A time before the
/// window opens moves to today's opening; at or past the close (exclusive)
/// it moves to tomorrow's opening. `start == end` means the window is
/// disabled and the due time passes through.
pub fn clamp_into_window(due: DateTime<Utc>, start: NaiveTime, end: NaiveTime) -> DateTime<Utc> {
    if start == end {
        return due;
    }
    let t = due.time();
    if t < start {
        due.date_naive().and_time(start).and_utc()
    } else if t >= end {
        (due.date_naive() + chrono::Duration::days(1))
            .and_time(start)
            .and_utc()
    } else {
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_inside_window_untouched() {
        let due = at(10, 30);
        assert_eq!(clamp_into_window(due, t(8, 0), t(20, 0)), due);
    }

    #[test]
    fn test_before_open_moves_to_opening() {
        let clamped = clamp_into_window(at(6, 15), t(8, 0), t(20, 0));
        assert_eq!(clamped, at(8, 0));
    }

    #[test]
    fn test_after_close_moves_to_next_opening() {
        let clamped = clamp_into_window(at(21, 45), t(8, 0), t(20, 0));
        assert_eq!(clamped.time(), t(8, 0));
        assert_eq!(clamped.date_naive(), at(0, 0).date_naive() + chrono::Duration::days(1));
    }

    #[test]
    fn test_close_is_exclusive() {
        let clamped = clamp_into_window(at(20, 0), t(8, 0), t(20, 0));
        assert_eq!(clamped.time(), t(8, 0));
        assert_eq!(clamped.date_naive(), at(0, 0).date_naive() + chrono::Duration::days(1));
    }

    #[test]
    fn test_equal_bounds_disable_clamping() {
        let due = at(3, 0);
        assert_eq!(clamp_into_window(due, t(0, 0), t(0, 0)), due);
    }
}
