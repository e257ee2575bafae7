//! Engine facade and background loop.
//!
//! A single tokio interval drives all conversations: each tick scans for
//! due executions and hands them to the executor. No per-conversation
//! tasks, just a work queue of due execution ids.

use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::EngineConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{ConversationDirectory, Messenger};
use cadence_core::types::{EventType, FollowupExecution};
use chrono::{DateTime, Utc};

use cadence_store::FollowupStore;

use crate::executor::{self, ExecutionOutcome};
use crate::funnel::{self, FunnelCounts, FunnelEntry};
use crate::looper::{self, LoopDecision};
use crate::scheduler;

/// The follow-up engine — owns the store and the collaborator handles.
pub struct FollowupEngine {
    store: Arc<FollowupStore>,
    directory: Arc<dyn ConversationDirectory>,
    messenger: Arc<dyn Messenger>,
    send_timeout: Duration,
    tick_batch: usize,
}

impl FollowupEngine {
    pub fn new(
        store: Arc<FollowupStore>,
        directory: Arc<dyn ConversationDirectory>,
        messenger: Arc<dyn Messenger>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            directory,
            messenger,
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            tick_batch: config.tick_batch,
        }
    }

    pub fn store(&self) -> &Arc<FollowupStore> {
        &self.store
    }

    /// Schedule the next step for a conversation (see [`scheduler::schedule_next`]).
    pub fn schedule_next(
        &self,
        conversation_id: &str,
        config_id: &str,
    ) -> Result<Option<FollowupExecution>> {
        scheduler::schedule_next(&self.store, conversation_id, config_id)
    }

    /// One scan over due executions. Returns how many were handled.
    pub async fn tick(&self) -> Result<usize> {
        let due = self.store.due_executions(Utc::now(), self.tick_batch)?;
        if due.is_empty() {
            return Ok(0);
        }
        tracing::debug!("⏱️ Tick: {} due execution(s)", due.len());

        let mut handled = 0;
        for pending in due {
            let outcome = executor::execute(
                &self.store,
                self.directory.as_ref(),
                self.messenger.as_ref(),
                self.send_timeout,
                &pending.id,
            )
            .await;

            match outcome {
                Ok(ExecutionOutcome::Completed(done)) => {
                    handled += 1;
                    if let Err(e) = self.advance(&done) {
                        tracing::warn!(
                            "⚠️ Post-send advance failed for {}: {}",
                            done.conversation_id,
                            e
                        );
                    }
                }
                Ok(_) => handled += 1,
                Err(e) => tracing::warn!("⚠️ Execution {} errored: {}", pending.id, e),
            }
        }
        Ok(handled)
    }

    /// After a completed send: run the terminal-step decision, then
    /// auto-advance mid-sequence conversations when the campaign asks for it.
    fn advance(&self, done: &FollowupExecution) -> Result<()> {
        let config = self.store.get_config(&done.config_id)?;
        let steps = self.store.steps_for_config(&done.config_id)?;

        match looper::after_completed(&self.store, &config, &steps, done)? {
            LoopDecision::NotTerminal => {
                if config.auto_message {
                    match scheduler::schedule_next(&self.store, &done.conversation_id, &done.config_id)
                    {
                        Ok(_) => {}
                        // Recoverable: the campaign was disabled or emptied
                        // mid-sequence; skip, do not fail the tick.
                        Err(CadenceError::ConfigInactive(id)) => {
                            tracing::debug!("Campaign {id} went inactive — not advancing");
                        }
                        Err(CadenceError::NoSteps(id)) => {
                            tracing::debug!("Campaign {id} has no steps — not advancing");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            LoopDecision::Replied | LoopDecision::SequenceEnded | LoopDecision::Reentered(_) => {}
        }
        Ok(())
    }

    /// Inbound human message: update the directory and record engagement if
    /// a step had been sent to this conversation.
    pub fn handle_inbound(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.directory.record_inbound(conversation_id, at)?;
        if self.store.has_sent_step(conversation_id)? {
            self.store
                .append_history(conversation_id, EventType::UserResponded, None)?;
            tracing::info!("💬 {} responded", conversation_id);
        }
        Ok(())
    }

    /// Pause a conversation: cancel its pending executions so they never
    /// fire, and record the pause.
    pub fn pause_conversation(&self, conversation_id: &str) -> Result<usize> {
        self.directory.set_paused(conversation_id, true)?;
        let cancelled = self.store.cancel_scheduled_for_conversation(conversation_id)?;
        self.store
            .append_history(conversation_id, EventType::AgentPaused, None)?;
        tracing::info!(
            "⏸️ Paused {} ({} pending execution(s) cancelled)",
            conversation_id,
            cancelled
        );
        Ok(cancelled)
    }

    /// Resume only clears the pause flag. Nothing is rescheduled — that
    /// takes an explicit `schedule_next` call.
    pub fn resume_conversation(&self, conversation_id: &str) -> Result<()> {
        self.directory.set_paused(conversation_id, false)?;
        tracing::info!("▶️ Resumed {}", conversation_id);
        Ok(())
    }

    /// Operator cancellation: stop pending sends and record the fact.
    pub fn cancel_conversation(&self, conversation_id: &str) -> Result<usize> {
        let cancelled = self.store.cancel_scheduled_for_conversation(conversation_id)?;
        self.store
            .append_history(conversation_id, EventType::Cancelled, None)?;
        tracing::info!(
            "🛑 Cancelled {} ({} pending execution(s))",
            conversation_id,
            cancelled
        );
        Ok(cancelled)
    }

    /// Funnel view for a campaign: classified entries plus counts.
    pub fn funnel(
        &self,
        config_id: &str,
        window: Option<chrono::Duration>,
    ) -> Result<(Vec<FunnelEntry>, FunnelCounts)> {
        let entries =
            funnel::list_by_category(&self.store, self.directory.as_ref(), config_id, window)?;
        let counts = funnel::category_counts(&entries);
        Ok((entries, counts))
    }
}

/// Run the engine loop — spawn this as a background tokio task.
pub async fn spawn_engine(engine: Arc<FollowupEngine>, check_interval_secs: u64) {
    tracing::info!("⏰ Follow-up engine started (check every {}s)", check_interval_secs);

    let mut interval = tokio::time::interval(Duration::from_secs(check_interval_secs));
    loop {
        interval.tick().await;
        match engine.tick().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("📣 Tick handled {} execution(s)", n),
            Err(e) => tracing::warn!("⚠️ Tick failed: {}", e),
        }
    }
}
