//! Caller-side serialization of turns: one turn at a time per conversation.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use fixdesk_core::audit::AuditContext;
use fixdesk_core::domain::reply::Reply;
use fixdesk_core::domain::session::ConversationId;
use fixdesk_db::SessionRepository;

use crate::runtime::AgentRuntime;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundOutcome {
    pub conversation_id: ConversationId,
    pub reply: Option<Reply>,
    pub paused: bool,
}

pub struct ConversationService {
    repository: Arc<dyn SessionRepository>,
    runtime: Arc<AgentRuntime>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationService {
    pub fn new(repository: Arc<dyn SessionRepository>, runtime: Arc<AgentRuntime>) -> Self {
        Self { repository, runtime, locks: Mutex::new(HashMap::new()) }
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    fn lock_key(channel: &str, contact_handle: &str) -> String {
        format!("{channel}:{contact_handle}")
    }

    async fn conversation_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key.to_owned()).or_default())
    }

    /// Drops the entry for `key` once no other turn holds or waits on it.
    async fn release_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks.get(key).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(key);
        }
    }

    /// Number of conversations with a turn in flight or queued.
    pub async fn active_conversations(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Loads the session, runs one turn and persists the resulting state once.
    pub async fn handle_inbound(
        &self,
        channel: &str,
        contact_handle: &str,
        text: &str,
    ) -> Result<InboundOutcome> {
        let key = Self::lock_key(channel, contact_handle);
        let lock = self.conversation_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_locked(channel, contact_handle, text).await
        };
        self.release_lock(&key, lock).await;
        result
    }

    async fn run_locked(
        &self,
        channel: &str,
        contact_handle: &str,
        text: &str,
    ) -> Result<InboundOutcome> {
        let record = self
            .repository
            .get_or_create(channel, contact_handle)
            .await
            .context("failed to load session")?;

        let audit = AuditContext::new(
            Some(record.id.clone()),
            Some(channel.to_owned()),
            Uuid::new_v4().to_string(),
            "agent",
        );
        let result = self
            .runtime
            .process_turn_at(&audit, contact_handle, text, &record.state, Utc::now())
            .await;

        if result.next_state != record.state {
            self.repository
                .set_state(&record.id, &result.next_state)
                .await
                .context("failed to persist session state")?;
        }

        tracing::debug!(
            event_name = "conversation.turn_handled",
            correlation_id = %audit.correlation_id,
            conversation_id = %record.id.0,
            gate = result.gate.unwrap_or("none"),
            "inbound message handled"
        );

        Ok(InboundOutcome {
            conversation_id: record.id,
            paused: result.next_state.flags.bot_paused,
            reply: result.reply,
        })
    }
}
