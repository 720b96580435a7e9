use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use fixdesk_core::domain::session::{ConversationId, SessionRecord, SessionState};

use super::{RepositoryError, SessionRepository};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

fn conversation_key(channel: &str, contact_handle: &str) -> String {
    format!("{channel}\u{1f}{contact_handle}")
}

impl InMemorySessionRepository {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get_or_create(
        &self,
        channel: &str,
        contact_handle: &str,
    ) -> Result<SessionRecord, RepositoryError> {
        let key = conversation_key(channel, contact_handle);
        if let Some(record) = self.sessions.read().await.get(&key) {
            return Ok(record.clone());
        }

        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(key)
            .or_insert_with(|| SessionRecord::new(channel, contact_handle, Utc::now()));
        Ok(record.clone())
    }

    async fn set_state(
        &self,
        id: &ConversationId,
        state: &SessionState,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .values_mut()
            .find(|record| &record.id == id)
            .ok_or_else(|| RepositoryError::NotFound(id.0.clone()))?;
        record.state = state.clone();
        record.updated_at = Utc::now();
        Ok(())
    }
}
