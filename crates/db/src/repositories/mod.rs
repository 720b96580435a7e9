use async_trait::async_trait;
use thiserror::Error;

use fixdesk_core::domain::session::{ConversationId, SessionRecord, SessionState};

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("session `{0}` was not found")]
    NotFound(String),
}

/// Session store. Writes are full-state replaces and the last writer wins.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Returns the session for `(channel, contact_handle)`, creating an empty one on first contact.
    async fn get_or_create(
        &self,
        channel: &str,
        contact_handle: &str,
    ) -> Result<SessionRecord, RepositoryError>;

    async fn set_state(
        &self,
        id: &ConversationId,
        state: &SessionState,
    ) -> Result<(), RepositoryError>;
}
