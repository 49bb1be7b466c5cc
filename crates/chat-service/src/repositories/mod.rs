//! Persistence collaborators.
//!
//! Handlers and the stream session depend on these narrow capability traits
//! rather than on a concrete store. [`memory::InMemoryStore`] implements all
//! of them; tests substitute fakes.

pub mod memory;

pub use memory::InMemoryStore;

use chrono::{DateTime, Utc};
use common::error::Result;
use common::types::{MessageId, UserId};
use std::fmt;

/// A registered account.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &"[REDACTED]")
            .field("password_hash", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub from: String,
    pub to: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Result of a successful `MessageStore::persist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedMessage {
    pub message_id: MessageId,
    pub sent_at: DateTime<Utc>,
}

/// Latest message exchanged with one conversation partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub partner: String,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
}

/// Recipient existence check.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, identity: &str) -> Result<bool>;
}

/// Durable message write.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    async fn persist(
        &self,
        from: &str,
        to: &str,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<PersistedMessage>;
}

/// Account creation and lookup.
#[async_trait::async_trait]
pub trait UserAccounts: Send + Sync {
    /// Create an account. Fails with `AlreadyExists` for a taken identity.
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
}

/// Conversation queries.
#[async_trait::async_trait]
pub trait ConversationLog: Send + Sync {
    /// Most recent message per partner, newest conversation first.
    async fn recent_chats(&self, identity: &str, limit: usize) -> Result<Vec<ChatSummary>>;

    /// The `limit` most recent messages between two identities, oldest first.
    async fn history(&self, identity: &str, with: &str, limit: usize)
        -> Result<Vec<StoredMessage>>;
}
