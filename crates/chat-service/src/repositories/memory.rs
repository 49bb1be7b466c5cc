//! In-memory implementation of the persistence collaborators.
//!
//! Not durable: contents are lost on restart.

use super::{
    ChatSummary, ConversationLog, MessageStore, PersistedMessage, StoredMessage, User,
    UserAccounts, UserDirectory,
};
use chrono::{DateTime, Utc};
use common::error::{ChatCommonError, Result};
use common::identity::normalize_identity;
use common::types::{MessageId, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, User>>,
    messages: RwLock<Vec<StoredMessage>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryStore {
    async fn user_exists(&self, identity: &str) -> Result<bool> {
        Ok(self
            .users
            .read()
            .await
            .contains_key(&normalize_identity(identity)))
    }
}

#[async_trait::async_trait]
impl MessageStore for InMemoryStore {
    async fn persist(
        &self,
        from: &str,
        to: &str,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<PersistedMessage> {
        let message = StoredMessage {
            id: MessageId::new(),
            from: normalize_identity(from),
            to: normalize_identity(to),
            content: content.to_string(),
            sent_at,
        };
        let persisted = PersistedMessage {
            message_id: message.id,
            sent_at: message.sent_at,
        };
        self.messages.write().await.push(message);
        Ok(persisted)
    }
}

#[async_trait::async_trait]
impl UserAccounts for InMemoryStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User> {
        let email = normalize_identity(email);
        let mut users = self.users.write().await;
        if users.contains_key(&email) {
            return Err(ChatCommonError::AlreadyExists("user".to_string()));
        }
        let user = User {
            id: UserId::new(),
            email: email.clone(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        users.insert(email, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .get(&normalize_identity(email))
            .cloned())
    }
}

#[async_trait::async_trait]
impl ConversationLog for InMemoryStore {
    async fn recent_chats(&self, identity: &str, limit: usize) -> Result<Vec<ChatSummary>> {
        let identity = normalize_identity(identity);
        let messages = self.messages.read().await;

        let mut latest: HashMap<&str, &StoredMessage> = HashMap::new();
        for message in messages.iter() {
            let partner = if message.from == identity {
                message.to.as_str()
            } else if message.to == identity {
                message.from.as_str()
            } else {
                continue;
            };
            // Later pushes win ties on equal timestamps.
            let newer = latest
                .get(partner)
                .map_or(true, |existing| existing.sent_at <= message.sent_at);
            if newer {
                latest.insert(partner, message);
            }
        }

        let mut summaries: Vec<ChatSummary> = latest
            .into_iter()
            .map(|(partner, message)| ChatSummary {
                partner: partner.to_string(),
                last_message: message.content.clone(),
                last_message_at: message.sent_at,
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.partner.cmp(&b.partner))
        });
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn history(
        &self,
        identity: &str,
        with: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let identity = normalize_identity(identity);
        let with = normalize_identity(with);
        let messages = self.messages.read().await;

        let mut conversation: Vec<StoredMessage> = messages
            .iter()
            .filter(|m| {
                (m.from == identity && m.to == with) || (m.from == with && m.to == identity)
            })
            .cloned()
            .collect();

        // Stable sort keeps insertion order for equal timestamps.
        conversation.sort_by_key(|m| m.sent_at);
        let skip = conversation.len().saturating_sub(limit);
        Ok(conversation.split_off(skip))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = InMemoryStore::new();
        let user = store.create_user(" Alice@Example.com", "hash").await.unwrap();

        assert_eq!(user.email, "alice@example.com");
        let found = store.find_by_email("ALICE@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(store.user_exists("alice@example.com").await.unwrap());
        assert!(!store.user_exists("bob@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let store = InMemoryStore::new();
        store.create_user("alice@example.com", "h1").await.unwrap();

        let err = store.create_user("Alice@example.com", "h2").await.unwrap_err();
        assert!(matches!(err, ChatCommonError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_persist_assigns_unique_ids() {
        let store = InMemoryStore::new();
        let a = store.persist("a@x", "b@x", "one", at(0)).await.unwrap();
        let b = store.persist("a@x", "b@x", "two", at(1)).await.unwrap();

        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.sent_at, at(0));
        assert_eq!(store.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_history_both_directions_oldest_first() {
        let store = InMemoryStore::new();
        store.persist("a@x", "b@x", "1", at(1)).await.unwrap();
        store.persist("b@x", "a@x", "2", at(2)).await.unwrap();
        store.persist("a@x", "c@x", "other", at(3)).await.unwrap();
        store.persist("A@X", "b@x", "3", at(4)).await.unwrap();

        let history = store.history("a@x", "B@x", 100).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_history_keeps_most_recent_when_limited() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .persist("a@x", "b@x", &i.to_string(), at(i))
                .await
                .unwrap();
        }

        let history = store.history("b@x", "a@x", 2).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["3", "4"]);
    }

    #[tokio::test]
    async fn test_recent_chats_newest_first() {
        let store = InMemoryStore::new();
        store.persist("a@x", "b@x", "to b", at(1)).await.unwrap();
        store.persist("c@x", "a@x", "from c", at(2)).await.unwrap();
        store.persist("b@x", "a@x", "b again", at(3)).await.unwrap();
        store.persist("d@x", "e@x", "unrelated", at(4)).await.unwrap();

        let chats = store.recent_chats("a@x", 50).await.unwrap();

        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].partner, "b@x");
        assert_eq!(chats[0].last_message, "b again");
        assert_eq!(chats[0].last_message_at, at(3));
        assert_eq!(chats[1].partner, "c@x");
    }

    #[tokio::test]
    async fn test_recent_chats_limit() {
        let store = InMemoryStore::new();
        let base = at(0);
        for i in 0..4_i64 {
            store
                .persist("a@x", &format!("p{i}@x"), "hi", base + Duration::seconds(i))
                .await
                .unwrap();
        }

        let chats = store.recent_chats("a@x", 2).await.unwrap();
        let partners: Vec<&str> = chats.iter().map(|c| c.partner.as_str()).collect();
        assert_eq!(partners, vec!["p3@x", "p2@x"]);
    }

    #[tokio::test]
    async fn test_content_stored_verbatim() {
        let store = InMemoryStore::new();
        store
            .persist("a@x", "b@x", "<b>bold</b> & more", at(0))
            .await
            .unwrap();

        let history = store.history("a@x", "b@x", 10).await.unwrap();
        assert_eq!(history.first().unwrap().content, "<b>bold</b> & more");
    }
}
