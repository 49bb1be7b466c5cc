//! Test doubles for the collaborators the stream session depends on.

use async_trait::async_trait;
use chat_service::registry::{DeliveryError, MessageSink};
use chat_service::repositories::{MessageStore, PersistedMessage, UserDirectory};
use chrono::{DateTime, Utc};
use common::error::{ChatCommonError, Result};
use common::identity::normalize_identity;
use common::types::MessageId;
use proto_gen::chat::ChatStreamResponse;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Directory that knows a fixed set of identities.
#[derive(Debug, Default)]
pub struct FakeDirectory {
    users: HashSet<String>,
}

impl FakeDirectory {
    pub fn with_users(users: &[&str]) -> Self {
        Self {
            users: users.iter().map(|u| normalize_identity(u)).collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn user_exists(&self, identity: &str) -> Result<bool> {
        Ok(self.users.contains(&normalize_identity(identity)))
    }
}

/// One recorded `persist` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistCall {
    pub from: String,
    pub to: String,
    pub content: String,
}

/// Message store that records every call and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<PersistCall>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PersistCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn persist(
        &self,
        from: &str,
        to: &str,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<PersistedMessage> {
        self.calls.lock().unwrap().push(PersistCall {
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
        });
        Ok(PersistedMessage {
            message_id: MessageId::new(),
            sent_at,
        })
    }
}

/// Message store whose writes always fail.
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn persist(
        &self,
        _from: &str,
        _to: &str,
        _content: &str,
        _sent_at: DateTime<Utc>,
    ) -> Result<PersistedMessage> {
        Err(ChatCommonError::Storage("disk full".to_string()))
    }
}

/// Sink that keeps everything delivered to it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<ChatStreamResponse>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<ChatStreamResponse> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl MessageSink for RecordingSink {
    fn deliver(&self, message: ChatStreamResponse) -> std::result::Result<(), DeliveryError> {
        self.received.lock().unwrap().push(message);
        Ok(())
    }
}

/// Sink that rejects every delivery and counts the attempts.
#[derive(Debug)]
pub struct FailingSink {
    error: DeliveryError,
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn new(error: DeliveryError) -> Self {
        Self {
            error,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn closed() -> Self {
        Self::new(DeliveryError::Closed)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MessageSink for FailingSink {
    fn deliver(&self, _message: ChatStreamResponse) -> std::result::Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error)
    }
}
