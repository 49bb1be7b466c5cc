//! Bidirectional chat stream session.
//!
//! One session drives one authenticated client stream:
//!
//! ```text
//! register ──► receive ──► recipient exists? ──► persist ──► ack sender ──► fan-out ─┐
//!                 ▲                                                                   │
//!                 └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The connection is unregistered exactly once when the session ends, on every
//! exit path. Fan-out failures are logged and never end the sender's session.
//! A session whose own connection was evicted by another sender's fan-out
//! ends with `UNAVAILABLE` so the client reconnects.

use crate::errors::ChatError;
use crate::observability::metrics;
use crate::registry::{ConnectionId, ConnectionRegistry, SendError, SessionSink};
use crate::repositories::{MessageStore, UserDirectory};
use crate::timestamps;
use chrono::Utc;
use common::identity::normalize_identity;
use proto_gen::chat::{ChatStreamRequest, ChatStreamResponse};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, instrument, warn};

/// Outbound half of a client stream.
pub type Outbound = mpsc::Sender<Result<ChatStreamResponse, Status>>;

/// Unregisters its connection when dropped.
struct Registration<'a> {
    registry: &'a ConnectionRegistry,
    identity: String,
    id: ConnectionId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(&self.identity, self.id);
    }
}

/// Shared dependencies for stream sessions.
#[derive(Clone)]
pub struct StreamSession {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn MessageStore>,
}

impl StreamSession {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            directory,
            store,
        }
    }

    /// Run a session for `identity` until the inbound stream ends or fails.
    ///
    /// A clean end of input returns `Ok(())`. Receive errors are returned as
    /// received; every other failure is mapped through `ChatError`. Eviction
    /// from the registry ends the session with `UNAVAILABLE`.
    ///
    /// # Errors
    ///
    /// Returns the `Status` that ended the session.
    #[instrument(skip_all, name = "chat.session", fields(connection_id))]
    pub async fn run<S>(&self, identity: &str, inbound: S, outbound: Outbound) -> Result<(), Status>
    where
        S: Stream<Item = Result<ChatStreamRequest, Status>>,
    {
        let identity = normalize_identity(identity);
        let evicted = CancellationToken::new();
        let id = self.registry.register(
            &identity,
            Arc::new(SessionSink::new(outbound.clone(), evicted.clone())),
        );
        let _registration = Registration {
            registry: &self.registry,
            identity: identity.clone(),
            id,
        };
        tracing::Span::current().record("connection_id", id);
        metrics::record_session_event("started");
        info!(target: "chat.session", connection_id = id, "Stream session started");

        let mut inbound = std::pin::pin!(inbound);
        let result = loop {
            let next = tokio::select! {
                biased;
                () = evicted.cancelled() => {
                    warn!(target: "chat.session", connection_id = id, "Connection evicted, ending stream session");
                    break Err(Status::from(ChatError::Evicted));
                }
                next = inbound.next() => next,
            };
            let request = match next {
                None => break Ok(()),
                Some(Ok(request)) => request,
                Some(Err(status)) => {
                    debug!(target: "chat.session", code = ?status.code(), "Inbound stream failed");
                    break Err(status);
                }
            };

            if let Err(e) = self
                .handle_message(&identity, request, &outbound, &evicted)
                .await
            {
                warn!(target: "chat.session", error = %e, "Ending stream session");
                break Err(Status::from(e));
            }
        };

        metrics::record_session_event(if result.is_ok() { "closed" } else { "failed" });
        info!(target: "chat.session", connection_id = id, clean = result.is_ok(), "Stream session ended");
        result
    }

    async fn handle_message(
        &self,
        identity: &str,
        request: ChatStreamRequest,
        outbound: &Outbound,
        evicted: &CancellationToken,
    ) -> Result<(), ChatError> {
        let recipient = normalize_identity(&request.to_email);

        let exists = self
            .directory
            .user_exists(&recipient)
            .await
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        if !exists {
            return Err(ChatError::NotFound("recipient".to_string()));
        }

        let persisted = self
            .store
            .persist(identity, &recipient, &request.content, Utc::now())
            .await
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        metrics::record_message_persisted();

        let ack = ChatStreamResponse {
            msg_id: persisted.message_id.to_string(),
            from_email: identity.to_string(),
            content: request.content,
            sent_at: Some(timestamps::to_proto(persisted.sent_at)),
        };

        tokio::select! {
            biased;
            () = evicted.cancelled() => return Err(ChatError::Evicted),
            sent = outbound.send(Ok(ack.clone())) => {
                sent.map_err(|_| ChatError::Transport("sender stream closed".to_string()))?;
            }
        }

        match self.registry.send_to(&recipient, &ack) {
            Ok(delivered) => {
                debug!(target: "chat.session", msg_id = %ack.msg_id, delivered, "Message fanned out");
            }
            Err(SendError::NotConnected) => {
                debug!(target: "chat.session", msg_id = %ack.msg_id, "Recipient offline, message stored only");
            }
            Err(e) => {
                warn!(target: "chat.session", msg_id = %ack.msg_id, error = %e, "Fan-out partially failed");
            }
        }

        Ok(())
    }
}
