//! `ChatService` gRPC implementation.
//!
//! Register and Login are public and admission-controlled. The history reads
//! and the chat stream read the caller from the [`AuthContext`] inserted by
//! the auth layer.

use crate::admission::{self, AdmissionControl};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::{AuthBroker, IssuedToken};
use crate::errors::ChatError;
use crate::grpc::auth_layer::auth_context;
use crate::repositories::{ConversationLog, User, UserAccounts};
use crate::session::{Outbound, StreamSession};
use crate::timestamps;
use common::identity::{looks_like_email, normalize_identity};
use common::secret::{ExposeSecret, SecretString};
use proto_gen::chat::chat_service_server::ChatService;
use proto_gen::chat::{
    ChatStreamRequest, ChatStreamResponse, GetHistoryRequest, GetHistoryResponse,
    ListChatsRequest, ListChatsResponse, LoginRequest, LoginResponse, RegisterRequest,
    RegisterResponse,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::instrument;

/// Default number of conversations returned by `ListChats`.
pub const DEFAULT_LIST_CHATS_LIMIT: usize = 50;

/// Upper bound on a caller-supplied `ListChats` limit.
pub const MAX_LIST_CHATS_LIMIT: usize = 500;

/// Number of messages returned by `GetHistory`.
pub const HISTORY_LIMIT: usize = 100;

/// Everything the handlers need.
pub struct ChatServiceDeps {
    pub broker: Arc<AuthBroker>,
    pub admission: Arc<AdmissionControl>,
    pub accounts: Arc<dyn UserAccounts>,
    pub conversations: Arc<dyn ConversationLog>,
    pub session: StreamSession,
    pub bcrypt_cost: u32,
    pub stream_buffer_size: usize,
}

/// gRPC chat service.
pub struct ChatGrpcService {
    deps: ChatServiceDeps,
}

type ChatSummaryStream = tokio_stream::Iter<std::vec::IntoIter<Result<ListChatsResponse, Status>>>;
type HistoryStream =
    tokio_stream::Iter<std::vec::IntoIter<Result<GetHistoryResponse, Status>>>;

impl ChatGrpcService {
    #[must_use]
    pub fn new(deps: ChatServiceDeps) -> Self {
        Self { deps }
    }

    /// Validate credentials from a Register or Login request.
    #[expect(
        clippy::result_large_err,
        reason = "Status is the standard gRPC error type"
    )]
    fn validate_credentials(email: &str, password: &str) -> Result<String, Status> {
        let email = normalize_identity(email);
        if !looks_like_email(&email) {
            return Err(ChatError::InvalidArgument("A valid email is required".to_string()).into());
        }
        if password.is_empty() {
            return Err(ChatError::InvalidArgument("Password is required".to_string()).into());
        }
        Ok(email)
    }

    /// Resolve a `ListChats` limit. Zero selects the default.
    fn list_chats_limit(requested: u32) -> usize {
        match usize::try_from(requested) {
            Ok(0) => DEFAULT_LIST_CHATS_LIMIT,
            Ok(n) => n.min(MAX_LIST_CHATS_LIMIT),
            Err(_) => MAX_LIST_CHATS_LIMIT,
        }
    }

    #[expect(
        clippy::result_large_err,
        reason = "Status is the standard gRPC error type"
    )]
    fn issue_for(&self, user: &User) -> Result<IssuedToken, Status> {
        self.deps
            .broker
            .issue(&user.id.to_string(), &user.email)
            .map_err(|e| {
                tracing::error!(target: "chat.grpc", error = %e, "Failed to issue token");
                Status::from(ChatError::from(e))
            })
    }
}

#[tonic::async_trait]
impl ChatService for ChatGrpcService {
    /// Create an account and return a session token.
    #[instrument(skip_all, name = "chat.grpc.register")]
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        admission::admit(&self.deps.admission, &request)?;

        let req = request.into_inner();
        let email = Self::validate_credentials(&req.email, &req.password)?;
        let password = SecretString::from(req.password);

        let cost = self.deps.bcrypt_cost;
        let password_hash =
            tokio::task::spawn_blocking(move || hash_password(password.expose_secret(), cost))
                .await
                .map_err(|e| ChatError::Internal(format!("hash task failed: {e}")))??;

        let user = self
            .deps
            .accounts
            .create_user(&email, &password_hash)
            .await
            .map_err(ChatError::from)?;

        let issued = self.issue_for(&user)?;

        tracing::info!(target: "chat.grpc", user_id = %user.id, "User registered");

        Ok(Response::new(RegisterResponse {
            token: issued.token.expose_secret().to_string(),
            user_id: user.id.to_string(),
            expires_at: Some(timestamps::to_proto(issued.expires_at)),
        }))
    }

    /// Verify credentials and return a session token.
    #[instrument(skip_all, name = "chat.grpc.login")]
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        admission::admit(&self.deps.admission, &request)?;

        let req = request.into_inner();
        let email = Self::validate_credentials(&req.email, &req.password)?;
        let password = SecretString::from(req.password);

        let user = self
            .deps
            .accounts
            .find_by_email(&email)
            .await
            .map_err(ChatError::from)?
            .ok_or_else(|| ChatError::NotFound("user".to_string()))?;

        let stored_hash = user.password_hash.clone();
        let matches =
            tokio::task::spawn_blocking(move || verify_password(password.expose_secret(), &stored_hash))
                .await
                .map_err(|e| ChatError::Internal(format!("verify task failed: {e}")))??;

        if !matches {
            tracing::debug!(target: "chat.grpc", user_id = %user.id, "Password mismatch");
            return Err(ChatError::InvalidCredentials.into());
        }

        let issued = self.issue_for(&user)?;

        tracing::info!(target: "chat.grpc", user_id = %user.id, "User logged in");

        Ok(Response::new(LoginResponse {
            token: issued.token.expose_secret().to_string(),
            user_id: user.id.to_string(),
            expires_at: Some(timestamps::to_proto(issued.expires_at)),
        }))
    }

    type ListChatsStream = ChatSummaryStream;

    #[instrument(skip_all, name = "chat.grpc.list_chats")]
    async fn list_chats(
        &self,
        request: Request<ListChatsRequest>,
    ) -> Result<Response<Self::ListChatsStream>, Status> {
        let ctx = auth_context(&request)?;
        let limit = Self::list_chats_limit(request.get_ref().limit);

        let chats = self
            .deps
            .conversations
            .recent_chats(&ctx.identity, limit)
            .await
            .map_err(|e| {
                tracing::error!(target: "chat.grpc", error = %e, "Failed to list chats");
                Status::internal("Internal server error")
            })?;

        let responses: Vec<_> = chats
            .into_iter()
            .map(|chat| {
                Ok(ListChatsResponse {
                    email: chat.partner,
                    last_message: chat.last_message,
                    last_message_at: Some(timestamps::to_proto(chat.last_message_at)),
                })
            })
            .collect();

        Ok(Response::new(tokio_stream::iter(responses)))
    }

    type GetHistoryStream = HistoryStream;

    #[instrument(skip_all, name = "chat.grpc.get_history")]
    async fn get_history(
        &self,
        request: Request<GetHistoryRequest>,
    ) -> Result<Response<Self::GetHistoryStream>, Status> {
        let ctx = auth_context(&request)?;
        let with = normalize_identity(&request.get_ref().with_email);
        if with.is_empty() {
            return Err(ChatError::InvalidArgument("with_email is required".to_string()).into());
        }

        let messages = self
            .deps
            .conversations
            .history(&ctx.identity, &with, HISTORY_LIMIT)
            .await
            .map_err(|e| {
                tracing::error!(target: "chat.grpc", error = %e, "Failed to load history");
                Status::internal("Internal server error")
            })?;

        let responses: Vec<_> = messages
            .into_iter()
            .map(|message| {
                Ok(GetHistoryResponse {
                    msg_id: message.id.to_string(),
                    from_email: message.from,
                    to_email: message.to,
                    content: message.content,
                    sent_at: Some(timestamps::to_proto(message.sent_at)),
                })
            })
            .collect();

        Ok(Response::new(tokio_stream::iter(responses)))
    }

    type ChatStreamStream = ReceiverStream<Result<ChatStreamResponse, Status>>;

    /// Open a bidirectional chat stream.
    ///
    /// The session runs on its own task. If it ends with an error, or the task
    /// panics, a final status is the last item on the outbound stream.
    #[instrument(skip_all, name = "chat.grpc.chat_stream")]
    async fn chat_stream(
        &self,
        request: Request<Streaming<ChatStreamRequest>>,
    ) -> Result<Response<Self::ChatStreamStream>, Status> {
        let ctx = auth_context(&request)?;
        let inbound = request.into_inner();

        let (tx, rx) = mpsc::channel(self.deps.stream_buffer_size);
        let session = self.deps.session.clone();
        let session_tx = tx.clone();

        let session_task =
            tokio::spawn(async move { session.run(&ctx.identity, inbound, session_tx).await });
        tokio::spawn(forward_session_outcome(session_task, tx));

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Wait for a session task and push its final status, if any, to the client.
async fn forward_session_outcome(session_task: JoinHandle<Result<(), Status>>, tx: Outbound) {
    let status = match session_task.await {
        Ok(Ok(())) => return,
        Ok(Err(status)) => status,
        Err(e) => {
            tracing::error!(target: "chat.grpc", error = %e, "Stream session task panicked");
            Status::internal("Internal server error")
        }
    };
    if tx.send(Err(status)).await.is_err() {
        tracing::debug!(target: "chat.grpc", "Client gone before final status");
    }
}
