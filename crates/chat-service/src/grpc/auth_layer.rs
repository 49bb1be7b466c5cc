//! gRPC authentication layer.
//!
//! Extracts the Bearer token from the `authorization` metadata, verifies it
//! with the [`AuthBroker`], and stores an [`AuthContext`] in the request
//! extensions for the handler. Methods in [`PUBLIC_METHODS`] pass through
//! untouched.
//!
//! Every failure returns the same `UNAUTHENTICATED` status; the reason is
//! logged at debug level only.

use crate::auth::{AuthBroker, Claims};
use axum::http;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::{Request, Status};
use tower::{Layer, Service};

/// Methods callable without a token.
pub const PUBLIC_METHODS: [&str; 2] = [
    "/chat.v1.ChatService/Register",
    "/chat.v1.ChatService/Login",
];

/// Verified caller identity, threaded to handlers through request extensions.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub subject_id: String,
    /// Normalized identity.
    pub identity: String,
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("subject_id", &"[REDACTED]")
            .field("identity", &"[REDACTED]")
            .finish()
    }
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            subject_id: claims.subject_id,
            identity: claims.identity,
        }
    }
}

/// Read the verified caller from a request.
///
/// # Errors
///
/// Returns `UNAUTHENTICATED` if the auth layer did not run for this request.
pub fn auth_context<T>(request: &Request<T>) -> Result<AuthContext, Status> {
    request.extensions().get::<AuthContext>().cloned().ok_or_else(|| {
        tracing::warn!(target: "chat.grpc.auth", "Handler reached without auth context");
        Status::unauthenticated("Authentication required")
    })
}

/// Whether `path` may be called without a token.
#[must_use]
pub fn is_public_method(path: &str) -> bool {
    PUBLIC_METHODS.contains(&path)
}

/// Extract the token from an `authorization` header value.
fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Tower layer applying [`AuthService`].
#[derive(Clone)]
pub struct AuthLayer {
    broker: Arc<AuthBroker>,
}

impl AuthLayer {
    #[must_use]
    pub fn new(broker: Arc<AuthBroker>) -> Self {
        Self { broker }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            broker: Arc::clone(&self.broker),
        }
    }
}

/// Tower service that authenticates gRPC requests.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    broker: Arc<AuthBroker>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        // Take the ready service and leave a fresh clone in its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let broker = Arc::clone(&self.broker);

        Box::pin(async move {
            if is_public_method(req.uri().path()) {
                return inner.call(req).await;
            }

            let Some(header) = req.headers().get("authorization") else {
                tracing::debug!(target: "chat.grpc.auth", "Missing authorization header");
                return Ok(unauthenticated_response());
            };

            let Ok(value) = header.to_str() else {
                tracing::debug!(target: "chat.grpc.auth", "Invalid authorization header encoding");
                return Ok(unauthenticated_response());
            };

            let Some(token) = bearer_token(value) else {
                tracing::debug!(target: "chat.grpc.auth", "Invalid authorization format");
                return Ok(unauthenticated_response());
            };

            let claims = match broker.verify(token) {
                Ok(claims) => claims,
                Err(e) => {
                    tracing::debug!(target: "chat.grpc.auth", error = %e, "Token verification failed");
                    return Ok(unauthenticated_response());
                }
            };

            let (mut parts, body) = req.into_parts();
            parts.extensions.insert(AuthContext::from(claims));
            inner.call(http::Request::from_parts(parts, body)).await
        })
    }
}

fn unauthenticated_response() -> http::Response<BoxBody> {
    Status::unauthenticated("Authentication required").into_http()
}
