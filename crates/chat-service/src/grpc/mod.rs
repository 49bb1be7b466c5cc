//! gRPC surface: the auth layer, the `ChatService` implementation and server
//! assembly.

pub mod auth_layer;
pub mod chat_service;
pub mod server;

pub use auth_layer::{auth_context, AuthContext, AuthLayer, PUBLIC_METHODS};
pub use chat_service::{ChatGrpcService, ChatServiceDeps};
pub use server::{load_tls_config, serve};
