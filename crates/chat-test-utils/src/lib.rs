//! # Chat Test Utilities
//!
//! Shared test utilities for the chat service.
//!
//! - [`fakes`] - in-memory doubles for the persistence collaborators and
//!   connection sinks
//! - [`token_builders`] - hand-rolled tokens (custom `kid`, `alg`, claims)
//! - [`server_harness`] - `TestChatServer`, a real gRPC server on a random port
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestChatServer::spawn().await.unwrap();
//!     let token = server.register("alice@example.com", "pw").await.unwrap();
//!     let mut client = server.client().await.unwrap();
//!     // ...
//! }
//! ```

pub mod fakes;
pub mod server_harness;
pub mod token_builders;

pub use fakes::*;
pub use server_harness::*;
pub use token_builders::*;
