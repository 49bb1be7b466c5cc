//! Relay Chat service library.
//!
//! Authenticated gRPC messaging with live fan-out to every open stream of a
//! recipient:
//!
//! ```text
//! client ──► AuthLayer ──► ChatGrpcService ──► StreamSession ──► MessageStore
//!                                                   │
//!                                                   └──► ConnectionRegistry ──► recipient streams
//! ```
//!
//! # Modules
//!
//! - [`auth`] - token issuance/verification with key rotation, password hashing
//! - [`admission`] - per-key token-bucket rate limiting for Register/Login
//! - [`registry`] - identity → live connections map with self-healing fan-out
//! - [`session`] - the bidirectional stream loop
//! - [`grpc`] - auth layer and RPC handlers
//! - [`repositories`] - persistence traits and the in-memory store
//! - [`config`] - environment configuration
//! - [`observability`] - metrics and health endpoints

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod auth;
pub mod config;
pub mod errors;
pub mod grpc;
pub mod observability;
pub mod registry;
pub mod repositories;
pub mod session;
pub mod timestamps;
