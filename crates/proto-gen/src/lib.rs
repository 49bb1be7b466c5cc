//! Generated Protocol Buffer code for the chat service.
//!
//! This crate contains the compiled Protocol Buffer definitions and the
//! tonic server/client stubs for `chat.v1.ChatService`.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)] // Generated code has various doc formatting

// Re-export prost traits for convenience
pub use prost::Message;
pub use prost_types::Timestamp;

// Generated protobuf modules
pub mod chat {
    //! Chat service messages and stubs (`chat.v1`)
    tonic::include_proto!("chat.v1");
}
