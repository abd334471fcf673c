//! Shared domain types for the codeact execution core.
//!
//! Everything the other crates agree on lives here: the message/action
//! data model, the shared error type, the configuration tree, stream
//! types for LLM output, structured trace events, and the cancel token.

pub mod action;
pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod trace;
