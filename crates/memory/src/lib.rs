//! Ordered task memory with tool-aware pruning.
//!
//! One [`Memory`] per (conversation, task), persisted as a JSON array
//! of messages. Appending runs the full pipeline: sanitization, action
//! type detection, anti-loop repeat detection, adjacent de-duplication,
//! prune-key derivation, unified occurrence pruning, and the
//! character-budget cap.

pub mod keys;
pub mod sanitize;
mod store;

pub use store::Memory;

/// The user message injected when the model repeats itself.
pub const REPEAT_ERROR_TEXT: &str = "ERROR: repeated assistant output detected. The last \
response is identical to a recent one. Produce a different action or change the approach.";
