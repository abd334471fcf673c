//! SSE chat-completion client.
//!
//! One operation: `chat(prompt, history, options) -> full text`, with a
//! per-token callback invoked synchronously in arrival order. The
//! decoder tolerates non-standard servers: configurable message
//! delimiter, optional `data:` prefixes, JSON split across messages,
//! and a best-effort tail extraction when the stream ends mid-payload.

mod client;
mod quirks;
mod sse;

pub use client::{ChatMessage, ChatRequest, LlmClient, ALLOWED_OPTIONS};
pub use quirks::auth_headers;
pub use sse::SseDecoder;
