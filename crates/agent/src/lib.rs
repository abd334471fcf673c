//! The agent control loop and prompt assembly.
//!
//! [`Agent::complete_code_act`] drives one task to completion: build a
//! prompt, stream a model response, resolve tool calls, dispatch them,
//! feed results back through reflection, and iterate until the model
//! finishes (or the retry budget runs out).

pub mod act;
pub mod collab;
pub mod context;
pub mod prompt;
pub mod retry;

pub use act::Agent;
pub use collab::{
    ChatCompletion, ConversationDigest, EvaluationPromptSource, McpCatalog, Reflection, Reflector,
};
pub use context::{PromptMode, TaskContext, TaskOutcome, TaskSpec};

/// Initialize tracing from `RUST_LOG` (defaults to `info`).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
