//! Runtime dispatcher — routes actions to local executors or the
//! sandbox HTTP runtime, and normalizes every failure shape.
//!
//! The registry follows the tool-object pattern: each tool implements
//! [`registry::ToolHandler`] (`describe` / `execute` /
//! `memory_summary` / `memorized`) and the dispatcher looks handlers up
//! by [`ActionKind`](ca_domain::action::ActionKind).

pub mod dispatch;
pub mod files;
pub mod registry;
pub mod sandbox;
pub mod terminal;
pub mod ui;

use std::path::PathBuf;
use std::sync::Arc;

use ca_domain::config::RuntimeConfig;

use sandbox::SandboxClient;
use ui::{CredentialProvider, NoCredentials, NoopUi, UiSink};

/// Everything tool execution needs, shared across one conversation.
pub struct RuntimeContext {
    pub cfg: RuntimeConfig,
    pub workspace_root: PathBuf,
    pub user_id: String,
    pub conversation_id: String,
    pub max_content_length: usize,
    pub sandbox: Option<SandboxClient>,
    pub ui: Arc<dyn UiSink>,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl RuntimeContext {
    pub fn new(
        cfg: RuntimeConfig,
        workspace_root: PathBuf,
        user_id: &str,
        conversation_id: &str,
    ) -> Self {
        let sandbox = cfg
            .sandbox_url
            .as_deref()
            .and_then(|url| SandboxClient::new(url).ok());
        Self {
            cfg,
            workspace_root,
            user_id: user_id.to_owned(),
            conversation_id: conversation_id.to_owned(),
            max_content_length: 50_000,
            sandbox,
            ui: Arc::new(NoopUi),
            credentials: Arc::new(NoCredentials),
        }
    }

    /// `Conversation_<prefix>` directory name for this conversation.
    pub fn conversation_dir(&self) -> String {
        let prefix: String = self.conversation_id.chars().take(8).collect();
        format!("Conversation_{prefix}")
    }
}
