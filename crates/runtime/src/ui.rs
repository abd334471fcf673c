//! Narrow collaborator interfaces: the UI event bus and the credential
//! store. Both are external systems; the core only needs these slices.

use serde::Serialize;

/// Events the dispatcher emits around each executed action: a running
/// placeholder first, the final outcome second.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum UiEvent {
    #[serde(rename = "action_running")]
    ActionRunning {
        action_type: String,
        description: String,
    },
    #[serde(rename = "action_finished")]
    ActionFinished {
        action_type: String,
        status: String,
        content_preview: String,
    },
}

pub trait UiSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

/// Default sink: log-only.
pub struct NoopUi;

impl UiSink for NoopUi {
    fn emit(&self, event: UiEvent) {
        tracing::debug!(event = ?event, "ui event");
    }
}

/// The LLM credential triple handed to the `browser` tool, pulled from
/// the active conversation's default model.
#[derive(Debug, Clone)]
pub struct LlmCredentials {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

pub trait CredentialProvider: Send + Sync {
    fn default_model_credentials(&self) -> Option<LlmCredentials>;
}

/// Default provider: no credentials available.
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn default_model_credentials(&self) -> Option<LlmCredentials> {
        None
    }
}
