//! Collaborator interfaces.
//!
//! The loop talks to the LLM through a chat-completion abstraction and
//! to the reflection/digest/evaluation services through narrow traits,
//! so tests (and deployments without those services) swap in fakes.

use async_trait::async_trait;

use ca_domain::action::{ActionResult, ActionStatus};
use ca_domain::cancel::CancelToken;
use ca_domain::error::Result;
use ca_llm::{ChatRequest, LlmClient};

/// Chat-completion abstraction over the streaming client.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn chat(
        &self,
        req: &ChatRequest,
        on_token: &mut (dyn for<'x> FnMut(&'x str) + Send),
        cancel: CancelToken,
    ) -> Result<String>;
}

fn reborrow_on_token<'a>(f: &'a mut (dyn FnMut(&str) + Send)) -> impl FnMut(&str) + Send + 'a {
    move |s| f(s)
}

#[async_trait]
impl ChatCompletion for LlmClient {
    async fn chat(
        &self,
        req: &ChatRequest,
        on_token: &mut (dyn for<'x> FnMut(&'x str) + Send),
        cancel: CancelToken,
    ) -> Result<String> {
        LlmClient::chat(self, req, reborrow_on_token(on_token), cancel).await
    }
}

/// The short failure/recovery commentary produced by the evaluator.
#[derive(Debug, Clone)]
pub struct Reflection {
    pub status: ActionStatus,
    pub comments: String,
}

/// External reflection service: (requirement, result) → commentary.
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(&self, requirement: &str, result: &ActionResult) -> Reflection;
}

/// Default reflector: echoes the result status; comments only on
/// failure (a truncated view of the diagnostics).
pub struct EchoReflector;

#[async_trait]
impl Reflector for EchoReflector {
    async fn reflect(&self, _requirement: &str, result: &ActionResult) -> Reflection {
        let comments = if result.is_success() {
            String::new()
        } else {
            let mut text: String = result.content.chars().take(1500).collect();
            if let Some(stderr) = result.stderr.as_deref() {
                if !stderr.is_empty() {
                    text.push_str("\nstderr: ");
                    text.extend(stderr.chars().take(1500));
                }
            }
            text
        };
        Reflection {
            status: result.status,
            comments,
        }
    }
}

/// Digest of previous conversations, injected into every prompt.
pub trait ConversationDigest: Send + Sync {
    fn digest(&self) -> String;
}

pub struct NoDigest;

impl ConversationDigest for NoDigest {
    fn digest(&self) -> String {
        String::new()
    }
}

/// Evaluation sub-prompt appended to every prompt.
pub trait EvaluationPromptSource: Send + Sync {
    fn evaluation_prompt(&self) -> String;
}

pub struct NoEvaluationPrompt;

impl EvaluationPromptSource for NoEvaluationPrompt {
    fn evaluation_prompt(&self) -> String {
        String::new()
    }
}

/// Dynamic MCP tool descriptions merged into the tool catalog.
pub trait McpCatalog: Send + Sync {
    fn tool_descriptions(&self) -> Vec<(String, String)>;
}

pub struct NoMcpTools;

impl McpCatalog for NoMcpTools {
    fn tool_descriptions(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}
