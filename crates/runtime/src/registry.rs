//! Tool registry — one handler object per dispatchable tool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use ca_domain::action::{Action, ActionKind, ActionResult};

use crate::{files, terminal, RuntimeContext};

/// A dispatchable tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Short human description of one concrete call, shown in the
    /// running-placeholder UI message.
    fn describe(&self, action: &Action) -> String;

    /// Execute locally. Sandbox routing happens above this layer.
    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult;

    /// Compact rendering of action + result for the memorized-content
    /// summary. `None` uses the default rendering.
    fn memory_summary(&self, _action: &Action, _content: &str) -> Option<String> {
        None
    }

    /// Whether results of this tool enter the memorized summary.
    fn memorized(&self) -> bool {
        false
    }

    /// One-line catalog entry for the prompt's tool list.
    fn catalog(&self) -> &'static str;
}

pub struct ToolRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// The standard tool set.
    pub fn standard() -> Self {
        let mut handlers: HashMap<ActionKind, Arc<dyn ToolHandler>> = HashMap::new();
        handlers.insert(ActionKind::WriteCode, Arc::new(WriteCodeTool));
        handlers.insert(ActionKind::WriteFile, Arc::new(WriteFileTool));
        handlers.insert(ActionKind::ReadFile, Arc::new(ReadFileTool));
        handlers.insert(ActionKind::PatchCode, Arc::new(PatchCodeTool));
        handlers.insert(ActionKind::ReplaceCodeBlock, Arc::new(ReplaceCodeBlockTool));
        handlers.insert(ActionKind::TerminalRun, Arc::new(TerminalRunTool));
        for kind in [
            ActionKind::WebSearch,
            ActionKind::ReadUrl,
            ActionKind::Browser,
            ActionKind::McpTool,
            ActionKind::DocumentQuery,
            ActionKind::DocumentUpload,
        ] {
            handlers.insert(kind, Arc::new(SandboxOnlyTool { kind }));
        }
        Self { handlers }
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Catalog entries for prompt assembly, in a stable order.
    pub fn catalog(&self) -> Vec<(ActionKind, &'static str)> {
        let mut entries: Vec<(ActionKind, &'static str)> = self
            .handlers
            .iter()
            .map(|(kind, handler)| (*kind, handler.catalog()))
            .collect();
        entries.sort_by_key(|(kind, _)| kind.as_str());
        entries
    }
}

/// Default memorized-content rendering: the tool, its identity, and a
/// truncated result body.
pub fn default_memory_summary(action: &Action, content: &str) -> String {
    let kind = action.kind.as_str();
    let identity = action
        .str_param("origin_path")
        .or_else(|| action.str_param("path"))
        .or_else(|| action.str_param("command"))
        .or_else(|| action.str_param("query"))
        .or_else(|| action.str_param("url"))
        .unwrap_or("");
    let body: String = content.chars().take(400).collect();
    if identity.is_empty() {
        format!("<{kind}>{body}</{kind}>")
    } else {
        format!("<{kind} target=\"{identity}\">{body}</{kind}>")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct WriteCodeTool;

#[async_trait]
impl ToolHandler for WriteCodeTool {
    fn describe(&self, action: &Action) -> String {
        format!("Writing {}", action.str_param_or_empty("origin_path"))
    }
    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        files::write_code(action, ctx).await
    }
    fn memorized(&self) -> bool {
        true
    }
    fn catalog(&self) -> &'static str {
        "write_code(path, content) — create or overwrite a file in the workspace"
    }
}

struct WriteFileTool;

#[async_trait]
impl ToolHandler for WriteFileTool {
    fn describe(&self, action: &Action) -> String {
        format!("Writing {}", action.str_param_or_empty("origin_path"))
    }
    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        files::write_code(action, ctx).await
    }
    fn memorized(&self) -> bool {
        true
    }
    fn catalog(&self) -> &'static str {
        "write_file(path, content) — write a non-code file in the workspace"
    }
}

struct ReadFileTool;

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn describe(&self, action: &Action) -> String {
        format!("Reading {}", action.str_param_or_empty("origin_path"))
    }
    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        files::read_file(action, ctx).await
    }
    fn memorized(&self) -> bool {
        true
    }
    fn catalog(&self) -> &'static str {
        "read_file(path) — read a file from the workspace"
    }
}

struct PatchCodeTool;

#[async_trait]
impl ToolHandler for PatchCodeTool {
    fn describe(&self, action: &Action) -> String {
        format!("Patching {}", action.str_param_or_empty("origin_path"))
    }
    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        files::patch_code(action, ctx).await
    }
    fn memorized(&self) -> bool {
        true
    }
    fn catalog(&self) -> &'static str {
        "patch_code(path, diff) — apply a unified diff to a file"
    }
}

struct ReplaceCodeBlockTool;

#[async_trait]
impl ToolHandler for ReplaceCodeBlockTool {
    fn describe(&self, action: &Action) -> String {
        format!("Editing {}", action.str_param_or_empty("origin_path"))
    }
    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        files::replace_code_block(action, ctx).await
    }
    fn memorized(&self) -> bool {
        true
    }
    fn catalog(&self) -> &'static str {
        "replace_code_block(path, code_block) — replace the file span anchored by the block's first and last lines"
    }
}

struct TerminalRunTool;

#[async_trait]
impl ToolHandler for TerminalRunTool {
    fn describe(&self, action: &Action) -> String {
        let command = action.str_param_or_empty("command");
        let args = action.str_param_or_empty("args");
        if args.is_empty() {
            format!("Running `{command}`")
        } else {
            format!("Running `{command} {args}`")
        }
    }
    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        terminal::run_terminal(action, ctx).await
    }
    fn memorized(&self) -> bool {
        true
    }
    fn catalog(&self) -> &'static str {
        "terminal_run(command, args, cwd) — run a shell command in the workspace (30s limit)"
    }
}

/// Tools that only exist behind the sandbox runtime.
struct SandboxOnlyTool {
    kind: ActionKind,
}

#[async_trait]
impl ToolHandler for SandboxOnlyTool {
    fn describe(&self, action: &Action) -> String {
        format!("Calling {}", action.kind)
    }
    async fn execute(&self, action: &Action, _ctx: &RuntimeContext) -> ActionResult {
        let mut result = ActionResult::failure(format!(
            "{} requires the sandbox runtime; no sandbox_url is configured",
            action.kind
        ));
        result
            .meta
            .insert("action_type".into(), action.kind.as_str().into());
        result
    }
    fn memorized(&self) -> bool {
        matches!(self.kind, ActionKind::WebSearch | ActionKind::ReadUrl)
    }
    fn catalog(&self) -> &'static str {
        match self.kind {
            ActionKind::WebSearch => "web_search(query, num_results?) — search the web",
            ActionKind::ReadUrl => "read_url(url) — fetch a page as readable text",
            ActionKind::Browser => "browser(question) — ask the browsing agent a question",
            ActionKind::McpTool => "mcp_tool(name, arguments) — invoke a configured MCP tool",
            ActionKind::DocumentQuery => "document_query(query) — query uploaded documents",
            _ => "document_upload(path) — upload a document for querying",
        }
    }
}
