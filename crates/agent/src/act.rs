//! `complete_code_act` — the per-task iteration loop.

use std::sync::Arc;

use serde_json::Map;

use ca_actions::{action_to_xml, resolve_actions, validate_args};
use ca_domain::action::{Action, ActionKind, ActionResult};
use ca_domain::cancel::CancelToken;
use ca_domain::config::CoreConfig;
use ca_domain::error::Result;
use ca_domain::message::{MessageMeta, Role};
use ca_domain::trace::TraceEvent;
use ca_llm::{ChatMessage, ChatRequest};
use ca_memory::{sanitize, Memory};
use ca_runtime::dispatch::{DispatchOutcome, Dispatcher};

use crate::collab::{
    ChatCompletion, ConversationDigest, EchoReflector, EvaluationPromptSource, McpCatalog,
    NoDigest, NoEvaluationPrompt, NoMcpTools, Reflector,
};
use crate::context::{PromptMode, TaskContext, TaskOutcome, TaskSpec};
use crate::prompt::{build_prompt, list_workspace_files, PromptInputs, TemplateStore};
use crate::retry;

const EMPTY_OUTPUT_CORRECTION: &str = "Your previous response was empty. Respond with exactly \
one tool call as an XML block, for example <read_file><path>main.py</path></read_file>.";

const PARSE_ERROR_CORRECTION: &str = "No tool call could be resolved from your previous \
response. Respond with exactly one tool call as an XML block, for example \
<terminal_run><command>ls</command></terminal_run>.";

const FINISH_STATUS_CORRECTION: &str = "The finish call needs a status of SUCCESS or FAILED \
and a non-empty message. Re-emit it, for example \
<finish><status>SUCCESS</status><message><![CDATA[what was accomplished]]></message></finish>.";

/// How an action sequence step affects the turn.
enum Flow {
    Continue,
    Break,
    EndTurn,
    Return(TaskOutcome),
}

pub struct Agent {
    cfg: CoreConfig,
    chat: Arc<dyn ChatCompletion>,
    dispatcher: Dispatcher,
    memory: Memory,
    templates: TemplateStore,
    reflector: Arc<dyn Reflector>,
    digest: Arc<dyn ConversationDigest>,
    evaluation: Arc<dyn EvaluationPromptSource>,
    mcp: Arc<dyn McpCatalog>,
    cancel: CancelToken,
}

impl Agent {
    pub fn new(
        cfg: CoreConfig,
        chat: Arc<dyn ChatCompletion>,
        dispatcher: Dispatcher,
        memory: Memory,
    ) -> Self {
        let templates = TemplateStore::new(cfg.agent.template_dir.clone());
        Self {
            cfg,
            chat,
            dispatcher,
            memory,
            templates,
            reflector: Arc::new(EchoReflector),
            digest: Arc::new(NoDigest),
            evaluation: Arc::new(NoEvaluationPrompt),
            mcp: Arc::new(NoMcpTools),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = reflector;
        self
    }

    pub fn with_digest(mut self, digest: Arc<dyn ConversationDigest>) -> Self {
        self.digest = digest;
        self
    }

    pub fn with_evaluation(mut self, evaluation: Arc<dyn EvaluationPromptSource>) -> Self {
        self.evaluation = evaluation;
        self
    }

    pub fn with_mcp(mut self, mcp: Arc<dyn McpCatalog>) -> Self {
        self.mcp = mcp;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // The outer loop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Drive one task to completion.
    pub async fn complete_code_act(&self, task: &TaskSpec, ctx: &mut TaskContext) -> TaskOutcome {
        ctx.retry_count = 0;

        loop {
            if ctx.retry_count >= self.cfg.agent.max_retry_times {
                return TaskOutcome::Failed {
                    comments: format!(
                        "max consecutive failures reached ({})",
                        self.cfg.agent.max_retry_times
                    ),
                };
            }
            if let Some(cap) = self.cfg.agent.max_total_retries {
                if ctx.total_retry_attempts >= cap {
                    return TaskOutcome::Failed {
                        comments: format!("total retry cap reached ({cap})"),
                    };
                }
            }

            match self.run_iteration(task, ctx).await {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {}
                Err(e) if e.is_pause() => {
                    return TaskOutcome::Paused {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    ctx.retry_count += 1;
                    ctx.total_retry_attempts += 1;
                    let message = sanitize::sanitize(&e.to_string());
                    tracing::warn!(error = %message, retry = ctx.retry_count, "iteration error");
                    let _ = self.memory.add_message(
                        Role::User,
                        &format!("ERROR: {message}"),
                        None,
                        false,
                        MessageMeta::default(),
                    );
                    if ctx.retry_count >= self.cfg.agent.max_retry_times {
                        return TaskOutcome::Failed {
                            comments: "max consecutive exceptions reached".to_owned(),
                        };
                    }
                }
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // One iteration
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn run_iteration(
        &self,
        task: &TaskSpec,
        ctx: &mut TaskContext,
    ) -> Result<Option<TaskOutcome>> {
        // 1. Revalidate earlier transient read errors.
        self.revalidate_reads(ctx).await;

        // 2. Build the prompt; on the first turn it becomes the first
        // user message of the memory.
        let prompt = self.assemble_prompt(task, ctx);
        let first_turn = self.memory.is_empty();
        if first_turn {
            self.memory
                .add_message(Role::User, &prompt, None, false, MessageMeta::default())?;
        }
        let history = if first_turn {
            Vec::new()
        } else {
            self.chat_history()
        };

        let mut options = Map::new();
        options.insert("temperature".into(), serde_json::json!(0.2));
        let req = ChatRequest {
            prompt,
            history,
            options,
        };
        let output = self
            .chat
            .chat(&req, &mut |_token| {}, self.cancel.clone())
            .await?;

        self.memory
            .add_message(Role::Assistant, &output, None, false, MessageMeta::default())?;

        // 3. Empty output: drop it, correct, retry.
        if output.trim().is_empty() {
            self.memory.remove_last_assistant_message()?;
            self.memory.add_message(
                Role::Developer,
                EMPTY_OUTPUT_CORRECTION,
                None,
                false,
                MessageMeta::default(),
            )?;
            ctx.retry_count += 1;
            ctx.total_retry_attempts += 1;
            return Ok(None);
        }

        // 4. Parse into actions.
        let resolved = resolve_actions(&output);

        // 5. Nothing resolved: parse error (with a stricter correction
        // when an unsupported tool name was attempted).
        if resolved.actions.is_empty() {
            self.memory.remove_last_assistant_message()?;
            let correction = if resolved.unknown_tools.is_empty() {
                PARSE_ERROR_CORRECTION.to_owned()
            } else {
                unsupported_tool_correction(&resolved.unknown_tools)
            };
            self.memory.add_message(
                Role::Developer,
                &correction,
                None,
                false,
                MessageMeta::default(),
            )?;
            ctx.retry_count += 1;
            ctx.total_retry_attempts += 1;
            return Ok(None);
        }

        // Multi-action turns: the raw message is replaced by canonical
        // per-action XML, appended right before each dispatch so the
        // call/result adjacency (and inherited prune_hash) holds.
        let multi = resolved.actions.len() > 1;
        if multi {
            self.memory.remove_last_assistant_message()?;
        }

        // 6. Execute the sequence.
        for action in &resolved.actions {
            let flow = self.handle_action(task, ctx, action, multi).await?;
            match flow {
                Flow::Continue => {}
                Flow::Break => break,
                Flow::EndTurn => return Ok(None),
                Flow::Return(outcome) => return Ok(Some(outcome)),
            }
        }

        Ok(None)
    }

    async fn handle_action(
        &self,
        task: &TaskSpec,
        ctx: &mut TaskContext,
        action: &Action,
        multi: bool,
    ) -> Result<Flow> {
        match action.kind {
            // Plan control surfaces to the caller immediately.
            ActionKind::RevisePlan => Ok(Flow::Return(TaskOutcome::PlanRevision {
                action: action.clone(),
            })),

            // Leaving correction mode: acknowledge and start a fresh turn.
            ActionKind::PatchComplete => {
                ctx.prompt_mode = PromptMode::Build;
                if multi {
                    self.append_action_message(action)?;
                }
                self.memory.add_message(
                    Role::User,
                    "Acknowledged.",
                    None,
                    false,
                    MessageMeta::default(),
                )?;
                Ok(Flow::Break)
            }

            // Log-only.
            ActionKind::Information => {
                tracing::info!(
                    note = action.str_param_or_empty("message"),
                    "agent information"
                );
                if multi {
                    self.append_action_message(action)?;
                }
                self.memory.add_message(
                    Role::User,
                    "Acknowledged.",
                    None,
                    false,
                    MessageMeta::default(),
                )?;
                Ok(Flow::Continue)
            }

            // Synthetic evaluation from an invalid block: surface the
            // reason and keep going with the remaining actions.
            ActionKind::Evaluation => {
                let comments = action.str_param_or_empty("comments");
                self.memory.add_message(
                    Role::User,
                    &format!("Action rejected: {comments}"),
                    None,
                    false,
                    MessageMeta::default(),
                )?;
                Ok(Flow::Continue)
            }

            ActionKind::Finish => self.handle_finish(ctx, action),

            _ => self.execute_action(task, ctx, action, multi).await,
        }
    }

    fn handle_finish(&self, ctx: &mut TaskContext, action: &Action) -> Result<Flow> {
        // The observed status is recorded even when the call is later
        // rejected; an absent status records nothing.
        if let Some(status) = action.str_param("status") {
            ctx.last_finish_status = Some(status.to_ascii_uppercase());
        }

        if validate_args(action).is_err() {
            // Soft failure: the model corrects next turn, no penalty.
            self.memory.add_message(
                Role::User,
                FINISH_STATUS_CORRECTION,
                None,
                false,
                MessageMeta::default(),
            )?;
            return Ok(Flow::EndTurn);
        }

        let status = action.str_param_or_empty("status").to_ascii_uppercase();
        let message = action.str_param_or_empty("message").to_owned();
        if status == "SUCCESS" {
            ctx.reflection = None;
        }
        Ok(Flow::Return(TaskOutcome::Finished { status, message }))
    }

    async fn execute_action(
        &self,
        task: &TaskSpec,
        ctx: &mut TaskContext,
        action: &Action,
        multi: bool,
    ) -> Result<Flow> {
        // Strict argument validation. A lone invalid action retries the
        // turn; in a multi-action turn it only costs a comment.
        if let Err(reason) = validate_args(action) {
            if multi {
                self.memory.add_message(
                    Role::User,
                    &format!("Invalid {} call: {reason}", action.kind),
                    None,
                    false,
                    MessageMeta::default(),
                )?;
                return Ok(Flow::Continue);
            }
            self.memory.remove_last_assistant_message()?;
            self.memory.add_message(
                Role::Developer,
                &format!("Invalid {} call: {reason}. {PARSE_ERROR_CORRECTION}", action.kind),
                None,
                false,
                MessageMeta::default(),
            )?;
            ctx.retry_count += 1;
            ctx.total_retry_attempts += 1;
            return Ok(Flow::EndTurn);
        }

        if multi {
            self.append_action_message(action)?;
        }

        let outcome = self.dispatcher.execute(action).await;
        self.record_result(&outcome)?;
        self.track_transients(ctx, &outcome);

        // 7. Reflection.
        let reflection = self
            .reflector
            .reflect(&task.requirement, &outcome.result)
            .await;

        // 8. Mode switching follows the latest terminal_run.
        if outcome.action.kind == ActionKind::TerminalRun {
            if outcome.result.is_success() {
                ctx.prompt_mode = PromptMode::Build;
                ctx.last_terminal_failure = None;
            } else {
                ctx.prompt_mode = PromptMode::CodeCorrector;
                ctx.last_terminal_failure = Some(outcome.result.content.clone());
            }
        }

        // 9. Retry classification.
        let mut penalized = false;
        if outcome.result.is_success() {
            ctx.retry_count = 0;
        } else {
            let command_line = outcome
                .action
                .str_param("origin_command")
                .unwrap_or_else(|| outcome.action.str_param_or_empty("command"))
                .to_owned();
            let exit = outcome.result.exit_code();
            let combined_output = combined_output(&outcome.result);
            let is_terminal = outcome.action.kind == ActionKind::TerminalRun;
            let expected_test =
                is_terminal && retry::is_expected_test_failure(&command_line, exit, &combined_output);
            let nonfatal = is_terminal && retry::is_nonfatal_exit(exit);
            if !(expected_test || nonfatal) {
                ctx.retry_count += 1;
                ctx.total_retry_attempts += 1;
                penalized = true;
            }
        }

        // Reflection comments feed the next prompt and the memory,
        // keeping run-id markers intact for later purging.
        if !reflection.comments.is_empty() {
            ctx.reflection = Some(reflection.comments.clone());
            let mut text = reflection.comments;
            if let Some(run_id) = outcome.action.str_param("run_id") {
                let marker = format!("[terminal_run_id:{run_id}]");
                if !text.contains(&marker) {
                    text.push('\n');
                    text.push_str(&marker);
                }
            }
            self.memory
                .add_message(Role::User, &text, None, false, MessageMeta::default())?;
        }

        if penalized {
            // One penalized failure stops the sequence for this turn.
            return Ok(Flow::Break);
        }
        Ok(Flow::Continue)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Memory plumbing
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Append the canonical single-action XML as an assistant message.
    fn append_action_message(&self, action: &Action) -> Result<()> {
        let xml = action_to_xml(action);
        let meta = MessageMeta {
            action: Some(action.clone()),
            ..Default::default()
        };
        self.memory
            .add_message(Role::Assistant, &xml, Some(action.kind.as_str()), false, meta)
    }

    /// Append an action's result as the adjacent user message.
    fn record_result(&self, outcome: &DispatchOutcome) -> Result<()> {
        let text = result_text(&outcome.result);
        let mut meta = MessageMeta {
            action: Some(outcome.action.clone()),
            action_memory: outcome.action_memory.clone(),
            ..Default::default()
        };
        meta.run_id = outcome.action.str_param("run_id").map(str::to_owned);
        meta.exit_code = outcome.result.exit_code();
        meta.filepath = outcome.action.str_param("origin_path").map(str::to_owned);
        meta.origin_cwd = outcome.action.str_param("origin_cwd").map(str::to_owned);
        meta.origin_command = outcome.action.str_param("origin_command").map(str::to_owned);
        meta.origin_path = outcome.action.str_param("origin_path").map(str::to_owned);

        self.memory.add_message(
            Role::User,
            &text,
            Some(outcome.action.kind.as_str()),
            outcome.memorized,
            meta,
        )
    }

    fn track_transients(&self, ctx: &mut TaskContext, outcome: &DispatchOutcome) {
        let origin = outcome
            .action
            .str_param("origin_path")
            .unwrap_or_else(|| outcome.action.str_param_or_empty("path"))
            .to_owned();

        if outcome.action.kind == ActionKind::ReadFile && !outcome.result.is_success() {
            if let Some(code) = outcome.result.meta.get("error_code").and_then(|v| v.as_str()) {
                if code == "NOT_FOUND" || code == "INACCESSIBLE" {
                    ctx.transient_reads.insert(origin.clone(), code.to_owned());
                }
            }
        }

        let is_write = matches!(
            outcome.action.kind,
            ActionKind::WriteCode | ActionKind::WriteFile
        );
        if is_write && outcome.result.is_success() && ctx.transient_reads.contains_key(&origin) {
            ctx.writes_since.insert(origin);
        }
    }

    /// Re-check transient read errors whose path has since been written
    /// successfully; a now-readable file clears stale reflection.
    async fn revalidate_reads(&self, ctx: &mut TaskContext) {
        let candidates: Vec<String> = ctx
            .transient_reads
            .keys()
            .filter(|path| ctx.writes_since.contains(*path))
            .cloned()
            .collect();

        for path in candidates {
            let probe = Action::new(ActionKind::ReadFile).with_param("path", path.as_str());
            let outcome = self.dispatcher.execute(&probe).await;
            if outcome.result.is_success() {
                ctx.transient_reads.remove(&path);
                ctx.writes_since.remove(&path);
                if ctx
                    .reflection
                    .as_deref()
                    .map(|r| r.contains(&path))
                    .unwrap_or(false)
                {
                    ctx.reflection = None;
                }
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Prompt plumbing
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn assemble_prompt(&self, task: &TaskSpec, ctx: &TaskContext) -> String {
        let mut catalog: Vec<(String, String)> = self
            .dispatcher
            .registry()
            .catalog()
            .into_iter()
            .map(|(kind, description)| (kind.as_str().to_owned(), description.to_owned()))
            .collect();
        catalog.extend(self.mcp.tool_descriptions());

        let conv_root = self
            .dispatcher
            .context()
            .workspace_root
            .join(format!("user_{}", self.dispatcher.context().user_id))
            .join(self.dispatcher.context().conversation_dir());

        let inputs = PromptInputs {
            mode: ctx.prompt_mode,
            goal: &task.goal,
            requirement: &task.requirement,
            tool_catalog: catalog,
            workspace_files: list_workspace_files(&conv_root),
            memorized: self.memory.memorized_content(),
            digest: self.digest.digest(),
            reflection: ctx.reflection.as_deref(),
            last_finish_status: ctx.last_finish_status.as_deref(),
            evaluation_prompt: self.evaluation.evaluation_prompt(),
        };
        let prompt = build_prompt(&self.templates, &inputs);

        TraceEvent::PromptBuilt {
            mode: ctx.prompt_mode.as_str().to_owned(),
            chars: prompt.len(),
            first_turn: self.memory.is_empty(),
        }
        .emit();

        prompt
    }

    fn chat_history(&self) -> Vec<ChatMessage> {
        self.memory
            .messages()
            .into_iter()
            .filter(|m| !m.content.is_empty())
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Developer => "developer",
                };
                ChatMessage::new(role, m.content)
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn result_text(result: &ActionResult) -> String {
    let mut text = result.content.clone();
    if !result.is_success() {
        if let Some(stderr) = result.stderr.as_deref() {
            if !stderr.is_empty() && !text.contains(stderr) {
                text.push_str("\nstderr:\n");
                text.push_str(stderr);
            }
        }
        if let Some(error) = result.error.as_deref() {
            if !error.is_empty() && !text.contains(error) {
                text.push_str("\nerror: ");
                text.push_str(error);
            }
        }
    }
    text
}

fn combined_output(result: &ActionResult) -> String {
    let mut out = result.content.clone();
    if let Some(stdout) = result.stdout.as_deref() {
        if !out.contains(stdout) {
            out.push('\n');
            out.push_str(stdout);
        }
    }
    if let Some(stderr) = result.stderr.as_deref() {
        out.push('\n');
        out.push_str(stderr);
    }
    out
}

fn unsupported_tool_correction(unknown: &[String]) -> String {
    format!(
        "The tool(s) {} do not exist. Only these tools are available: finish, patch_code, \
write_code, replace_code_block, write_file, read_file, revise_plan, terminal_run, web_search, \
read_url, browser, mcp_tool, evaluation, document_query, document_upload, patch_complete, \
information. Emit exactly one of them as an XML block, for example \
<terminal_run><command>ls</command><cwd>.</cwd></terminal_run>.",
        unknown.join(", ")
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
