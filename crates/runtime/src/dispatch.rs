//! The dispatcher: derived-field injection, local/sandbox routing, and
//! result normalization around every executed action.

use std::time::Instant;

use ca_domain::action::{Action, ActionKind, ActionResult};
use ca_domain::trace::TraceEvent;

use crate::registry::{default_memory_summary, ToolRegistry};
use crate::ui::UiEvent;
use crate::RuntimeContext;

/// What one dispatch produced: the enriched action (derived fields
/// injected), the normalized result, and the memory annotations the
/// control loop stores alongside it.
pub struct DispatchOutcome {
    pub action: Action,
    pub result: ActionResult,
    pub memorized: bool,
    pub action_memory: Option<String>,
}

pub struct Dispatcher {
    registry: ToolRegistry,
    ctx: RuntimeContext,
}

impl Dispatcher {
    pub fn new(ctx: RuntimeContext) -> Self {
        Self {
            registry: ToolRegistry::standard(),
            ctx,
        }
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute one action end-to-end.
    pub async fn execute(&self, action: &Action) -> DispatchOutcome {
        let mut action = action.clone();
        self.inject_derived(&mut action);

        let handler = self.registry.get(action.kind);
        let description = handler
            .as_ref()
            .map(|h| h.describe(&action))
            .unwrap_or_else(|| format!("Running {}", action.kind));

        self.ctx.ui.emit(UiEvent::ActionRunning {
            action_type: action.kind.as_str().to_owned(),
            description,
        });

        let started = Instant::now();
        let mut result = match (&self.ctx.sandbox, handler) {
            _ if action.kind.is_local_only() => ActionResult::failure(format!(
                "{} is a local control action and cannot be dispatched",
                action.kind
            )),
            (Some(sandbox), _) => sandbox.execute(&action, &self.ctx.user_id).await,
            (None, Some(handler)) => handler.execute(&action, &self.ctx).await,
            (None, None) => ActionResult::failure(format!(
                "no handler registered for {}",
                action.kind
            )),
        };

        self.normalize(&action, &mut result);

        TraceEvent::ActionDispatched {
            action_type: action.kind.as_str().to_owned(),
            status: if result.is_success() { "success" } else { "failure" }.to_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        self.ctx.ui.emit(UiEvent::ActionFinished {
            action_type: action.kind.as_str().to_owned(),
            status: if result.is_success() { "success" } else { "failure" }.to_owned(),
            content_preview: result.content.chars().take(200).collect(),
        });

        let (memorized, action_memory) = match self.registry.get(action.kind) {
            Some(handler) => {
                let summary = handler
                    .memory_summary(&action, &result.content)
                    .unwrap_or_else(|| default_memory_summary(&action, &result.content));
                (handler.memorized(), Some(summary))
            }
            None => (false, None),
        };

        DispatchOutcome {
            action,
            result,
            memorized,
            action_memory,
        }
    }

    /// Inject derived params before execution.
    ///
    /// File tools get a conversation-scoped on-disk path while keeping
    /// the declared path as `origin_path` (the memory-pruning key).
    /// terminal_run always gets a fresh `run_id` plus origin markers.
    pub fn inject_derived(&self, action: &mut Action) {
        if action.kind.is_file_tool() {
            let declared = action.str_param_or_empty("path").trim().to_owned();
            if !declared.is_empty() && action.str_param("origin_path").is_none() {
                action.set_param("origin_path", declared.clone());
            }
            let conv = self.ctx.conversation_dir();
            let relative = declared.trim_start_matches('/');
            if !relative.is_empty() && !relative.starts_with(&conv) {
                action.set_param("path", format!("{conv}/{relative}"));
            }
        }

        if action.kind == ActionKind::TerminalRun {
            let run_id: String = uuid::Uuid::new_v4().as_simple().to_string()[..12].to_owned();
            action.set_param("run_id", run_id);

            let command = action.str_param_or_empty("command").to_owned();
            let args = action.str_param_or_empty("args").to_owned();
            let cwd = {
                let c = action.str_param_or_empty("cwd").trim().to_owned();
                if c.is_empty() {
                    ".".to_owned()
                } else {
                    c
                }
            };
            let command_line = if args.trim().is_empty() {
                command
            } else {
                format!("{command} {args}")
            };
            action.set_param("origin_cwd", cwd.clone());
            action.set_param("origin_command", command_line.clone());
            action.set_param("origin_path", format!("terminal_run:{cwd}::{command_line}"));
        }

        if action.kind == ActionKind::Browser {
            if let Some(creds) = self.ctx.credentials.default_model_credentials() {
                action.set_param("llm_base_url", creds.base_url);
                action.set_param("llm_api_key", creds.api_key);
                action.set_param("llm_model", creds.model);
            }
        }
    }

    /// Normalize a result so downstream consumers never see an empty or
    /// shapeless outcome.
    fn normalize(&self, action: &Action, result: &mut ActionResult) {
        result
            .meta
            .entry("action_type".to_owned())
            .or_insert_with(|| action.kind.as_str().into());

        if action.kind == ActionKind::TerminalRun {
            // content mirrors stdout; exitCode is always finite.
            if result.content.is_empty() {
                if let Some(stdout) = &result.stdout {
                    result.content = stdout.clone();
                }
            }
            if result.meta.get("exitCode").and_then(|v| v.as_i64()).is_none() {
                let default = if result.is_success() { 0 } else { 1 };
                result.meta.insert("exitCode".into(), default.into());
            }
            // The run-id marker lives in both meta and content so a
            // purge can match either.
            if let Some(run_id) = action.str_param("run_id") {
                result
                    .meta
                    .entry("run_id".to_owned())
                    .or_insert_with(|| run_id.into());
                let marker = format!("[terminal_run_id:{run_id}]");
                if !result.content.contains(&marker) {
                    if !result.content.is_empty() && !result.content.ends_with('\n') {
                        result.content.push('\n');
                    }
                    result.content.push_str(&marker);
                }
            }
        }

        if result.content.is_empty() {
            result.content = if result.is_success() {
                format!("{} completed with no output", action.kind)
            } else {
                format!(
                    "{} failed without diagnostics; raw error: {}",
                    action.kind,
                    result.error.as_deref().unwrap_or("<none>")
                )
            };
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
