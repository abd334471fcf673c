use serde::Serialize;

/// Structured trace events emitted across all codeact crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    PromptBuilt {
        mode: String,
        chars: usize,
        first_turn: bool,
    },
    LlmRequest {
        model: String,
        duration_ms: u64,
        content_chars: usize,
        cancelled: bool,
    },
    ActionDispatched {
        action_type: String,
        status: String,
        duration_ms: u64,
    },
    MemoryAppend {
        role: String,
        action_type: String,
        messages: usize,
    },
    MemoryGroupPruned {
        tool_call_key: String,
        blanked: usize,
    },
    MemoryBudgetPruned {
        dropped_groups: usize,
        kept_chars: usize,
    },
    TerminalRunPurged {
        run_id: String,
        removed: usize,
    },
    RepeatDetected {
        repeat_hash: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ca_event");
    }
}
