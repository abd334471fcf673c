//! Configuration tree for the execution core.
//!
//! Every field has a serde default so a partial (or missing) TOML file
//! yields a usable config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl CoreConfig {
    /// Load from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// SSE message delimiter. Non-standard servers sometimes use `\n`.
    #[serde(default = "d_delimiter")]
    pub message_delimiter: String,
    #[serde(default = "d_120")]
    pub request_timeout_sec: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            api_key: String::new(),
            model: d_model(),
            message_delimiter: d_delimiter(),
            request_timeout_sec: 120,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root under which every `user_<id>` directory lives.
    #[serde(default = "d_workspace_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: d_workspace_root(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "d_memory_dir")]
    pub dir: PathBuf,
    /// Occurrences kept per tool-call key, including the incoming one.
    #[serde(default = "d_3")]
    pub prune_keep_occurrences: usize,
    /// Character budget across kept messages; 0 disables the cap.
    #[serde(default = "d_60000")]
    pub prune_max_chars: usize,
    /// How many recent assistant hashes repeat detection compares against.
    #[serde(default = "d_2")]
    pub repeat_detect_window: usize,
    #[serde(default = "d_50000")]
    pub max_content_length: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: d_memory_dir(),
            prune_keep_occurrences: 3,
            prune_max_chars: 60_000,
            repeat_detect_window: 2,
            max_content_length: 50_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base URL of the sandbox runtime server. None = execute locally.
    #[serde(default)]
    pub sandbox_url: Option<String>,
    #[serde(default = "d_30000")]
    pub terminal_run_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sandbox_url: None,
            terminal_run_timeout_ms: 30_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Cap on *consecutive* technical failures.
    #[serde(default = "d_10")]
    pub max_retry_times: u32,
    /// Optional cap on total retries across the whole task. Disabled
    /// unless explicitly configured.
    #[serde(default)]
    pub max_total_retries: Option<u32>,
    /// Directory holding prompt-template overrides.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retry_times: 10,
            max_total_retries: None,
            template_dir: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn d_model() -> String {
    "qwen2.5-coder".into()
}
fn d_delimiter() -> String {
    "\n\n".into()
}
fn d_workspace_root() -> PathBuf {
    PathBuf::from("workspace")
}
fn d_memory_dir() -> PathBuf {
    PathBuf::from("memory")
}
fn d_2() -> usize {
    2
}
fn d_3() -> usize {
    3
}
fn d_10() -> u32 {
    10
}
fn d_120() -> u64 {
    120
}
fn d_30000() -> u64 {
    30_000
}
fn d_50000() -> usize {
    50_000
}
fn d_60000() -> usize {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_knobs() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.agent.max_retry_times, 10);
        assert!(cfg.agent.max_total_retries.is_none());
        assert_eq!(cfg.memory.repeat_detect_window, 2);
        assert_eq!(cfg.memory.prune_keep_occurrences, 3);
        assert_eq!(cfg.memory.prune_max_chars, 60_000);
        assert_eq!(cfg.memory.max_content_length, 50_000);
        assert_eq!(cfg.runtime.terminal_run_timeout_ms, 30_000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: CoreConfig = toml::from_str(
            r#"
            [memory]
            prune_max_chars = 1000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.memory.prune_max_chars, 1000);
        assert_eq!(cfg.memory.prune_keep_occurrences, 3);
        assert_eq!(cfg.agent.max_retry_times, 10);
    }

    #[test]
    fn load_missing_file_is_default() {
        let cfg = CoreConfig::load(Path::new("/nonexistent/codeact.toml")).unwrap();
        assert_eq!(cfg.llm.message_delimiter, "\n\n");
    }
}
