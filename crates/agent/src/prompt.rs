//! Prompt assembly.
//!
//! The prompt is rebuilt every turn: role header by mode, a system
//! descriptor, the tool catalog, a bounded workspace listing, the
//! memorized-content summary, the previous-conversation digest, the
//! task goal and requirement, the optional error-feedback block, and
//! the evaluation sub-prompt.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::context::PromptMode;

/// Maximum workspace entries listed.
const MAX_LISTING_ENTRIES: usize = 200;
/// Maximum listing depth below the conversation root.
const MAX_LISTING_DEPTH: usize = 2;

/// Directory / file names excluded from the listing.
const LISTING_SKIP: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "dist",
    "build",
    "target",
    ".cache",
    "todo.md",
];

const HEADER_BUILD: &str = include_str!("../templates/thinking_header_build.txt");
const HEADER_CODECORRECTOR: &str = include_str!("../templates/thinking_header_codecorrector.txt");

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Template store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolves role-header templates: an on-disk override directory wins,
/// the embedded defaults back it. Resolved templates are cached.
pub struct TemplateStore {
    dir: Option<PathBuf>,
    cache: Mutex<HashMap<String, String>>,
}

impl TemplateStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn header(&self, mode: PromptMode) -> String {
        let name = match mode {
            PromptMode::Build => "thinking_header_build.txt",
            PromptMode::CodeCorrector => "thinking_header_codecorrector.txt",
        };
        if let Some(cached) = self.cache.lock().get(name) {
            return cached.clone();
        }
        let resolved = self
            .dir
            .as_ref()
            .and_then(|d| std::fs::read_to_string(d.join(name)).ok())
            .unwrap_or_else(|| match mode {
                PromptMode::Build => HEADER_BUILD.to_owned(),
                PromptMode::CodeCorrector => HEADER_CODECORRECTOR.to_owned(),
            });
        self.cache
            .lock()
            .insert(name.to_owned(), resolved.clone());
        resolved
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace listing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// List files under the conversation root: depth ≤ 2, at most 200
/// entries, skipping build artifacts and VCS internals.
pub fn list_workspace_files(root: &Path) -> Vec<String> {
    let mut entries = Vec::new();
    collect_entries(root, root, 0, &mut entries);
    entries.sort();
    entries.truncate(MAX_LISTING_ENTRIES);
    entries
}

fn collect_entries(root: &Path, dir: &Path, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_LISTING_DEPTH || out.len() >= MAX_LISTING_ENTRIES * 2 {
        return;
    }
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if LISTING_SKIP.contains(&name.as_str()) || name.ends_with(".pyc") {
            continue;
        }
        let path = entry.path();
        let is_dir = path.is_dir();
        let relative = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or(name);
        if is_dir {
            collect_entries(root, &path, depth + 1, out);
        } else {
            out.push(relative);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the prompt is assembled from, pre-gathered by the loop.
pub struct PromptInputs<'a> {
    pub mode: PromptMode,
    pub goal: &'a str,
    pub requirement: &'a str,
    pub tool_catalog: Vec<(String, String)>,
    pub workspace_files: Vec<String>,
    pub memorized: String,
    pub digest: String,
    pub reflection: Option<&'a str>,
    pub last_finish_status: Option<&'a str>,
    pub evaluation_prompt: String,
}

/// Build the full prompt string.
pub fn build_prompt(store: &TemplateStore, inputs: &PromptInputs<'_>) -> String {
    let mut out = String::new();

    out.push_str(store.header(inputs.mode).trim_end());
    out.push_str("\n\n");

    let _ = writeln!(out, "=== System ===");
    let _ = writeln!(out, "time: {}", chrono::Utc::now().to_rfc3339());
    let _ = writeln!(
        out,
        "os: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    out.push('\n');

    let _ = writeln!(out, "=== Tools ===");
    for (name, description) in &inputs.tool_catalog {
        let _ = writeln!(out, "- {name}: {description}");
    }
    out.push('\n');

    if !inputs.workspace_files.is_empty() {
        let _ = writeln!(out, "=== Workspace Files ===");
        for file in &inputs.workspace_files {
            let _ = writeln!(out, "{file}");
        }
        out.push('\n');
    }

    if !inputs.memorized.is_empty() {
        let _ = writeln!(out, "=== Memorized Content ===");
        let _ = writeln!(out, "{}", inputs.memorized);
        out.push('\n');
    }

    if !inputs.digest.is_empty() {
        let _ = writeln!(out, "=== Previous Conversation ===");
        let _ = writeln!(out, "{}", inputs.digest);
        out.push('\n');
    }

    let _ = writeln!(out, "=== Task Goal ===");
    let _ = writeln!(out, "{}", inputs.goal);
    out.push('\n');

    let _ = writeln!(out, "=== Current Requirement ===");
    let _ = writeln!(out, "{}", inputs.requirement);
    out.push('\n');

    // Error feedback is withheld after a successful finish.
    let include_feedback =
        inputs.reflection.is_some() && inputs.last_finish_status != Some("SUCCESS");
    if include_feedback {
        let _ = writeln!(out, "=== Error Feedback ===");
        let _ = writeln!(out, "{}", inputs.reflection.unwrap_or_default());
        out.push('\n');
    }

    if !inputs.evaluation_prompt.is_empty() {
        out.push_str(&inputs.evaluation_prompt);
        out.push('\n');
    }

    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn inputs<'a>(reflection: Option<&'a str>, finish: Option<&'a str>) -> PromptInputs<'a> {
        PromptInputs {
            mode: PromptMode::Build,
            goal: "ship the widget",
            requirement: "write the parser",
            tool_catalog: vec![("write_code".into(), "write a file".into())],
            workspace_files: vec!["src/main.py".into()],
            memorized: String::new(),
            digest: String::new(),
            reflection,
            last_finish_status: finish,
            evaluation_prompt: String::new(),
        }
    }

    #[test]
    fn includes_goal_requirement_and_tools() {
        let store = TemplateStore::new(None);
        let prompt = build_prompt(&store, &inputs(None, None));
        assert!(prompt.contains("=== Task Goal ===\nship the widget"));
        assert!(prompt.contains("=== Current Requirement ===\nwrite the parser"));
        assert!(prompt.contains("- write_code: write a file"));
        assert!(prompt.contains("src/main.py"));
    }

    #[test]
    fn error_feedback_present_after_failure() {
        let store = TemplateStore::new(None);
        let prompt = build_prompt(&store, &inputs(Some("it broke"), Some("FAILED")));
        assert!(prompt.contains("=== Error Feedback ===\nit broke"));
    }

    #[test]
    fn error_feedback_removed_after_success() {
        let store = TemplateStore::new(None);
        let prompt = build_prompt(&store, &inputs(Some("stale feedback"), Some("SUCCESS")));
        assert!(!prompt.contains("=== Error Feedback ==="));
        assert!(!prompt.contains("stale feedback"));
    }

    #[test]
    fn codecorrector_header_differs() {
        let store = TemplateStore::new(None);
        let build = store.header(PromptMode::Build);
        let correct = store.header(PromptMode::CodeCorrector);
        assert_ne!(build, correct);
        assert!(correct.contains("error-correction"));
    }

    #[test]
    fn template_override_dir_wins() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("thinking_header_build.txt"),
            "CUSTOM HEADER",
        )
        .unwrap();
        let store = TemplateStore::new(Some(dir.path().to_path_buf()));
        assert_eq!(store.header(PromptMode::Build), "CUSTOM HEADER");
    }

    #[test]
    fn listing_skips_artifacts_and_respects_depth() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/deep/deeper")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join("__pycache__")).unwrap();
        std::fs::write(root.join("a.py"), "").unwrap();
        std::fs::write(root.join("a.pyc"), "").unwrap();
        std::fs::write(root.join("src/b.py"), "").unwrap();
        std::fs::write(root.join("src/deep/c.py"), "").unwrap();
        std::fs::write(root.join("src/deep/deeper/d.py"), "").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "").unwrap();
        std::fs::write(root.join("todo.md"), "").unwrap();

        let listing = list_workspace_files(root);
        assert!(listing.contains(&"a.py".to_owned()));
        assert!(listing.contains(&"src/b.py".to_owned()));
        assert!(listing.contains(&"src/deep/c.py".to_owned()));
        assert!(!listing.iter().any(|f| f.contains("deeper")), "depth > 2 excluded");
        assert!(!listing.iter().any(|f| f.contains("node_modules")));
        assert!(!listing.iter().any(|f| f.ends_with(".pyc")));
        assert!(!listing.contains(&"todo.md".to_owned()));
    }

    #[test]
    fn listing_caps_at_200_entries() {
        let dir = TempDir::new().unwrap();
        for i in 0..250 {
            std::fs::write(dir.path().join(format!("f{i:03}.txt")), "").unwrap();
        }
        let listing = list_workspace_files(dir.path());
        assert_eq!(listing.len(), 200);
    }
}
