//! Local file-tool execution: `write_code`, `read_file`, `patch_code`,
//! `replace_code_block`.
//!
//! Every path resolves through the workspace restriction layer; writes
//! are atomic (temp sibling + rename); Python sources pass the
//! interactive-input guard before touching disk.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use ca_domain::action::{Action, ActionResult};
use ca_workspace::{diff, guard, paths, replace};

use crate::RuntimeContext;

fn display_path(action: &Action) -> String {
    action
        .str_param("origin_path")
        .or_else(|| action.str_param("path"))
        .unwrap_or("<unknown>")
        .to_owned()
}

fn resolve(action: &Action, ctx: &RuntimeContext) -> Result<PathBuf, String> {
    let requested = action.str_param_or_empty("path");
    paths::resolve_user_path(&ctx.workspace_root, &ctx.user_id, requested)
}

/// Reject Python that waits on interactive input. Applies to every
/// write-shaped tool.
fn guard_python(path: &Path, content: &str) -> Result<(), String> {
    let name = path.to_string_lossy();
    if !guard::applies_to(&name) {
        return Ok(());
    }
    guard::check_python_source(content).map_err(|patterns| guard::rejection_message(&patterns))
}

async fn atomic_write(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory: {e}"))?;
    }

    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path)
        .await
        .map_err(|e| format!("failed to create temp file: {e}"))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| format!("failed to write: {e}"))?;
    file.flush().await.map_err(|e| format!("failed to flush: {e}"))?;

    fs::rename(&tmp_path, path).await.map_err(|e| {
        let tmp = tmp_path.clone();
        tokio::spawn(async move {
            let _ = fs::remove_file(&tmp).await;
        });
        format!("failed to rename into place: {e}")
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_code
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn write_code(action: &Action, ctx: &RuntimeContext) -> ActionResult {
    let shown = display_path(action);
    let path = match resolve(action, ctx) {
        Ok(p) => p,
        Err(e) => return file_failure(action, &e),
    };
    let content = action.str_param_or_empty("content").to_owned();

    if let Err(reason) = guard_python(&path, &content) {
        return file_failure(action, &reason);
    }
    if let Err(e) = atomic_write(&path, &content).await {
        return file_failure(action, &e);
    }

    ActionResult::success(format!("Wrote {} bytes to {shown}", content.len()))
        .with_meta("action_type", action.kind.as_str())
        .with_meta("filepath", shown)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn read_file(action: &Action, ctx: &RuntimeContext) -> ActionResult {
    let shown = display_path(action);
    let path = match resolve(action, ctx) {
        Ok(p) => p,
        Err(e) => return file_failure(action, &e),
    };

    match fs::read_to_string(&path).await {
        Ok(mut content) => {
            if content.len() > ctx.max_content_length {
                let cut = floor_char_boundary(&content, ctx.max_content_length);
                let total = content.len();
                content.truncate(cut);
                content.push_str(&format!("\n… [truncated, {total} chars total]"));
            }
            ActionResult::success(content)
                .with_meta("action_type", "read_file")
                .with_meta("filepath", shown)
        }
        Err(e) => {
            let code = classify_read_error(&e);
            let mut result = file_failure(action, &format!("cannot read {shown}: {e}"));
            result.meta.insert("error_code".into(), code.into());
            result
        }
    }
}

/// Classify read errors into the transient-retry vocabulary.
fn classify_read_error(e: &std::io::Error) -> String {
    match e.kind() {
        std::io::ErrorKind::NotFound => "NOT_FOUND".to_owned(),
        std::io::ErrorKind::PermissionDenied => "INACCESSIBLE".to_owned(),
        other => format!("{other:?}"),
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// patch_code
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn patch_code(action: &Action, ctx: &RuntimeContext) -> ActionResult {
    let shown = display_path(action);
    let path = match resolve(action, ctx) {
        Ok(p) => p,
        Err(e) => return file_failure(action, &e),
    };
    let diff_text = action.str_param_or_empty("diff");

    let current = match fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => return file_failure(action, &format!("cannot read {shown}: {e}")),
    };

    let patched = match diff::apply_unified(&current, diff_text) {
        Ok(p) => p,
        Err(e) => return file_failure(action, &e),
    };

    if let Err(reason) = guard_python(&path, &patched) {
        return file_failure(action, &reason);
    }
    if let Err(e) = atomic_write(&path, &patched).await {
        return file_failure(action, &e);
    }

    ActionResult::success(format!("Patched {shown}"))
        .with_meta("action_type", "patch_code")
        .with_meta("filepath", shown)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// replace_code_block
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn replace_code_block(action: &Action, ctx: &RuntimeContext) -> ActionResult {
    let shown = display_path(action);
    let path = match resolve(action, ctx) {
        Ok(p) => p,
        Err(e) => return file_failure(action, &e),
    };
    let snippet = action.str_param_or_empty("code_block");

    let current = match fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => return file_failure(action, &format!("cannot read {shown}: {e}")),
    };

    let updated = match replace::replace_code_block(&current, snippet) {
        Ok(u) => u,
        Err(err) => {
            let mut result = file_failure(action, &err.message);
            result.meta.insert("keyid".into(), err.keyid.into());
            return result;
        }
    };

    if let Err(reason) = guard_python(&path, &updated) {
        return file_failure(action, &reason);
    }
    if let Err(e) = atomic_write(&path, &updated).await {
        return file_failure(action, &e);
    }

    ActionResult::success(format!("Replaced code block in {shown}"))
        .with_meta("action_type", "replace_code_block")
        .with_meta("filepath", shown)
}

fn file_failure(action: &Action, message: &str) -> ActionResult {
    let mut result = ActionResult::failure(message.to_owned())
        .with_meta("action_type", action.kind.as_str())
        .with_meta("filepath", display_path(action));
    result.error = Some(message.to_owned());
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ca_domain::action::ActionKind;
    use ca_domain::config::RuntimeConfig;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> RuntimeContext {
        RuntimeContext::new(
            RuntimeConfig::default(),
            dir.path().to_path_buf(),
            "1",
            "convabcd1234",
        )
    }

    fn write_action(path: &str, content: &str) -> Action {
        Action::new(ActionKind::WriteCode)
            .with_param("path", path)
            .with_param("content", content)
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);

        let write = write_code(&write_action("Conversation_x/a.txt", "hello\n"), &ctx).await;
        assert!(write.is_success(), "{}", write.content);

        let read = read_file(
            &Action::new(ActionKind::ReadFile).with_param("path", "Conversation_x/a.txt"),
            &ctx,
        )
        .await;
        assert!(read.is_success());
        assert_eq!(read.content, "hello\n");
    }

    #[tokio::test]
    async fn read_missing_classified_not_found() {
        let dir = TempDir::new().unwrap();
        let result = read_file(
            &Action::new(ActionKind::ReadFile).with_param("path", "nope.txt"),
            &ctx(&dir),
        )
        .await;
        assert!(!result.is_success());
        assert_eq!(
            result.meta.get("error_code"),
            Some(&serde_json::json!("NOT_FOUND"))
        );
    }

    #[tokio::test]
    async fn read_truncates_to_max_content_length() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx(&dir);
        ctx.max_content_length = 100;

        write_code(&write_action("big.txt", &"a".repeat(500)), &ctx).await;
        let result = read_file(
            &Action::new(ActionKind::ReadFile).with_param("path", "big.txt"),
            &ctx,
        )
        .await;
        assert!(result.is_success());
        assert!(result.content.contains("truncated"));
        assert!(result.content.len() < 200);
    }

    #[tokio::test]
    async fn python_guard_blocks_interactive_write() {
        let dir = TempDir::new().unwrap();
        let result = write_code(&write_action("run.py", "x = input()\n"), &ctx(&dir)).await;
        assert!(!result.is_success());
        assert!(result.content.contains("interactive input"));
    }

    #[tokio::test]
    async fn python_guard_ignores_non_python() {
        let dir = TempDir::new().unwrap();
        let result = write_code(&write_action("run.sh", "read x\n"), &ctx(&dir)).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn patch_applies_and_guard_checks_result() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        write_code(&write_action("m.py", "a = 1\nb = 2\n"), &ctx).await;

        let patch = Action::new(ActionKind::PatchCode)
            .with_param("path", "m.py")
            .with_param("diff", "@@ -1,2 +1,2 @@\n-a = 1\n+a = 10\n b = 2\n");
        let result = patch_code(&patch, &ctx).await;
        assert!(result.is_success(), "{}", result.content);

        let read = read_file(&Action::new(ActionKind::ReadFile).with_param("path", "m.py"), &ctx).await;
        assert_eq!(read.content, "a = 10\nb = 2\n");
    }

    #[tokio::test]
    async fn patch_mismatch_surfaces_diagnostic() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        write_code(&write_action("m.py", "a = 1\n"), &ctx).await;

        let patch = Action::new(ActionKind::PatchCode)
            .with_param("path", "m.py")
            .with_param("diff", "@@ -1,2 +1,2 @@\n-zz = 9\n+zz = 8\n qq = 7\n");
        let result = patch_code(&patch, &ctx).await;
        assert!(!result.is_success());
        assert!(result.content.contains("Patch context mismatch"));
    }

    #[tokio::test]
    async fn replace_noop_fails_and_leaves_file() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        write_code(&write_action("x.py", "before\na<b and b>c\nafter\n"), &ctx).await;

        let action = Action::new(ActionKind::ReplaceCodeBlock)
            .with_param("path", "x.py")
            .with_param("code_block", "a<b and b>c");
        let result = replace_code_block(&action, &ctx).await;
        assert!(!result.is_success());
        assert_eq!(
            result.meta.get("keyid"),
            Some(&serde_json::json!("replace_code_block_noop"))
        );

        let read = read_file(&Action::new(ActionKind::ReadFile).with_param("path", "x.py"), &ctx).await;
        assert_eq!(read.content, "before\na<b and b>c\nafter\n");
    }

    #[tokio::test]
    async fn replace_applies_change() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        write_code(&write_action("y.py", "def f():\n    x = 1\n    return x\n"), &ctx).await;

        let action = Action::new(ActionKind::ReplaceCodeBlock)
            .with_param("path", "y.py")
            .with_param("code_block", "def f():\n    x = 2\n    return x");
        let result = replace_code_block(&action, &ctx).await;
        assert!(result.is_success(), "{}", result.content);

        let read = read_file(&Action::new(ActionKind::ReadFile).with_param("path", "y.py"), &ctx).await;
        assert!(read.content.contains("x = 2"));
    }

    #[tokio::test]
    async fn traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let result = write_code(&write_action("../outside.txt", "x"), &ctx(&dir)).await;
        assert!(!result.is_success());
        assert!(result.content.contains(".."));
    }
}
