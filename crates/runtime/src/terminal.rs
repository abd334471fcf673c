//! Local `terminal_run` execution.
//!
//! Commands run through `sh -c` inside the conversation workspace with
//! a hard wall-clock limit; on timeout the child is force-killed and
//! the result is a failure with `timedOut = true`. Grandchildren may
//! survive the kill; that is an accepted limitation.

use std::path::PathBuf;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use ca_domain::action::{Action, ActionResult};
use ca_workspace::paths;

use crate::RuntimeContext;

/// Execute a terminal_run action locally.
pub async fn run_terminal(action: &Action, ctx: &RuntimeContext) -> ActionResult {
    let command = action.str_param_or_empty("command").to_owned();
    let args = action.str_param_or_empty("args").to_owned();
    let cwd_param = action.str_param_or_empty("cwd").to_owned();

    let command_line = if args.trim().is_empty() {
        command.clone()
    } else {
        format!("{command} {args}")
    };

    // Resolve the working directory under the conversation workspace.
    let resolved_cwd = match resolve_cwd(ctx, &cwd_param) {
        Ok(dir) => dir,
        Err(e) => return base_failure(action, &format!("invalid cwd '{cwd_param}': {e}")),
    };
    if let Err(e) = std::fs::create_dir_all(&resolved_cwd) {
        return base_failure(action, &format!("cannot create cwd: {e}"));
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&command_line)
        .current_dir(&resolved_cwd)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return base_failure(action, &format!("failed to spawn: {e}")),
    };

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(read_pipe(stdout_pipe));
    let stderr_task = tokio::spawn(read_pipe(stderr_pipe));

    let timeout = std::time::Duration::from_millis(ctx.cfg.terminal_run_timeout_ms);
    let (exit_status, timed_out) = tokio::select! {
        status = child.wait() => (status.ok(), false),
        _ = tokio::time::sleep(timeout) => {
            // SIGKILL; the wait below reaps the child.
            let _ = child.kill().await;
            (child.wait().await.ok(), true)
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let mut stderr = stderr_task.await.unwrap_or_default();
    let duration_ms = started.elapsed().as_millis() as u64;

    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "terminal_run timed out after {}ms; process killed",
            ctx.cfg.terminal_run_timeout_ms
        ));
    }

    let exit_code = exit_status.and_then(|s| s.code());
    let signal = exit_signal(exit_status);
    let success = !timed_out && exit_code == Some(0);

    let mut result = if success {
        ActionResult::success(stdout.clone())
    } else {
        ActionResult::failure(stdout.clone())
    };
    result.stdout = Some(stdout);
    result.stderr = Some(stderr);
    result = result
        .with_meta("action_type", "terminal_run")
        .with_meta("exitCode", exit_code.unwrap_or(if success { 0 } else { 1 }))
        .with_meta("durationMs", duration_ms)
        .with_meta("resolved_cwd", resolved_cwd.display().to_string())
        .with_meta("command", command)
        .with_meta("args", args)
        .with_meta("cwd", cwd_param);
    if let Some(sig) = signal {
        result = result.with_meta("signal", sig);
    }
    if timed_out {
        result = result.with_meta("timedOut", true);
    }
    for field in ["run_id", "origin_cwd", "origin_command", "origin_path"] {
        if let Some(v) = action.str_param(field) {
            result = result.with_meta(field, v);
        }
    }
    result
}

fn resolve_cwd(ctx: &RuntimeContext, cwd: &str) -> Result<PathBuf, String> {
    let conv = ctx.conversation_dir();
    let trimmed = cwd.trim().trim_start_matches('/');
    let relative = if trimmed.is_empty() || trimmed == "." {
        conv
    } else if trimmed.starts_with(&conv) {
        trimmed.to_owned()
    } else {
        format!("{conv}/{trimmed}")
    };
    paths::resolve_user_path(&ctx.workspace_root, &ctx.user_id, &relative)
}

async fn read_pipe(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
fn exit_signal(status: Option<std::process::ExitStatus>) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.and_then(|s| s.signal())
}

#[cfg(not(unix))]
fn exit_signal(_status: Option<std::process::ExitStatus>) -> Option<i32> {
    None
}

fn base_failure(action: &Action, message: &str) -> ActionResult {
    let mut result = ActionResult::failure(message.to_owned())
        .with_meta("action_type", "terminal_run")
        .with_meta("exitCode", 1);
    for field in ["run_id", "origin_cwd", "origin_command", "origin_path"] {
        if let Some(v) = action.str_param(field) {
            result = result.with_meta(field, v);
        }
    }
    result.error = Some(message.to_owned());
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
