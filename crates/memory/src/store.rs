//! The file-backed message store and its pruning pipeline.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use ca_domain::config::MemoryConfig;
use ca_domain::error::{Error, Result};
use ca_domain::message::{Message, MessageMeta, Role};
use ca_domain::trace::TraceEvent;

use crate::{keys, sanitize, REPEAT_ERROR_TEXT};

/// Heavy meta payloads cleared when a message is blanked.
const HEAVY_META_KEYS: &[&str] = &["diff", "stdout", "stderr", "result"];
/// Heavy action params cleared when a message is blanked.
const HEAVY_PARAM_KEYS: &[&str] = &["content", "diff", "code_block"];

/// Ordered message store for one (conversation, task).
///
/// All mutation happens under one lock, so `add_message` is atomic with
/// respect to concurrent callers on the same task.
pub struct Memory {
    path: PathBuf,
    cfg: MemoryConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    messages: Vec<Message>,
    pending_repeat_error: Option<String>,
}

impl Memory {
    /// Open (or create) the store for a conversation + task pair.
    ///
    /// The backing file is `<dir>/<conversation_prefix>/<task_key>.json`.
    pub fn open(cfg: &MemoryConfig, conversation_id: &str, task_key: &str) -> Result<Self> {
        let prefix: String = conversation_id.chars().take(8).collect();
        let dir = cfg.dir.join(prefix);
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        let path = dir.join(format!("{task_key}.json"));

        let messages = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "unreadable memory file; starting fresh");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            cfg: cfg.clone(),
            inner: Mutex::new(Inner {
                messages,
                pending_repeat_error: None,
            }),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    /// Snapshot of the current messages.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().messages.clone()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // add_message — the append pipeline
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Append one message, running sanitization, repeat detection,
    /// de-duplication, key derivation, and both pruning passes.
    pub fn add_message(
        &self,
        role: Role,
        content: &str,
        action_type: Option<&str>,
        memorized: bool,
        meta: MessageMeta,
    ) -> Result<()> {
        // 1. Sanitize workspace path fragments.
        let sanitized = sanitize::sanitize(content);

        // 2. Logical action type.
        let resolved_type = resolve_action_type(action_type, &meta, &sanitized);

        let mut msg = Message {
            role,
            content: sanitized,
            action_type: resolved_type,
            memorized,
            meta,
        };

        let mut inner = self.inner.lock();

        // Inject a pending repeated-output error: replace the next
        // "Acknowledged." user message, or prepend before the next
        // assistant append so alternation is preserved.
        match role {
            Role::User => {
                if msg.content.trim() == "Acknowledged." {
                    if let Some(err) = inner.pending_repeat_error.take() {
                        msg.content = err;
                        msg.memorized = false;
                    }
                }
            }
            Role::Assistant => {
                if let Some(err) = inner.pending_repeat_error.take() {
                    inner.messages.push(Message::user(err));
                }
            }
            Role::Developer => {}
        }

        // 3. Anti-loop detection for assistant output.
        if role == Role::Assistant {
            let hash = keys::sha1_16(msg.content.trim());
            msg.meta.repeat_hash = Some(hash.clone());

            let recent: Vec<String> = inner
                .messages
                .iter()
                .rev()
                .filter(|m| m.role == Role::Assistant && !m.meta.pruned)
                .take(self.cfg.repeat_detect_window)
                .filter_map(|m| m.meta.repeat_hash.clone())
                .collect();
            if recent.iter().any(|h| h == &hash) {
                inner.pending_repeat_error = Some(REPEAT_ERROR_TEXT.to_owned());
                TraceEvent::RepeatDetected { repeat_hash: hash }.emit();
            }
        }

        // 4. Adjacent de-duplication: identical role + content drops the
        // incoming message entirely.
        if let Some(last) = inner.messages.last() {
            if last.role == msg.role && last.content == msg.content && !msg.content.is_empty() {
                tracing::debug!(role = ?msg.role, "dropping adjacent duplicate message");
                return Ok(());
            }
        }

        // 5. Key derivation.
        if role == Role::Assistant {
            if let Some(stable) = keys::stable_key(&msg) {
                let key = keys::tool_call_key(&msg.action_type, &stable);
                msg.meta.tool_call_key = Some(key.clone());
                msg.meta.prune_hash = Some(key);
            } else if msg.action_type == "information" {
                msg.meta.prune_hash = Some(keys::sha1_16(msg.content.trim()));
            }
        }
        if role == Role::User && msg.meta.prune_hash.is_none() {
            if let Some(last) = inner.messages.last() {
                if last.is_tool_call() {
                    msg.meta.prune_hash = last.meta.prune_hash.clone();
                }
            }
        }

        // 6. Unified occurrence pruning.
        if let Some(key) = msg.meta.tool_call_key.clone() {
            self.prune_occurrences(&mut inner, &key, msg.meta.prune_hash.as_deref());
        }

        // 7. Character-budget pruning.
        self.prune_char_budget(&mut inner, estimate_cost(&msg));

        // 8. Append and persist.
        inner.messages.push(msg);
        TraceEvent::MemoryAppend {
            role: format!("{role:?}").to_lowercase(),
            action_type: inner.messages.last().map(|m| m.action_type.clone()).unwrap_or_default(),
            messages: inner.messages.len(),
        }
        .emit();
        self.persist(&inner)
    }

    /// Blank all but the newest `prune_keep_occurrences - 1` occurrences
    /// of a tool-call key (the incoming call is the Nth).
    fn prune_occurrences(&self, inner: &mut Inner, key: &str, incoming_hash: Option<&str>) {
        let idxs: Vec<usize> = inner
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.role == Role::Assistant
                    && m.meta.tool_call_key.as_deref() == Some(key)
                    && !m.meta.pruned
            })
            .map(|(i, _)| i)
            .collect();

        // Safety: one toolCallKey must map to one prune_hash. A mismatch
        // means keys were derived inconsistently; do nothing.
        let mut hashes: HashSet<&str> = idxs
            .iter()
            .filter_map(|&i| inner.messages[i].meta.prune_hash.as_deref())
            .collect();
        if let Some(h) = incoming_hash {
            hashes.insert(h);
        }
        if hashes.len() > 1 {
            tracing::warn!(tool_call_key = key, "conflicting prune hashes; skipping prune");
            return;
        }

        let keep_from_history = self.cfg.prune_keep_occurrences.saturating_sub(1);
        if idxs.len() <= keep_from_history {
            return;
        }

        let mut blanked = 0usize;
        for &i in &idxs[..idxs.len() - keep_from_history] {
            blank(&mut inner.messages[i], "superseded occurrence");
            blanked += 1;
            // The adjacent user result shares the occurrence.
            let hash = inner.messages[i].meta.prune_hash.clone();
            if let Some(next) = inner.messages.get_mut(i + 1) {
                if next.role == Role::User && !next.meta.pruned && next.meta.prune_hash == hash {
                    blank(next, "superseded occurrence");
                    blanked += 1;
                }
            }
        }

        TraceEvent::MemoryGroupPruned {
            tool_call_key: key.to_owned(),
            blanked,
        }
        .emit();
    }

    /// Drop whole contiguous prune-hash groups, oldest first, once the
    /// character budget is exceeded. Groups are never split.
    fn prune_char_budget(&self, inner: &mut Inner, incoming_cost: usize) {
        let budget = self.cfg.prune_max_chars;
        if budget == 0 {
            return;
        }

        // Contiguous messages sharing a prune_hash form one group;
        // everything else is a singleton.
        let mut groups: Vec<(usize, usize)> = Vec::new(); // [start, end)
        let msgs = &inner.messages;
        let mut i = 0;
        while i < msgs.len() {
            let hash = msgs[i].meta.prune_hash.clone();
            let mut j = i + 1;
            if hash.is_some() {
                while j < msgs.len() && msgs[j].meta.prune_hash == hash {
                    j += 1;
                }
            }
            groups.push((i, j));
            i = j;
        }

        let mut cumulative = incoming_cost;
        let mut cutoff: Option<usize> = None; // group index; this and older are dropped
        for (gi, (start, end)) in groups.iter().enumerate().rev() {
            let cost: usize = inner.messages[*start..*end]
                .iter()
                .filter(|m| !m.meta.pruned)
                .map(estimate_cost)
                .sum();
            cumulative += cost;
            if cumulative > budget {
                cutoff = Some(gi);
                break;
            }
        }

        let Some(cutoff) = cutoff else {
            return;
        };

        let mut dropped_groups = 0usize;
        for (start, end) in &groups[..=cutoff] {
            let mut any = false;
            for msg in &mut inner.messages[*start..*end] {
                if !msg.meta.pruned {
                    blank(msg, "char budget exceeded");
                    any = true;
                }
            }
            if any {
                dropped_groups += 1;
            }
        }

        let kept_chars: usize = inner
            .messages
            .iter()
            .filter(|m| !m.meta.pruned)
            .map(estimate_cost)
            .sum();
        TraceEvent::MemoryBudgetPruned {
            dropped_groups,
            kept_chars,
        }
        .emit();
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Removal operations
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Remove the most recent assistant message.
    pub fn remove_last_assistant_message(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        let idx = inner
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant);
        match idx {
            Some(i) => {
                inner.messages.remove(i);
                self.persist(&inner)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove and return the last message.
    pub fn pop_last_message(&self) -> Result<Option<Message>> {
        let mut inner = self.inner.lock();
        let msg = inner.messages.pop();
        if msg.is_some() {
            self.persist(&inner)?;
        }
        Ok(msg)
    }

    /// Remove every message matching the predicate; returns the count.
    pub fn remove_messages_where(&self, pred: impl Fn(&Message) -> bool) -> Result<usize> {
        let mut inner = self.inner.lock();
        let before = inner.messages.len();
        inner.messages.retain(|m| !pred(m));
        let removed = before - inner.messages.len();
        if removed > 0 {
            self.persist(&inner)?;
        }
        Ok(removed)
    }

    /// Purge an entire terminal run: the result message, any related
    /// error feedback, and the immediately preceding assistant call.
    /// The run id is matched from meta or from the
    /// `[terminal_run_id:<id>]` content marker.
    pub fn purge_terminal_run(&self, run_id: &str) -> Result<usize> {
        let marker = format!("[terminal_run_id:{run_id}]");
        let mut inner = self.inner.lock();

        let mut remove = vec![false; inner.messages.len()];
        for i in 0..inner.messages.len() {
            let m = &inner.messages[i];
            let hit =
                m.meta.run_id.as_deref() == Some(run_id) || m.content.contains(&marker);
            if !hit {
                continue;
            }
            remove[i] = true;
            if i > 0 {
                let prev = &inner.messages[i - 1];
                if prev.role == Role::Assistant && prev.action_type == "terminal_run" {
                    remove[i - 1] = true;
                }
            }
        }

        let mut keep_iter = remove.iter();
        inner.messages.retain(|_| !*keep_iter.next().unwrap());
        let removed = remove.iter().filter(|r| **r).count();
        if removed > 0 {
            self.persist(&inner)?;
            TraceEvent::TerminalRunPurged {
                run_id: run_id.to_owned(),
                removed,
            }
            .emit();
        }
        Ok(removed)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Memorized content
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Concatenated summary of memorized messages: the compact
    /// `action_memory` rendering when present, else `TYPE: content`.
    pub fn memorized_content(&self) -> String {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for msg in &inner.messages {
            if !msg.memorized || msg.meta.pruned {
                continue;
            }
            match &msg.meta.action_memory {
                Some(mem) if !mem.is_empty() => out.push(mem.clone()),
                _ => {
                    if !msg.content.is_empty() {
                        let label = if msg.action_type.is_empty() {
                            "NOTE".to_owned()
                        } else {
                            msg.action_type.to_uppercase()
                        };
                        out.push(format!("{label}: {}", msg.content));
                    }
                }
            }
        }
        sanitize::sanitize(&out.join("\n"))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Persistence
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn persist(&self, inner: &Inner) -> Result<()> {
        let json = serde_json::to_string_pretty(&inner.messages)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::Io)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Message cost used by the character budget.
pub fn estimate_cost(msg: &Message) -> usize {
    msg.content.len()
        + msg.action_type.len()
        + msg
            .meta
            .action_memory
            .as_ref()
            .map(|m| m.len())
            .unwrap_or(0)
}

fn blank(msg: &mut Message, reason: &str) {
    msg.content.clear();
    msg.memorized = false;
    msg.meta.action_memory = None;
    for key in HEAVY_META_KEYS {
        msg.meta.extra.remove(*key);
    }
    if let Some(action) = msg.meta.action.as_mut() {
        for key in HEAVY_PARAM_KEYS {
            action.params.remove(*key);
        }
    }
    msg.meta.pruned = true;
    msg.meta.pruned_reason = Some(reason.to_owned());
}

fn resolve_action_type(explicit: Option<&str>, meta: &MessageMeta, content: &str) -> String {
    if let Some(t) = explicit {
        if !t.is_empty() {
            return t.to_owned();
        }
    }
    if let Some(action) = &meta.action {
        return action.kind.as_str().to_owned();
    }
    detect_action_type(content).unwrap_or_default()
}

/// Detect a tool name from an XML opener at the start of content,
/// after stripping a leading `<think>…</think>` section.
fn detect_action_type(content: &str) -> Option<String> {
    let mut text = content.trim_start();
    if let Some(rest) = text.strip_prefix("<think>") {
        match rest.find("</think>") {
            Some(close) => text = rest[close + "</think>".len()..].trim_start(),
            None => return None,
        }
    }
    let rest = text.strip_prefix('<')?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    ca_domain::action::ActionKind::from_name(&name).map(|k| k.as_str().to_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ca_domain::action::{Action, ActionKind};
    use tempfile::TempDir;

    fn memory_with(dir: &TempDir, cfg_mod: impl FnOnce(&mut MemoryConfig)) -> Memory {
        let mut cfg = MemoryConfig {
            dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        cfg_mod(&mut cfg);
        Memory::open(&cfg, "conv-123456789", "task1").unwrap()
    }

    fn memory(dir: &TempDir) -> Memory {
        memory_with(dir, |_| {})
    }

    fn write_code_meta(path: &str) -> MessageMeta {
        MessageMeta {
            action: Some(
                Action::new(ActionKind::WriteCode)
                    .with_param("path", path)
                    .with_param("content", "x = 1\n"),
            ),
            ..Default::default()
        }
    }

    fn append_call_and_result(mem: &Memory, path: &str, body: &str) {
        mem.add_message(
            Role::Assistant,
            &format!("<write_code><path>{path}</path><content><![CDATA[{body}]]></content></write_code>"),
            Some("write_code"),
            false,
            write_code_meta(path),
        )
        .unwrap();
        mem.add_message(Role::User, &format!("wrote {path}"), None, true, MessageMeta::default())
            .unwrap();
    }

    #[test]
    fn append_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        {
            let mem = memory(&dir);
            mem.add_message(Role::User, "hello", None, false, MessageMeta::default())
                .unwrap();
            mem.add_message(Role::Assistant, "hi there", None, false, MessageMeta::default())
                .unwrap();
        }
        let cfg = MemoryConfig {
            dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mem = Memory::open(&cfg, "conv-123456789", "task1").unwrap();
        let msgs = mem.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(msgs[1].role, Role::Assistant);
    }

    #[test]
    fn result_inherits_prune_hash_of_call() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        append_call_and_result(&mem, "a.py", "1");
        let msgs = mem.messages();
        assert!(msgs[0].meta.tool_call_key.is_some());
        assert_eq!(msgs[0].meta.prune_hash, msgs[1].meta.prune_hash);
        // toolCallKey only on the assistant call.
        assert!(msgs[1].meta.tool_call_key.is_none());
    }

    #[test]
    fn occurrence_pruning_keeps_three_total() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        for i in 0..3 {
            append_call_and_result(&mem, "a.py", &format!("body {i}"));
        }
        // Three occurrences: all kept.
        let kept: Vec<_> = mem
            .messages()
            .into_iter()
            .filter(|m| m.meta.tool_call_key.is_some() && !m.meta.pruned)
            .collect();
        assert_eq!(kept.len(), 3);

        // Fourth occurrence blanks the oldest call AND its result.
        append_call_and_result(&mem, "a.py", "body 3");
        let msgs = mem.messages();
        let pruned: Vec<_> = msgs.iter().filter(|m| m.meta.pruned).collect();
        assert_eq!(pruned.len(), 2, "oldest call + its result blanked");
        assert!(msgs[0].meta.pruned && msgs[0].content.is_empty());
        assert!(msgs[1].meta.pruned && msgs[1].content.is_empty());
        assert!(!msgs[0].memorized && !msgs[1].memorized);
        // Indices preserved: still 8 messages.
        assert_eq!(msgs.len(), 8);
        // Non-pruned occurrences ≤ 3.
        let live_calls = msgs
            .iter()
            .filter(|m| m.meta.tool_call_key.is_some() && !m.meta.pruned)
            .count();
        assert_eq!(live_calls, 3);
    }

    #[test]
    fn blanking_clears_heavy_action_params() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        for i in 0..4 {
            append_call_and_result(&mem, "a.py", &format!("body {i}"));
        }
        let msgs = mem.messages();
        let blanked_action = msgs[0].meta.action.as_ref().unwrap();
        assert!(blanked_action.params.get("content").is_none());
        assert!(blanked_action.params.get("path").is_some(), "identity params kept");
        assert_eq!(msgs[0].meta.pruned_reason.as_deref(), Some("superseded occurrence"));
    }

    #[test]
    fn different_paths_prune_independently() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        for i in 0..4 {
            append_call_and_result(&mem, &format!("file{i}.py"), "x");
        }
        assert!(mem.messages().iter().all(|m| !m.meta.pruned));
    }

    #[test]
    fn repeat_detection_replaces_acknowledged() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        let output = "<information><message><![CDATA[working on it]]></message></information>";

        mem.add_message(Role::Assistant, output, None, false, MessageMeta::default())
            .unwrap();
        mem.add_message(Role::User, "Acknowledged.", None, false, MessageMeta::default())
            .unwrap();
        mem.add_message(Role::Assistant, output, None, false, MessageMeta::default())
            .unwrap();
        // The runtime acknowledges again; the ack is replaced by the error.
        mem.add_message(Role::User, "Acknowledged.", None, false, MessageMeta::default())
            .unwrap();

        let msgs = mem.messages();
        assert_eq!(msgs.len(), 4);
        assert!(msgs[3].content.starts_with("ERROR: repeated assistant output"));
    }

    #[test]
    fn repeat_error_prepended_before_assistant_when_no_ack() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        mem.add_message(Role::Assistant, "same thing", None, false, MessageMeta::default())
            .unwrap();
        mem.add_message(Role::User, "result", None, false, MessageMeta::default())
            .unwrap();
        mem.add_message(Role::Assistant, "same thing", None, false, MessageMeta::default())
            .unwrap();
        // No ack follows; the next assistant append gets the error first.
        mem.add_message(Role::Assistant, "third try", None, false, MessageMeta::default())
            .unwrap();

        let msgs = mem.messages();
        let error_idx = msgs
            .iter()
            .position(|m| m.content.starts_with("ERROR: repeated assistant output"))
            .expect("error injected");
        assert_eq!(msgs[error_idx].role, Role::User);
        assert_eq!(msgs[error_idx + 1].content, "third try");
    }

    #[test]
    fn repeat_window_is_two() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        // Three distinct messages push the first out of the window.
        for text in ["alpha", "beta", "gamma"] {
            mem.add_message(Role::Assistant, text, None, false, MessageMeta::default())
                .unwrap();
            mem.add_message(Role::User, &format!("ok {text}"), None, false, MessageMeta::default())
                .unwrap();
        }
        // "alpha" again: outside the window of 2, so no error pending.
        mem.add_message(Role::Assistant, "alpha", None, false, MessageMeta::default())
            .unwrap();
        mem.add_message(Role::User, "Acknowledged.", None, false, MessageMeta::default())
            .unwrap();
        let msgs = mem.messages();
        assert_eq!(msgs.last().unwrap().content, "Acknowledged.");
    }

    #[test]
    fn adjacent_duplicates_dropped() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        mem.add_message(Role::User, "same", None, false, MessageMeta::default())
            .unwrap();
        mem.add_message(Role::User, "same", None, false, MessageMeta::default())
            .unwrap();
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn char_budget_drops_whole_old_groups() {
        let dir = TempDir::new().unwrap();
        let mem = memory_with(&dir, |cfg| cfg.prune_max_chars = 1000);

        for i in 0..10 {
            let body = format!("{i:01}{}", "x".repeat(299));
            let meta = MessageMeta {
                prune_hash: Some(keys::sha1_16(&format!("group{i}"))),
                ..Default::default()
            };
            mem.add_message(Role::User, &body, None, false, meta).unwrap();
        }

        let msgs = mem.messages();
        assert_eq!(msgs.len(), 10, "indices preserved");
        let live: Vec<_> = msgs.iter().filter(|m| !m.meta.pruned).collect();
        let total: usize = live.iter().map(|m| estimate_cost(m)).sum();
        assert!(total <= 1000, "kept cost {total} within budget");
        // Only the newest messages survive, contiguously from the end.
        let first_live = msgs.iter().position(|m| !m.meta.pruned).unwrap();
        assert!(msgs[first_live..].iter().all(|m| !m.meta.pruned));
        assert!(msgs[..first_live].iter().all(|m| m.meta.pruned));
    }

    #[test]
    fn char_budget_never_splits_group() {
        let dir = TempDir::new().unwrap();
        let mem = memory_with(&dir, |cfg| cfg.prune_max_chars = 500);
        let shared = keys::sha1_16("one-group");

        // A contiguous 2-message group (cost 300), then two singletons.
        for i in 0..2 {
            let meta = MessageMeta {
                prune_hash: Some(shared.clone()),
                ..Default::default()
            };
            mem.add_message(Role::User, &format!("{i}{}", "y".repeat(149)), None, false, meta)
                .unwrap();
        }
        mem.add_message(
            Role::User,
            &"b".repeat(150),
            None,
            false,
            MessageMeta {
                prune_hash: Some(keys::sha1_16("b")),
                ..Default::default()
            },
        )
        .unwrap();
        // This append pushes the total to 600 > 500: the 2-message group
        // must be dropped whole; partial trimming would have kept one.
        mem.add_message(
            Role::User,
            &"c".repeat(150),
            None,
            false,
            MessageMeta {
                prune_hash: Some(keys::sha1_16("c")),
                ..Default::default()
            },
        )
        .unwrap();

        let msgs = mem.messages();
        assert!(msgs[0].meta.pruned && msgs[1].meta.pruned, "group dropped whole");
        assert!(!msgs[2].meta.pruned && !msgs[3].meta.pruned);
    }

    #[test]
    fn zero_budget_disables_cap() {
        let dir = TempDir::new().unwrap();
        let mem = memory_with(&dir, |cfg| cfg.prune_max_chars = 0);
        for _ in 0..5 {
            mem.add_message(Role::User, &"z".repeat(5000), None, false, MessageMeta::default())
                .ok();
        }
        // Adjacent duplicates collapse, but nothing is pruned.
        assert!(mem.messages().iter().all(|m| !m.meta.pruned));
    }

    #[test]
    fn content_sanitized_on_append() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        mem.add_message(
            Role::User,
            "saved to /srv/workspace/user_3/Conversation_abc1/out.txt",
            None,
            false,
            MessageMeta::default(),
        )
        .unwrap();
        let msgs = mem.messages();
        assert!(!msgs[0].content.contains("Conversation_"));
        assert!(msgs[0].content.contains("out.txt"));
    }

    #[test]
    fn action_type_detected_from_xml_opener() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        mem.add_message(
            Role::Assistant,
            "<think>let me read it</think><read_file><path>a.txt</path></read_file>",
            None,
            false,
            MessageMeta::default(),
        )
        .unwrap();
        assert_eq!(mem.messages()[0].action_type, "read_file");
    }

    #[test]
    fn information_gets_content_hash() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        mem.add_message(
            Role::Assistant,
            "<information><message><![CDATA[status update]]></message></information>",
            None,
            false,
            MessageMeta::default(),
        )
        .unwrap();
        let msgs = mem.messages();
        assert!(msgs[0].meta.prune_hash.is_some());
        assert!(msgs[0].meta.tool_call_key.is_none());
    }

    #[test]
    fn purge_terminal_run_removes_call_result_and_feedback() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        let run_id = "abc123def456";

        mem.add_message(
            Role::Assistant,
            "<terminal_run><command>python</command><args>x.py</args></terminal_run>",
            Some("terminal_run"),
            false,
            MessageMeta {
                action: Some(
                    Action::new(ActionKind::TerminalRun)
                        .with_param("command", "python")
                        .with_param("args", "x.py"),
                ),
                ..Default::default()
            },
        )
        .unwrap();
        mem.add_message(
            Role::User,
            &format!("Traceback: boom [terminal_run_id:{run_id}]"),
            None,
            false,
            MessageMeta {
                run_id: Some(run_id.to_owned()),
                ..Default::default()
            },
        )
        .unwrap();
        mem.add_message(
            Role::User,
            &format!("reflection: the run failed [terminal_run_id:{run_id}]"),
            None,
            false,
            MessageMeta::default(),
        )
        .unwrap();
        mem.add_message(Role::User, "unrelated", None, false, MessageMeta::default())
            .unwrap();

        let removed = mem.purge_terminal_run(run_id).unwrap();
        assert_eq!(removed, 3);
        let msgs = mem.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "unrelated");
    }

    #[test]
    fn remove_last_assistant_and_pop() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        mem.add_message(Role::User, "u1", None, false, MessageMeta::default())
            .unwrap();
        mem.add_message(Role::Assistant, "a1", None, false, MessageMeta::default())
            .unwrap();
        mem.add_message(Role::User, "u2", None, false, MessageMeta::default())
            .unwrap();

        assert!(mem.remove_last_assistant_message().unwrap());
        assert_eq!(mem.len(), 2);
        let popped = mem.pop_last_message().unwrap().unwrap();
        assert_eq!(popped.content, "u2");
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn memorized_content_uses_action_memory_or_synthesizes() {
        let dir = TempDir::new().unwrap();
        let mem = memory(&dir);
        mem.add_message(
            Role::User,
            "raw result text",
            Some("terminal_run"),
            true,
            MessageMeta {
                action_memory: Some("<terminal_run cmd=\"ls\">ok</terminal_run>".into()),
                ..Default::default()
            },
        )
        .unwrap();
        mem.add_message(Role::User, "plain note", Some("read_file"), true, MessageMeta::default())
            .unwrap();
        mem.add_message(Role::User, "not memorized", None, false, MessageMeta::default())
            .unwrap();

        let content = mem.memorized_content();
        assert!(content.contains("<terminal_run cmd=\"ls\">ok</terminal_run>"));
        assert!(content.contains("READ_FILE: plain note"));
        assert!(!content.contains("not memorized"));
    }
}
