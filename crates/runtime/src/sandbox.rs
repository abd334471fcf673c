//! Sandbox HTTP client — `POST /execute_action` against the runtime
//! server, with failure-shape normalization.
//!
//! The server owns path/cwd resolution inside its own workspace; this
//! client owns never returning an empty failure: when the response is
//! missing its payload, a diagnostic block is synthesized from the
//! request identity and the raw body.

use serde_json::Value;

use ca_domain::action::{Action, ActionResult, ActionStatus};
use ca_domain::error::{Error, Result};

pub struct SandboxClient {
    base_url: String,
    client: reqwest::Client,
}

impl SandboxClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    /// Execute an action remotely. Always returns a result; transport
    /// and shape errors become structured failures.
    pub async fn execute(&self, action: &Action, user_id: &str) -> ActionResult {
        let uuid = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/execute_action", self.base_url);
        let body = serde_json::json!({
            "action": action,
            "uuid": uuid,
            "user_id": user_id,
        });

        tracing::debug!(url = %url, action = %action.kind, %uuid, "sandbox dispatch");

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return transport_failure(action, &uuid, &e),
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return synthesized_failure(
                action,
                &uuid,
                &format!("sandbox returned HTTP {}", status.as_u16()),
                &text,
            );
        }

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                return synthesized_failure(
                    action,
                    &uuid,
                    &format!("sandbox response is not JSON: {e}"),
                    &text,
                )
            }
        };

        // The payload must be at `data`; its absence is a server bug we
        // surface loudly rather than treating as success.
        let Some(data) = parsed.get("data").filter(|d| !d.is_null()) else {
            return synthesized_failure(action, &uuid, "sandbox response missing 'data'", &text);
        };

        match serde_json::from_value::<ActionResult>(data.clone()) {
            Ok(mut result) => {
                if result.content.is_empty() && result.status == ActionStatus::Failure {
                    result.content =
                        diagnostic_block(action, &uuid, "sandbox failure with empty content", &text);
                }
                result
                    .meta
                    .entry("action_type".to_owned())
                    .or_insert_with(|| action.kind.as_str().into());
                result
            }
            Err(e) => synthesized_failure(
                action,
                &uuid,
                &format!("sandbox result has unexpected shape: {e}"),
                &text,
            ),
        }
    }
}

/// Extract io-level detail (code, syscall, address) from a transport
/// error's source chain.
fn transport_failure(action: &Action, uuid: &str, e: &reqwest::Error) -> ActionResult {
    use std::error::Error as _;

    let mut detail = e.to_string();
    let mut source: Option<&(dyn std::error::Error + 'static)> = e.source();
    while let Some(inner) = source {
        detail.push_str(&format!("; caused by: {inner}"));
        source = inner.source();
    }
    if let Some(status) = e.status() {
        detail.push_str(&format!("; status={status}"));
    }
    synthesized_failure(action, uuid, "sandbox unreachable", &detail)
}

fn synthesized_failure(action: &Action, uuid: &str, reason: &str, raw: &str) -> ActionResult {
    let content = diagnostic_block(action, uuid, reason, raw);
    let mut result = ActionResult::failure(content);
    result.error = Some(reason.to_owned());
    result
        .meta
        .insert("action_type".into(), action.kind.as_str().into());
    result
}

fn diagnostic_block(action: &Action, uuid: &str, reason: &str, raw: &str) -> String {
    let mut block = format!(
        "Sandbox execution failed: {reason}\nuuid: {uuid}\naction: {}\n",
        action.kind
    );
    for field in ["command", "args", "cwd", "path"] {
        if let Some(v) = action.str_param(field) {
            block.push_str(&format!("{field}: {v}\n"));
        }
    }
    let raw = raw.trim();
    if !raw.is_empty() {
        let shown: String = raw.chars().take(2000).collect();
        block.push_str(&format!("payload: {shown}\n"));
    }
    block
}
