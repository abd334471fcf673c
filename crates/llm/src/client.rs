//! The chat-completion client.
//!
//! Sends one streaming request and returns the accumulated text.
//! Incremental tokens reach the caller through a synchronous callback
//! in arrival order; reasoning that precedes any text is wrapped in
//! `<think>…</think>` and prepended.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ca_domain::cancel::CancelToken;
use ca_domain::config::LlmConfig;
use ca_domain::error::{Error, Result};
use ca_domain::stream::{BoxStream, StreamEvent};
use ca_domain::trace::TraceEvent;

use crate::quirks::auth_headers;
use crate::sse::SseDecoder;

/// Options forwarded to the server verbatim. Anything else is dropped.
pub const ALLOWED_OPTIONS: &[&str] = &[
    "temperature",
    "top_p",
    "max_tokens",
    "stop",
    "stream",
    "assistant_id",
    "response_format",
    "tools",
    "enable_thinking",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_owned(),
            content: content.into(),
        }
    }
}

/// One chat call: the current prompt, prior history, and pass-through
/// options (filtered by [`ALLOWED_OPTIONS`]).
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub prompt: String,
    pub history: Vec<ChatMessage>,
    pub options: Map<String, Value>,
}

pub struct LlmClient {
    cfg: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_sec))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { cfg, client })
    }

    /// Build the request body: `{model, messages, stream:true}` plus the
    /// allow-listed options.
    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut messages: Vec<Value> = req
            .history
            .iter()
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();
        messages.push(serde_json::json!({"role": "user", "content": req.prompt}));

        let mut body = serde_json::json!({
            "model": self.cfg.model,
            "messages": messages,
            "stream": true,
        });
        for (key, value) in &req.options {
            if ALLOWED_OPTIONS.contains(&key.as_str()) {
                body[key] = value.clone();
            }
        }
        body
    }

    async fn send(&self, req: &ChatRequest) -> Result<reqwest::Response> {
        let url = format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        );
        let body = self.build_body(req);

        tracing::debug!(url = %url, model = %self.cfg.model, "chat request");

        let mut builder = self.client.post(&url).json(&body);
        for (name, value) in auth_headers(&self.cfg.base_url, &self.cfg.api_key) {
            builder = builder.header(name, value);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Llm {
                provider: self.cfg.base_url.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), body),
            });
        }
        Ok(resp)
    }

    /// Stream decoded events. The cancel token is observed between
    /// chunk reads; on cancel the decoder is flushed and the stream ends
    /// with a `Done` (never an error).
    pub async fn chat_stream(
        &self,
        req: &ChatRequest,
        cancel: CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let mut response = self.send(req).await?;
        let delimiter = self.cfg.message_delimiter.clone();

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new(delimiter);

            loop {
                if cancel.is_cancelled() {
                    for event in decoder.finish() {
                        yield Ok(event);
                    }
                    yield Ok(StreamEvent::Done { finish_reason: Some("cancelled".into()) });
                    return;
                }

                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes);
                        for event in decoder.feed(&text) {
                            let done = matches!(event, StreamEvent::Done { .. });
                            yield Ok(event);
                            if done {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        for event in decoder.finish() {
                            yield Ok(event);
                        }
                        if !decoder.is_done() {
                            yield Ok(StreamEvent::Done { finish_reason: Some("stop".into()) });
                        }
                        return;
                    }
                    Err(e) => {
                        // Surface what we have rather than failing the
                        // whole call mid-stream.
                        tracing::warn!(error = %e, "stream read error; flushing partial");
                        for event in decoder.finish() {
                            yield Ok(event);
                        }
                        yield Ok(StreamEvent::Error { message: e.to_string() });
                        yield Ok(StreamEvent::Done { finish_reason: Some("error".into()) });
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Run one chat call to completion, invoking `on_token` for every
    /// incremental text chunk, and return the accumulated content.
    ///
    /// Reasoning arriving before any text is aggregated and prepended
    /// wrapped in `<think>…</think>`. Cancellation resolves with the
    /// partial accumulation. An empty final content resolves `Ok("")`
    /// after a diagnostic.
    pub async fn chat(
        &self,
        req: &ChatRequest,
        mut on_token: impl FnMut(&str),
        cancel: CancelToken,
    ) -> Result<String> {
        use futures_util::StreamExt;

        let started = std::time::Instant::now();
        let mut stream = self.chat_stream(req, cancel.clone()).await?;

        let mut text = String::new();
        let mut reasoning = String::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Thinking { text: t } => reasoning.push_str(&t),
                StreamEvent::Token { text: t } => {
                    if text.is_empty() && !reasoning.is_empty() {
                        let wrapped = format!("<think>{reasoning}</think>");
                        on_token(&wrapped);
                        text.push_str(&wrapped);
                        reasoning.clear();
                    }
                    on_token(&t);
                    text.push_str(&t);
                }
                StreamEvent::Error { message } => {
                    tracing::warn!(error = %message, "stream error; keeping partial content");
                }
                StreamEvent::Done { .. } => break,
            }
        }

        // Reasoning with no following text still counts as content.
        if text.is_empty() && !reasoning.is_empty() {
            text = format!("<think>{reasoning}</think>");
        }

        if text.is_empty() {
            tracing::warn!(model = %self.cfg.model, "chat resolved with empty content");
        }

        TraceEvent::LlmRequest {
            model: self.cfg.model.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            content_chars: text.len(),
            cancelled: cancel.is_cancelled(),
        }
        .emit();

        Ok(text)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
