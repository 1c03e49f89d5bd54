use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::stream::{parse_sse_line, SseParsed};
use crate::tools::ToolDefinition;

/// One model step: everything the provider needs to produce the next
/// assistant message for the current history.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Wire-format messages (see `History::to_wire`).
    pub messages: Vec<serde_json::Value>,
    pub tools: Vec<ToolDefinition>,
}

/// Events for a single model step, in emission order: zero or more
/// `ContentDelta`s, then any complete `ToolCall`s, then `Done`.
#[derive(Debug, Clone)]
pub enum StepEvent {
    ContentDelta {
        text: String,
    },
    /// A complete tool request (arguments fully accumulated).
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    Error {
        message: String,
    },
    Done {
        finish_reason: String,
        tokens_in: u32,
        tokens_out: u32,
    },
}

/// A streaming chat backend. The HTTP implementation below is the real
/// one; tests drive the generate loop with scripted implementations.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Run one streaming step, emitting events through `tx`. Transport
    /// failures before any event may be returned as `Err`; failures midway
    /// are emitted as `StepEvent::Error`.
    async fn stream_step(
        &self,
        req: &StepRequest,
        tx: mpsc::Sender<StepEvent>,
    ) -> Result<(), LlmError>;
}

/// Chat-completions provider speaking the OpenAI-style streaming protocol
/// (SSE deltas, finish reasons `stop | tool_calls | length | content_filter`).
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    fn build_body(req: &StepRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": req.model,
            "messages": req.messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !req.tools.is_empty() {
            let tools: Vec<serde_json::Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tools);
        }

        body
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_step(
        &self,
        req: &StepRequest,
        tx: mpsc::Sender<StepEvent>,
    ) -> Result<(), LlmError> {
        let body = Self::build_body(req);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %req.model, messages = req.messages.len(), "sending streaming chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        process_chat_stream(resp, tx).await;
        Ok(())
    }
}

/// A tool call being assembled from streamed fragments. The API scatters
/// id/name/argument pieces across deltas, keyed by `index`.
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Parse the SSE stream and emit step events. Content deltas flow through
/// immediately; tool calls accumulate until the stream ends and are then
/// emitted in index order, followed by `Done`.
async fn process_chat_stream(resp: reqwest::Response, tx: mpsc::Sender<StepEvent>) {
    use futures_util::StreamExt;

    let mut tokens_in: u32 = 0;
    let mut tokens_out: u32 = 0;
    let mut finish_reason = String::new();
    let mut pending_tools: Vec<PendingToolCall> = Vec::new();
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StepEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                // end-of-stream sentinel
                if data.trim() == "[DONE]" {
                    break 'outer;
                }

                let chunk_resp: StreamChunk = match serde_json::from_str(&data) {
                    Ok(c) => c,
                    Err(_) => continue,
                };

                // usage arrives on the final chunk when requested
                if let Some(usage) = &chunk_resp.usage {
                    tokens_in = usage.prompt_tokens;
                    tokens_out = usage.completion_tokens;
                }

                for choice in &chunk_resp.choices {
                    if let Some(reason) = &choice.finish_reason {
                        if !reason.is_empty() {
                            finish_reason = reason.clone();
                        }
                    }

                    if let Some(content) = &choice.delta.content {
                        if !content.is_empty()
                            && tx
                                .send(StepEvent::ContentDelta {
                                    text: content.clone(),
                                })
                                .await
                                .is_err()
                        {
                            return; // receiver dropped (barge-in)
                        }
                    }

                    if let Some(calls) = &choice.delta.tool_calls {
                        for fragment in calls {
                            let index = fragment.index;
                            while pending_tools.len() <= index {
                                pending_tools.push(PendingToolCall::default());
                            }
                            let slot = &mut pending_tools[index];
                            if let Some(id) = &fragment.id {
                                slot.id = id.clone();
                            }
                            if let Some(function) = &fragment.function {
                                if let Some(name) = &function.name {
                                    slot.name.push_str(name);
                                }
                                if let Some(args) = &function.arguments {
                                    slot.arguments.push_str(args);
                                }
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    for call in pending_tools {
        if call.name.is_empty() {
            continue;
        }
        let arguments = if call.arguments.is_empty() {
            "{}".to_string()
        } else {
            call.arguments
        };
        if tx
            .send(StepEvent::ToolCall {
                id: call.id,
                name: call.name,
                arguments,
            })
            .await
            .is_err()
        {
            return;
        }
    }

    let _ = tx
        .send(StepEvent::Done {
            finish_reason,
            tokens_in,
            tokens_out,
        })
        .await;
}

// Streaming chunk types (deserialization only)

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
}

#[derive(Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_includes_tools_only_when_registered() {
        let req = StepRequest {
            model: "gpt-4o".to_string(),
            temperature: 0.8,
            max_tokens: 1000,
            messages: vec![serde_json::json!({"role": "user", "content": "hi"})],
            tools: vec![],
        };
        let body = OpenAiProvider::build_body(&req);
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], true);

        let req = StepRequest {
            tools: vec![ToolDefinition {
                name: "lookup_customer".to_string(),
                description: "Find a customer by phone".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            ..req
        };
        let body = OpenAiProvider::build_body(&req);
        assert_eq!(body["tools"][0]["function"]["name"], "lookup_customer");
    }

    #[test]
    fn tool_call_fragment_parses_partial_deltas() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"decode_vin","arguments":""}}]},"finish_reason":null}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_abc"));

        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"vin\":"}}]},"finish_reason":null}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert!(calls[0].id.is_none());
        assert_eq!(
            calls[0].function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"vin\":")
        );
    }
}
