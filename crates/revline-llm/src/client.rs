use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{LlmError, Result};
use crate::history::{History, TokenUsage, ToolCallPayload};
use crate::provider::{ChatProvider, StepEvent, StepRequest};
use crate::stream::LlmEvent;
use crate::tools::{ToolRegistry, VoiceTool};

/// Hard cap on inline tool-execution rounds within a single user turn.
pub const MAX_TOOL_DEPTH: usize = 5;

/// Spoken when generation dies mid-turn so the caller hears something.
/// The orchestrator synthesizes this same text, so what the caller hears
/// matches what history records.
pub const APOLOGY: &str =
    "I'm sorry, I'm having a little trouble with that right now. Could you try again?";

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Per-call streaming chat client: rolling history, registered tools, and
/// the generate loop. Owned by one call's turn task; never shared across
/// calls.
pub struct ChatClient {
    provider: Arc<dyn ChatProvider>,
    config: ChatConfig,
    history: History,
    tools: ToolRegistry,
    usage: TokenUsage,
}

impl ChatClient {
    pub fn new(provider: Arc<dyn ChatProvider>, config: ChatConfig) -> Self {
        Self {
            provider,
            config,
            history: History::new(),
            tools: ToolRegistry::new(),
            usage: TokenUsage::default(),
        }
    }

    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        self.history.set_system_prompt(text);
    }

    pub fn add_user(&mut self, text: impl Into<String>) {
        self.history.add_user(text);
    }

    pub fn add_assistant(&mut self, text: impl Into<String>) {
        self.history.add_assistant(text);
    }

    pub fn register_tool(&mut self, tool: Arc<dyn VoiceTool>) {
        self.tools.register(tool);
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn clear(&mut self, keep_system: bool) {
        self.history.clear(keep_system);
    }

    pub fn trim(&mut self, max_messages: usize, keep_system: bool) {
        self.history.trim(max_messages, keep_system);
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.usage
    }

    /// Generate the assistant response for the current history, streaming
    /// events into `tx`. Tool calls execute inline and sequentially; the
    /// loop re-enters with the augmented history until the model stops or
    /// the depth cap trips. Always emits a terminal `Done` or `Error`.
    pub async fn generate(&mut self, tx: &mpsc::Sender<LlmEvent>) -> Result<()> {
        // depth resets here and only here — recursion below carries depth+1
        self.generate_step(tx, 0).await
    }

    fn generate_step<'a>(
        &'a mut self,
        tx: &'a mpsc::Sender<LlmEvent>,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let req = StepRequest {
                model: self.config.model.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
                messages: self.history.to_wire(),
                tools: self.tools.definitions(),
            };

            let (step_tx, mut step_rx) = mpsc::channel::<StepEvent>(64);
            let provider = Arc::clone(&self.provider);
            let driver = tokio::spawn(async move { provider.stream_step(&req, step_tx).await });

            let mut assistant_text = String::new();
            let mut tool_calls: Vec<ToolCallPayload> = Vec::new();
            let mut finish_reason = String::new();
            let mut step_usage = (0u32, 0u32);
            let mut errored = false;

            while let Some(event) = step_rx.recv().await {
                match event {
                    StepEvent::ContentDelta { text } => {
                        assistant_text.push_str(&text);
                        if tx
                            .send(LlmEvent::ContentDelta { text })
                            .await
                            .is_err()
                        {
                            driver.abort();
                            return Err(LlmError::ChannelClosed);
                        }
                    }
                    StepEvent::ToolCall {
                        id,
                        name,
                        arguments,
                    } => {
                        if tx
                            .send(LlmEvent::ToolCall {
                                id: id.clone(),
                                name: name.clone(),
                                arguments: arguments.clone(),
                            })
                            .await
                            .is_err()
                        {
                            driver.abort();
                            return Err(LlmError::ChannelClosed);
                        }
                        tool_calls.push(ToolCallPayload {
                            id,
                            name,
                            arguments,
                        });
                    }
                    StepEvent::Error { message } => {
                        warn!(depth, %message, "model step error");
                        let _ = tx.send(LlmEvent::Error { message }).await;
                        errored = true;
                    }
                    StepEvent::Done {
                        finish_reason: reason,
                        tokens_in,
                        tokens_out,
                    } => {
                        finish_reason = reason;
                        step_usage = (tokens_in, tokens_out);
                    }
                }
            }

            // channel closed: surface transport errors that happened before
            // any event could be emitted
            match driver.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(depth, error = %e, "provider transport error");
                    let _ = tx
                        .send(LlmEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    errored = true;
                }
                Err(join_err) => {
                    warn!(depth, error = %join_err, "provider task failed");
                    let _ = tx
                        .send(LlmEvent::Error {
                            message: join_err.to_string(),
                        })
                        .await;
                    errored = true;
                }
            }

            if errored {
                self.history.add_assistant(APOLOGY);
                let _ = tx
                    .send(LlmEvent::Done {
                        finish_reason: "error".to_string(),
                        tokens_in: step_usage.0,
                        tokens_out: step_usage.1,
                    })
                    .await;
                return Ok(());
            }

            self.usage.add(step_usage.0, step_usage.1);

            if finish_reason == "tool_calls" && !tool_calls.is_empty() {
                if depth >= MAX_TOOL_DEPTH {
                    warn!(depth, cap = MAX_TOOL_DEPTH, "tool recursion cap reached");
                    let _ = tx
                        .send(LlmEvent::Error {
                            message: format!(
                                "tool recursion cap of {MAX_TOOL_DEPTH} reached, abandoning tool calls"
                            ),
                        })
                        .await;
                    self.history.add_assistant(APOLOGY);
                    let _ = tx
                        .send(LlmEvent::Done {
                            finish_reason: "error".to_string(),
                            tokens_in: step_usage.0,
                            tokens_out: step_usage.1,
                        })
                        .await;
                    return Ok(());
                }

                // assistant turn enumerating the calls, then one tool turn
                // per call, in order
                let content = if assistant_text.is_empty() {
                    None
                } else {
                    Some(assistant_text.clone())
                };
                self.history.add_tool_call_turn(content, tool_calls.clone());

                for call in &tool_calls {
                    let outcome = self.execute_tool(call).await;
                    let result_json = outcome.to_json();
                    self.history.add_tool_result(call.id.as_str(), result_json.as_str());
                    if tx
                        .send(LlmEvent::ToolResult {
                            id: call.id.clone(),
                            result: result_json,
                        })
                        .await
                        .is_err()
                    {
                        return Err(LlmError::ChannelClosed);
                    }
                }

                debug!(depth, calls = tool_calls.len(), "re-entering generation after tools");
                return self.generate_step(tx, depth + 1).await;
            }

            // finish_reason stop / length / content_filter: the turn is done.
            // length yields a truncated assistant turn with no recursion.
            if !assistant_text.is_empty() {
                self.history.add_assistant(assistant_text.as_str());
            }
            info!(
                depth,
                finish_reason = %finish_reason,
                chars = assistant_text.len(),
                "assistant turn complete"
            );
            let _ = tx
                .send(LlmEvent::Done {
                    finish_reason,
                    tokens_in: step_usage.0,
                    tokens_out: step_usage.1,
                })
                .await;
            Ok(())
        })
    }

    async fn execute_tool(&self, call: &ToolCallPayload) -> crate::tools::ToolOutcome {
        let args: serde_json::Value =
            serde_json::from_str(&call.arguments).unwrap_or(serde_json::json!({}));

        match self.tools.get(&call.name) {
            Some(tool) => {
                debug!(tool = %call.name, "executing tool");
                tool.execute(args).await
            }
            None => crate::tools::ToolOutcome::fail(
                "unknown_tool",
                format!("no tool named '{}' is registered", call.name),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Role;
    use crate::tools::{ToolOutcome, VoiceTool};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted provider: each stream_step pops the next event list.
    struct ScriptedProvider {
        steps: Mutex<Vec<Vec<StepEvent>>>,
    }

    impl ScriptedProvider {
        fn new(steps: Vec<Vec<StepEvent>>) -> Self {
            Self {
                steps: Mutex::new(steps),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream_step(
            &self,
            _req: &StepRequest,
            tx: mpsc::Sender<StepEvent>,
        ) -> std::result::Result<(), LlmError> {
            let step = {
                let mut steps = self.steps.lock().unwrap();
                if steps.is_empty() {
                    vec![StepEvent::Done {
                        finish_reason: "stop".to_string(),
                        tokens_in: 0,
                        tokens_out: 0,
                    }]
                } else {
                    steps.remove(0)
                }
            };
            for event in step {
                let _ = tx.send(event).await;
            }
            Ok(())
        }
    }

    /// Provider that always wants another tool call — drives the depth cap.
    struct AlwaysToolProvider;

    #[async_trait]
    impl ChatProvider for AlwaysToolProvider {
        fn name(&self) -> &str {
            "always-tool"
        }

        async fn stream_step(
            &self,
            _req: &StepRequest,
            tx: mpsc::Sender<StepEvent>,
        ) -> std::result::Result<(), LlmError> {
            let _ = tx
                .send(StepEvent::ToolCall {
                    id: "call_loop".to_string(),
                    name: "noop".to_string(),
                    arguments: "{}".to_string(),
                })
                .await;
            let _ = tx
                .send(StepEvent::Done {
                    finish_reason: "tool_calls".to_string(),
                    tokens_in: 10,
                    tokens_out: 5,
                })
                .await;
            Ok(())
        }
    }

    struct NoopTool;

    #[async_trait]
    impl VoiceTool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: serde_json::Value) -> ToolOutcome {
            ToolOutcome::ok(serde_json::json!({}))
        }
    }

    fn client_with(provider: Arc<dyn ChatProvider>) -> ChatClient {
        let mut client = ChatClient::new(
            provider,
            ChatConfig {
                model: "test-model".to_string(),
                temperature: 0.8,
                max_tokens: 1000,
            },
        );
        client.set_system_prompt("persona");
        client
    }

    async fn drain(client: &mut ChatClient) -> Vec<LlmEvent> {
        let (tx, mut rx) = mpsc::channel(256);
        client.generate(&tx).await.unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn plain_response_appends_one_assistant_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            StepEvent::ContentDelta {
                text: "Hello ".to_string(),
            },
            StepEvent::ContentDelta {
                text: "there!".to_string(),
            },
            StepEvent::Done {
                finish_reason: "stop".to_string(),
                tokens_in: 20,
                tokens_out: 4,
            },
        ]]));
        let mut client = client_with(provider);
        client.add_user("hi");

        let events = drain(&mut client).await;
        assert!(matches!(events.last(), Some(LlmEvent::Done { finish_reason, .. }) if finish_reason == "stop"));

        // exactly one assistant turn follows the user turn
        let assistants: Vec<_> = client
            .history()
            .turns()
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .collect();
        assert_eq!(assistants.len(), 1);
        assert_eq!(assistants[0].content.as_deref(), Some("Hello there!"));
        assert_eq!(client.token_usage().tokens_in, 20);
    }

    #[tokio::test]
    async fn tool_call_pairs_with_result_before_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                StepEvent::ToolCall {
                    id: "call_1".to_string(),
                    name: "noop".to_string(),
                    arguments: "{}".to_string(),
                },
                StepEvent::Done {
                    finish_reason: "tool_calls".to_string(),
                    tokens_in: 15,
                    tokens_out: 8,
                },
            ],
            vec![
                StepEvent::ContentDelta {
                    text: "All done.".to_string(),
                },
                StepEvent::Done {
                    finish_reason: "stop".to_string(),
                    tokens_in: 30,
                    tokens_out: 3,
                },
            ],
        ]));
        let mut client = client_with(provider);
        client.register_tool(Arc::new(NoopTool));
        client.add_user("do the thing");

        let events = drain(&mut client).await;

        // event order: ToolCall before its ToolResult, Done last
        let call_pos = events
            .iter()
            .position(|e| matches!(e, LlmEvent::ToolCall { .. }))
            .unwrap();
        let result_pos = events
            .iter()
            .position(|e| matches!(e, LlmEvent::ToolResult { .. }))
            .unwrap();
        assert!(call_pos < result_pos);

        // history: assistant(tool_calls) then tool(result) pairing by id
        let turns = client.history().turns();
        let call_idx = turns
            .iter()
            .position(|t| t.tool_calls.is_some())
            .unwrap();
        assert_eq!(turns[call_idx + 1].role, Role::Tool);
        assert_eq!(turns[call_idx + 1].tool_call_id.as_deref(), Some("call_1"));
        // final assistant reply present
        assert_eq!(
            turns.last().unwrap().content.as_deref(),
            Some("All done.")
        );
        // usage accumulated across both steps
        assert_eq!(client.token_usage().tokens_in, 45);
    }

    #[tokio::test]
    async fn depth_cap_emits_error_and_apology() {
        let mut client = client_with(Arc::new(AlwaysToolProvider));
        client.register_tool(Arc::new(NoopTool));
        client.add_user("loop forever");

        let events = drain(&mut client).await;

        let cap_error = events.iter().any(|e| {
            matches!(e, LlmEvent::Error { message } if message.contains("recursion cap"))
        });
        assert!(cap_error, "expected a cap error event");
        assert!(matches!(events.last(), Some(LlmEvent::Done { .. })));

        // apology appended as the closing assistant turn
        let last = client.history().turns().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.as_deref().unwrap().contains("sorry"));

        // tool rounds executed at depths 0..MAX_TOOL_DEPTH, then the cap
        let tool_turns = client
            .history()
            .turns()
            .iter()
            .filter(|t| t.role == Role::Tool)
            .count();
        assert_eq!(tool_turns, MAX_TOOL_DEPTH);
    }

    #[tokio::test]
    async fn length_finish_reports_done_without_recursion() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            StepEvent::ContentDelta {
                text: "Truncated answ".to_string(),
            },
            StepEvent::Done {
                finish_reason: "length".to_string(),
                tokens_in: 10,
                tokens_out: 1000,
            },
        ]]));
        let mut client = client_with(provider);
        client.add_user("write an essay");

        let events = drain(&mut client).await;
        assert!(matches!(
            events.last(),
            Some(LlmEvent::Done { finish_reason, .. }) if finish_reason == "length"
        ));
        let last = client.history().turns().last().unwrap();
        assert_eq!(last.content.as_deref(), Some("Truncated answ"));
    }

    #[tokio::test]
    async fn unknown_tool_returns_failed_envelope() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                StepEvent::ToolCall {
                    id: "call_x".to_string(),
                    name: "no_such_tool".to_string(),
                    arguments: "{}".to_string(),
                },
                StepEvent::Done {
                    finish_reason: "tool_calls".to_string(),
                    tokens_in: 0,
                    tokens_out: 0,
                },
            ],
            vec![StepEvent::Done {
                finish_reason: "stop".to_string(),
                tokens_in: 0,
                tokens_out: 0,
            }],
        ]));
        let mut client = client_with(provider);
        client.add_user("hi");

        let events = drain(&mut client).await;
        let result = events.iter().find_map(|e| match e {
            LlmEvent::ToolResult { result, .. } => Some(result.clone()),
            _ => None,
        });
        let result = result.unwrap();
        assert!(result.contains(r#""success":false"#));
        assert!(result.contains("unknown_tool"));
    }
}
