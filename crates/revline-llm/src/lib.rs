//! Streaming LLM client with tool calling.
//!
//! Owns the rolling conversation history, the registered tool schemas, and
//! the generate loop that executes tool handlers inline with bounded
//! recursion. Everything here mutates only in-memory state; persistence is
//! the orchestrator's concern.

pub mod client;
pub mod error;
pub mod history;
pub mod provider;
pub mod stream;
pub mod tools;

pub use client::{ChatClient, ChatConfig, APOLOGY, MAX_TOOL_DEPTH};
pub use error::{LlmError, Result};
pub use history::{ChatTurn, History, Role, TokenUsage, ToolCallPayload};
pub use provider::{ChatProvider, OpenAiProvider, StepEvent, StepRequest};
pub use stream::LlmEvent;
pub use tools::{ToolDefinition, ToolOutcome, ToolRegistry, VoiceTool};
