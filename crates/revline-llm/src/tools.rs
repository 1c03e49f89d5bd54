//! Tool system for the voice agent.
//!
//! Defines the `VoiceTool` trait all dealership tools implement, the
//! canonical result envelope handlers return, and a registry that converts
//! registered tools into the request's schema list.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Canonical envelope every tool handler returns. Handlers never raise into
/// the generate loop; failures travel as `success: false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn ok_with_message(data: serde_json::Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: Some(message.into()),
        }
    }

    pub fn fail(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: Some(message.into()),
        }
    }

    /// Serialized form appended to history as the tool turn's content.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"serialization_failed"}"#.to_string()
        })
    }
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Trait every tool implements. Handlers receive the parsed argument object
/// and must return the envelope on every path.
#[async_trait]
pub trait VoiceTool: Send + Sync {
    /// Unique name for this tool (e.g. "book_appointment").
    fn name(&self) -> &str;
    /// Description surfaced to the model.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> serde_json::Value;
    /// Execute with the given arguments.
    async fn execute(&self, args: serde_json::Value) -> ToolOutcome;
}

/// Name → handler table the generate loop dispatches through.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn VoiceTool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn VoiceTool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VoiceTool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schema list for the request, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl VoiceTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: serde_json::Value) -> ToolOutcome {
            match args.get("text").and_then(|v| v.as_str()) {
                Some(text) => ToolOutcome::ok(serde_json::json!({ "text": text })),
                None => ToolOutcome::fail("missing_argument", "'text' is required"),
            }
        }
    }

    #[test]
    fn envelope_omits_absent_fields() {
        let ok = ToolOutcome::ok(serde_json::json!({"id": 1}));
        let json = ok.to_json();
        assert!(json.contains(r#""success":true"#));
        assert!(!json.contains("error"));
        assert!(!json.contains("message"));

        let fail = ToolOutcome::fail("not_found", "No such appointment");
        let json = fail.to_json();
        assert!(json.contains(r#""success":false"#));
        assert!(json.contains("not_found"));
        assert!(!json.contains("data"));
    }

    #[tokio::test]
    async fn registry_dispatches_and_lists_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");

        let tool = registry.get("echo").unwrap();
        let out = tool
            .execute(serde_json::json!({"text": "hello"}))
            .await;
        assert!(out.success);

        let missing = tool.execute(serde_json::json!({})).await;
        assert!(!missing.success);
    }
}
