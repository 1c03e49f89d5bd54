use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call recorded on an assistant turn. Arguments stay JSON-encoded
/// exactly as the model produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallPayload>>,
}

impl ChatTurn {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub tokens_in: u32,
    pub tokens_out: u32,
}

impl TokenUsage {
    pub fn add(&mut self, tokens_in: u32, tokens_out: u32) {
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
    }
}

/// Ordered conversation history — the source of truth for what the model
/// sees. A tool_call turn and its matching tool results always appear in
/// order and pair by id.
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<ChatTurn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the single system turn at position 0.
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        let turn = ChatTurn::text(Role::System, text);
        match self.turns.first() {
            Some(first) if first.role == Role::System => self.turns[0] = turn,
            _ => self.turns.insert(0, turn),
        }
    }

    pub fn add_user(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn::text(Role::User, text));
    }

    pub fn add_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn::text(Role::Assistant, text));
    }

    /// Append an assistant turn that carries only tool calls (and any text
    /// the model produced alongside them).
    pub fn add_tool_call_turn(&mut self, content: Option<String>, calls: Vec<ToolCallPayload>) {
        self.turns.push(ChatTurn {
            role: Role::Assistant,
            content,
            tool_call_id: None,
            tool_calls: Some(calls),
        });
    }

    pub fn add_tool_result(&mut self, call_id: impl Into<String>, result_json: impl Into<String>) {
        self.turns.push(ChatTurn {
            role: Role::Tool,
            content: Some(result_json.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        });
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self, keep_system: bool) {
        if keep_system {
            self.turns.retain(|t| t.role == Role::System);
            self.turns.truncate(1);
        } else {
            self.turns.clear();
        }
    }

    /// Trim to at most `max_messages` turns. The system turn is pinned when
    /// `keep_system`; the cut point then advances past any tool turns so a
    /// result is never kept without the assistant turn that called it.
    pub fn trim(&mut self, max_messages: usize, keep_system: bool) {
        if self.turns.len() <= max_messages {
            return;
        }

        let system = if keep_system && self.turns.first().map(|t| t.role) == Some(Role::System) {
            Some(self.turns[0].clone())
        } else {
            None
        };

        let reserved = usize::from(system.is_some());
        let keep = max_messages.saturating_sub(reserved);
        let mut start = self.turns.len().saturating_sub(keep);

        // never start the window on an orphaned tool result
        while start < self.turns.len() && self.turns[start].role == Role::Tool {
            start += 1;
        }

        let mut trimmed: Vec<ChatTurn> = Vec::with_capacity(max_messages);
        if let Some(sys) = system {
            trimmed.push(sys);
        }
        trimmed.extend(self.turns[start..].iter().cloned());
        self.turns = trimmed;
    }

    /// Wire-format messages for the chat completions request.
    pub fn to_wire(&self) -> Vec<serde_json::Value> {
        self.turns
            .iter()
            .map(|turn| match turn.role {
                Role::Tool => serde_json::json!({
                    "role": "tool",
                    "tool_call_id": turn.tool_call_id,
                    "content": turn.content.as_deref().unwrap_or(""),
                }),
                Role::Assistant if turn.tool_calls.is_some() => {
                    let calls: Vec<serde_json::Value> = turn
                        .tool_calls
                        .as_ref()
                        .unwrap()
                        .iter()
                        .map(|c| {
                            serde_json::json!({
                                "id": c.id,
                                "type": "function",
                                "function": { "name": c.name, "arguments": c.arguments },
                            })
                        })
                        .collect();
                    serde_json::json!({
                        "role": "assistant",
                        "content": turn.content,
                        "tool_calls": calls,
                    })
                }
                role => serde_json::json!({
                    "role": role,
                    "content": turn.content.as_deref().unwrap_or(""),
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> History {
        let mut h = History::new();
        h.set_system_prompt("persona");
        h.add_user("hello");
        h.add_assistant("hi there");
        h
    }

    #[test]
    fn system_prompt_replaces_in_place() {
        let mut h = seeded();
        h.set_system_prompt("new persona");
        assert_eq!(h.len(), 3);
        assert_eq!(h.turns()[0].content.as_deref(), Some("new persona"));
        assert_eq!(h.turns()[0].role, Role::System);
    }

    #[test]
    fn tool_call_and_result_pair_in_order() {
        let mut h = seeded();
        h.add_tool_call_turn(
            None,
            vec![ToolCallPayload {
                id: "call_1".to_string(),
                name: "lookup_customer".to_string(),
                arguments: r#"{"phone":"+15551234567"}"#.to_string(),
            }],
        );
        h.add_tool_result("call_1", r#"{"success":true}"#);

        let wire = h.to_wire();
        let assistant = &wire[3];
        assert_eq!(assistant["tool_calls"][0]["id"], "call_1");
        let tool = &wire[4];
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
    }

    #[test]
    fn trim_keeps_system_and_never_orphans_tool_results() {
        let mut h = History::new();
        h.set_system_prompt("persona");
        for i in 0..6 {
            h.add_user(format!("msg {i}"));
            h.add_tool_call_turn(
                None,
                vec![ToolCallPayload {
                    id: format!("call_{i}"),
                    name: "t".to_string(),
                    arguments: "{}".to_string(),
                }],
            );
            h.add_tool_result(format!("call_{i}"), "{}");
            h.add_assistant(format!("reply {i}"));
        }

        h.trim(6, true);
        assert!(h.len() <= 6);
        assert_eq!(h.turns()[0].role, Role::System);

        // every kept tool turn must be preceded by an assistant turn
        // carrying its call id
        for (i, turn) in h.turns().iter().enumerate() {
            if turn.role == Role::Tool {
                let id = turn.tool_call_id.as_deref().unwrap();
                let paired = h.turns()[..i].iter().any(|t| {
                    t.tool_calls
                        .as_ref()
                        .map(|calls| calls.iter().any(|c| c.id == id))
                        .unwrap_or(false)
                });
                assert!(paired, "tool result {id} lost its call");
            }
        }
    }

    #[test]
    fn trim_noop_when_under_limit() {
        let mut h = seeded();
        h.trim(20, true);
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn clear_keeps_only_system() {
        let mut h = seeded();
        h.clear(true);
        assert_eq!(h.len(), 1);
        assert_eq!(h.turns()[0].role, Role::System);
    }
}
