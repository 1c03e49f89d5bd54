/// Events emitted by [`crate::ChatClient::generate`] for one user turn,
/// including any inline tool execution rounds.
#[derive(Debug, Clone)]
pub enum LlmEvent {
    /// Incremental assistant text.
    ContentDelta { text: String },

    /// The model requested a tool call (arguments are JSON-encoded).
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },

    /// A tool handler finished; result is the serialized envelope.
    ToolResult { id: String, result: String },

    /// Error during generation. The turn is over; the session continues.
    Error { message: String },

    /// Terminal event for the turn.
    Done {
        finish_reason: String,
        tokens_in: u32,
        tokens_out: u32,
    },
}

/// Parse a single SSE line from the chat completions stream.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}
