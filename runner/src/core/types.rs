//! Conversation types shared by the session loop and the model transport.
//!
//! The serialized shape of [`Message`] and [`ContentBlock`] matches the
//! Messages API wire format, so history can be submitted as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Speaker,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Speaker::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Assistant turn: optional text followed by the proposed tool calls.
    pub fn assistant(text: &str, calls: &[ToolCall]) -> Self {
        let mut content = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            content.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        content.extend(calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        }));
        Self {
            role: Speaker::Assistant,
            content,
        }
    }

    /// Batched tool results, sent back on the user side.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Speaker::User,
            content: results
                .into_iter()
                .map(|result| ContentBlock::ToolResult {
                    tool_use_id: result.tool_use_id,
                    content: result.content,
                })
                .collect(),
        }
    }
}

/// A structured tool invocation proposed by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Result string produced for one [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
}

/// Catalog entry describing one tool to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Terminal status of one model turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model finished its answer.
    Completed,
    /// The model stopped to request tool invocations.
    ToolRequested,
    /// The response hit the token budget; tool inputs are unreliable.
    Truncated,
}

impl TurnStatus {
    /// Map a Messages API `stop_reason` to a turn status.
    pub fn from_stop_reason(reason: Option<&str>) -> Self {
        match reason {
            Some("tool_use") => Self::ToolRequested,
            Some("max_tokens") => Self::Truncated,
            _ => Self::Completed,
        }
    }
}

/// Token usage reported for one model turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Everything the transport reports back for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub status: TurnStatus,
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_message_serializes_to_wire_shape() {
        let call = ToolCall {
            id: "toolu_1".to_string(),
            name: "read_file".to_string(),
            input: json!({"path": "workspace/a.md"}),
        };
        let message = Message::assistant("reading", &[call]);

        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(
            value,
            json!({
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "reading"},
                    {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "workspace/a.md"}}
                ]
            })
        );
    }

    #[test]
    fn empty_text_is_omitted_from_assistant_turn() {
        let message = Message::assistant("", &[]);
        assert!(message.content.is_empty());
    }

    #[test]
    fn stop_reasons_map_to_statuses() {
        assert_eq!(
            TurnStatus::from_stop_reason(Some("end_turn")),
            TurnStatus::Completed
        );
        assert_eq!(
            TurnStatus::from_stop_reason(Some("stop_sequence")),
            TurnStatus::Completed
        );
        assert_eq!(
            TurnStatus::from_stop_reason(Some("tool_use")),
            TurnStatus::ToolRequested
        );
        assert_eq!(
            TurnStatus::from_stop_reason(Some("max_tokens")),
            TurnStatus::Truncated
        );
        assert_eq!(TurnStatus::from_stop_reason(None), TurnStatus::Completed);
    }
}
