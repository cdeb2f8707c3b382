//! Model transport abstraction.
//!
//! The [`ModelTransport`] trait decouples the session loop from the hosted
//! model API. Tests use scripted transports that return predetermined turns
//! without any network access.

use std::collections::BTreeMap;
use std::env;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::{Message, ModelTurn, TokenUsage, ToolCall, ToolSpec, TurnStatus};
use crate::io::config::ApiConfig;

/// One request to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub system: &'a str,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "no_tools")]
    pub tools: &'a [ToolSpec],
}

fn no_tools(tools: &&[ToolSpec]) -> bool {
    tools.is_empty()
}

/// Abstraction over model backends.
pub trait ModelTransport {
    /// Submit one turn. `on_text` receives text chunks as they stream in.
    fn submit(&self, request: &ModelRequest<'_>, on_text: &mut dyn FnMut(&str))
    -> Result<ModelTurn>;
}

/// Server-sent event payloads of the Messages streaming API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: StartedMessage,
    },
    ContentBlockStart {
        index: u64,
        content_block: StartedBlock,
    },
    ContentBlockDelta {
        index: u64,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u64,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartedMessage {
    #[serde(default)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartedBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeltaUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

/// Folds streamed events into one [`ModelTurn`].
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    tool_uses: BTreeMap<u64, PendingToolUse>,
    stop_reason: Option<String>,
    usage: TokenUsage,
    error: Option<ApiError>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns text to display, if the event carried any.
    pub fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.usage = message.usage;
                None
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                StartedBlock::Text { text } if !text.is_empty() => {
                    self.text.push_str(&text);
                    Some(text)
                }
                StartedBlock::ToolUse { id, name } => {
                    self.tool_uses.insert(
                        index,
                        PendingToolUse {
                            id,
                            name,
                            input_json: String::new(),
                        },
                    );
                    None
                }
                _ => None,
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => {
                    self.text.push_str(&text);
                    Some(text)
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(pending) = self.tool_uses.get_mut(&index) {
                        pending.input_json.push_str(&partial_json);
                    }
                    None
                }
                BlockDelta::Other => None,
            },
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    if let Some(input) = usage.input_tokens {
                        self.usage.input_tokens = input;
                    }
                    if let Some(output) = usage.output_tokens {
                        self.usage.output_tokens = output;
                    }
                }
                None
            }
            StreamEvent::Error { error } => {
                self.error = Some(error);
                None
            }
            StreamEvent::ContentBlockStop { .. }
            | StreamEvent::MessageStop
            | StreamEvent::Ping
            | StreamEvent::Unknown => None,
        }
    }

    /// Finish the turn. Tool inputs of a truncated turn are dropped unparsed.
    pub fn finish(self) -> Result<ModelTurn> {
        if let Some(error) = self.error {
            bail!("model stream error ({}): {}", error.kind, error.message);
        }
        let status = TurnStatus::from_stop_reason(self.stop_reason.as_deref());
        let tool_calls = if status == TurnStatus::Truncated {
            if !self.tool_uses.is_empty() {
                debug!(
                    discarded = self.tool_uses.len(),
                    "dropping tool calls from truncated turn"
                );
            }
            Vec::new()
        } else {
            self.tool_uses
                .into_values()
                .map(|pending| {
                    let input = if pending.input_json.trim().is_empty() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        serde_json::from_str(&pending.input_json).with_context(|| {
                            format!("parse input of tool call {}", pending.name)
                        })?
                    };
                    Ok(ToolCall {
                        id: pending.id,
                        name: pending.name,
                        input,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };
        Ok(ModelTurn {
            text: self.text,
            tool_calls,
            status,
            usage: self.usage,
        })
    }
}

/// Joins `data:` lines of a server-sent event stream into payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed one line (without its terminator). Returns a payload when an event completes.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.flush();
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        None
    }

    /// Payload buffered without a trailing blank line, if any.
    pub fn flush(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(payload)
    }
}

/// Read an event stream to completion.
pub fn read_event_stream<R: BufRead>(
    reader: R,
    on_text: &mut dyn FnMut(&str),
) -> Result<ModelTurn> {
    let mut decoder = SseDecoder::default();
    let mut acc = StreamAccumulator::new();
    let mut handle = |payload: String, acc: &mut StreamAccumulator| -> Result<()> {
        let event: StreamEvent = serde_json::from_str(&payload)
            .with_context(|| format!("parse stream event {payload}"))?;
        if let Some(text) = acc.apply(event) {
            on_text(&text);
        }
        Ok(())
    };
    for line in reader.lines() {
        let line = line.context("read model stream")?;
        if let Some(payload) = decoder.push_line(line.trim_end_matches('\r')) {
            handle(payload, &mut acc)?;
        }
    }
    if let Some(payload) = decoder.flush() {
        handle(payload, &mut acc)?;
    }
    acc.finish()
}

/// Transport for the hosted Messages API.
pub struct AnthropicTransport {
    client: reqwest::blocking::Client,
    endpoint: String,
    version: String,
    api_key: String,
}

impl AnthropicTransport {
    /// Build from config. The API key is read from the configured environment variable.
    pub fn from_config(api: &ApiConfig) -> Result<Self> {
        let api_key = env::var(&api.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("{} is not set", api.api_key_env))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/messages", api.base_url.trim_end_matches('/')),
            version: api.version.clone(),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct StreamingBody<'a, 'b> {
    #[serde(flatten)]
    request: &'b ModelRequest<'a>,
    stream: bool,
}

impl ModelTransport for AnthropicTransport {
    #[instrument(skip_all, fields(model = request.model, messages = request.messages.len()))]
    fn submit(
        &self,
        request: &ModelRequest<'_>,
        on_text: &mut dyn FnMut(&str),
    ) -> Result<ModelTurn> {
        let body = StreamingBody {
            request,
            stream: true,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version)
            .json(&body)
            .send()
            .context("send model request")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            warn!(%status, "model request rejected");
            bail!("model request failed with {status}: {detail}");
        }

        let turn = read_event_stream(BufReader::new(response), on_text)?;
        debug!(
            status = ?turn.status,
            tool_calls = turn.tool_calls.len(),
            input_tokens = turn.usage.input_tokens,
            output_tokens = turn.usage.output_tokens,
            "model turn finished"
        );
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOOL_TURN: &str = r#"event: message_start
data: {"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":120,"output_tokens":1}}}

event: content_block_start
data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Reading "}}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"now."}}

event: content_block_start
data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"read_file","input":{}}}

event: content_block_delta
data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\": \"work"}}

event: content_block_delta
data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"space/a.md\"}"}}

event: ping
data: {"type":"ping"}

event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":42}}

event: message_stop
data: {"type":"message_stop"}
"#;

    #[test]
    fn stream_yields_text_tool_calls_and_usage() {
        let mut shown = String::new();
        let turn = read_event_stream(TOOL_TURN.as_bytes(), &mut |chunk| shown.push_str(chunk))
            .expect("parse stream");

        assert_eq!(shown, "Reading now.");
        assert_eq!(turn.text, "Reading now.");
        assert_eq!(turn.status, TurnStatus::ToolRequested);
        assert_eq!(
            turn.usage,
            TokenUsage {
                input_tokens: 120,
                output_tokens: 42
            }
        );
        assert_eq!(
            turn.tool_calls,
            vec![ToolCall {
                id: "toolu_1".to_string(),
                name: "read_file".to_string(),
                input: json!({"path": "workspace/a.md"}),
            }]
        );
    }

    #[test]
    fn truncated_turn_drops_incomplete_tool_input() {
        let mut acc = StreamAccumulator::new();
        acc.apply(StreamEvent::ContentBlockStart {
            index: 0,
            content_block: StartedBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "write_file".to_string(),
            },
        });
        acc.apply(StreamEvent::ContentBlockDelta {
            index: 0,
            delta: BlockDelta::InputJsonDelta {
                partial_json: "{\"path\": \"workspace/big.md\", \"content\": \"aaa".to_string(),
            },
        });
        acc.apply(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some("max_tokens".to_string()),
            },
            usage: None,
        });

        let turn = acc.finish().expect("truncation is not an error");
        assert_eq!(turn.status, TurnStatus::Truncated);
        assert!(turn.tool_calls.is_empty());
    }

    #[test]
    fn error_event_fails_the_turn() {
        let stream = "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n";
        let err = read_event_stream(stream.as_bytes(), &mut |_| {}).unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
    }

    #[test]
    fn unknown_events_are_ignored() {
        let stream = "data: {\"type\":\"something_new\"}\n\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n";
        let turn = read_event_stream(stream.as_bytes(), &mut |_| {}).expect("parse");
        assert_eq!(turn.status, TurnStatus::Completed);
    }

    #[test]
    fn request_omits_absent_temperature_and_empty_tools() {
        let messages = vec![Message::user_text("hi")];
        let request = ModelRequest {
            model: "claude-sonnet-4-6",
            max_tokens: 100,
            temperature: None,
            system: "sys",
            messages: &messages,
            tools: &[],
        };
        let value = serde_json::to_value(StreamingBody {
            request: &request,
            stream: true,
        })
        .expect("serialize");
        assert_eq!(
            value,
            json!({
                "model": "claude-sonnet-4-6",
                "max_tokens": 100,
                "system": "sys",
                "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
                "stream": true
            })
        );
    }
}
