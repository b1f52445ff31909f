//! Wire types for OpenAI-compatible chat completions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn with_role(role: Role, content: Option<MessageContent>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(MessageContent::Text(text.into())))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, Some(MessageContent::Text(text.into())))
    }

    /// An assistant message carrying the tool calls it emitted. An empty call
    /// list is dropped rather than serialized as `[]`.
    pub fn assistant(content: Option<MessageContent>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        if !tool_calls.is_empty() {
            msg.tool_calls = Some(tool_calls);
        }
        msg
    }

    /// A tool-role message answering the tool call `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        let mut msg = Self::with_role(Role::Tool, Some(MessageContent::Parts(parts)));
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Tool calls emitted with this message, if any.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// All text in this message, concatenated.
    pub fn text(&self) -> String {
        self.content
            .as_ref()
            .map(MessageContent::text)
            .unwrap_or_default()
    }
}

/// Message content: either a plain string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A typed part of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    Refusal { refusal: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A function call requested by the inference server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// Function name plus its arguments, JSON-encoded as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

/// A tool advertised to the inference server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTool {
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    pub function: FunctionSchema,
}

impl ChatTool {
    pub fn function(schema: FunctionSchema) -> Self {
        Self {
            tool_type: function_type(),
            function: schema,
        }
    }
}

/// Function-call schema: name, description, JSON-schema parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

/// A chat-completion request. Fields the bridge does not interpret are kept
/// in `extra` and forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Self::default()
        }
    }
}

/// Why the inference server stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    FunctionCall,
    #[serde(other)]
    Other,
}

impl FinishReason {
    /// `stop` and `length` end a conversation; everything else asks for more.
    pub fn is_terminal(self) -> bool {
        matches!(self, FinishReason::Stop | FinishReason::Length)
    }
}

/// Token usage reported by the inference server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Accumulate usage from another response.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// A non-streaming chat-completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionResponse {
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_preserves_unknown_fields() {
        let raw = json!({
            "model": "llama",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.2,
            "stream": false
        });
        let req: ChatCompletionRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.extra["temperature"], 0.2);
        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["temperature"], 0.2);
        assert_eq!(back["stream"], false);
        assert!(back.get("tools").is_none());
    }

    #[test]
    fn deserialize_tool_call_response() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "llama",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "fetch", "arguments": "{\"url\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let resp: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let choice = resp.first_choice().unwrap();
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert!(choice.message.content.is_none());
        assert_eq!(choice.message.tool_calls()[0].function.name, "fetch");
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn unknown_finish_reason_is_other() {
        let reason: FinishReason = serde_json::from_str("\"eos\"").unwrap();
        assert_eq!(reason, FinishReason::Other);
        assert!(!reason.is_terminal());
    }

    #[test]
    fn terminal_finish_reasons() {
        assert!(FinishReason::Stop.is_terminal());
        assert!(FinishReason::Length.is_terminal());
        assert!(!FinishReason::ToolCalls.is_terminal());
        assert!(!FinishReason::ContentFilter.is_terminal());
    }

    #[test]
    fn assistant_without_calls_omits_field() {
        let msg = ChatMessage::assistant(Some(MessageContent::Text("ok".into())), vec![]);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert_eq!(json["content"], "ok");
    }

    #[test]
    fn tool_message_shape() {
        let msg = ChatMessage::tool(
            "call_9",
            vec![ContentPart::Text {
                text: "result".into(),
            }],
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_9");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "result");
    }

    #[test]
    fn text_concatenates_parts() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "a".into() },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "http://x".into(),
                    detail: None,
                },
            },
            ContentPart::Text { text: "b".into() },
        ]);
        assert_eq!(content.text(), "ab");
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage {
            prompt_tokens: 3,
            completion_tokens: 2,
            total_tokens: 5,
        });
        total.add(&Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        });
        assert_eq!(total.total_tokens, 7);
        assert_eq!(total.prompt_tokens, 4);
    }
}
