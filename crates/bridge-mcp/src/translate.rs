//! Mapping between MCP descriptors/results and chat-completion types.

use crate::client::{McpToolContent, McpToolInfo, McpToolResult};
use bridge_types::{ChatMessage, ChatTool, ContentPart, FunctionSchema};

/// Text sent in place of a tool result that has no text parts. Inference
/// servers reject tool messages with empty content.
pub const EMPTY_RESULT_PLACEHOLDER: &str = "the tool call result is empty";

/// Describe an MCP tool as a callable function. The input schema is already
/// JSON Schema and passes through unchanged.
pub fn to_function_schema(tool: &McpToolInfo) -> ChatTool {
    ChatTool::function(FunctionSchema {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.input_schema.clone(),
    })
}

/// Turn a tool result into the `tool` message answering `invocation_id`.
///
/// Only text parts are carried over, one content part each, in order.
pub fn to_tool_message(result: &McpToolResult, invocation_id: &str) -> ChatMessage {
    let mut parts: Vec<ContentPart> = result
        .content
        .iter()
        .filter_map(|c| match c {
            McpToolContent::Text { text } => Some(ContentPart::Text { text: text.clone() }),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        parts.push(ContentPart::Text {
            text: EMPTY_RESULT_PLACEHOLDER.to_string(),
        });
    }

    ChatMessage::tool(invocation_id, parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_types::{MessageContent, Role};

    fn sample_tool_info() -> McpToolInfo {
        McpToolInfo {
            name: "read_file".to_string(),
            description: Some("Read a file from disk".to_string()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"}
                },
                "required": ["path"]
            }),
        }
    }

    #[test]
    fn function_schema_passes_schema_through() {
        let info = sample_tool_info();
        let tool = to_function_schema(&info);
        assert_eq!(tool.tool_type, "function");
        assert_eq!(tool.function.name, "read_file");
        assert_eq!(
            tool.function.description.as_deref(),
            Some("Read a file from disk")
        );
        assert_eq!(tool.function.parameters, info.input_schema);
    }

    #[test]
    fn function_schema_serializes_as_openai_tool() {
        let tool = to_function_schema(&McpToolInfo {
            name: "ping".to_string(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        });
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "ping");
        assert!(json["function"].get("description").is_none());
    }

    #[test]
    fn tool_message_keeps_text_parts_in_order() {
        let result = McpToolResult {
            content: vec![
                McpToolContent::Text {
                    text: "first".to_string(),
                },
                McpToolContent::Image {
                    data: "abc".to_string(),
                    mime_type: "image/png".to_string(),
                },
                McpToolContent::Text {
                    text: "second".to_string(),
                },
            ],
            is_error: false,
        };
        let msg = to_tool_message(&result, "call_1");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(
            msg.content,
            Some(MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "first".to_string()
                },
                ContentPart::Text {
                    text: "second".to_string()
                },
            ]))
        );
    }

    #[test]
    fn empty_result_gets_placeholder() {
        let result = McpToolResult {
            content: vec![],
            is_error: false,
        };
        let msg = to_tool_message(&result, "call_2");
        assert_eq!(
            msg.content,
            Some(MessageContent::Parts(vec![ContentPart::Text {
                text: "the tool call result is empty".to_string()
            }]))
        );
    }

    #[test]
    fn media_only_result_gets_placeholder() {
        let result = McpToolResult {
            content: vec![McpToolContent::Audio {
                data: "UklGR".to_string(),
                mime_type: "audio/wav".to_string(),
            }],
            is_error: false,
        };
        assert_eq!(to_tool_message(&result, "c").text(), EMPTY_RESULT_PLACEHOLDER);
    }

    #[test]
    fn error_result_is_still_translated() {
        let result = McpToolResult {
            content: vec![McpToolContent::Text {
                text: "file not found".to_string(),
            }],
            is_error: true,
        };
        assert_eq!(to_tool_message(&result, "c").text(), "file not found");
    }
}
