use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::functions::{Tool, ToolCall, ToolChoice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// An assistant turn that is purely a tool invocation.
    pub fn assistant_tool_call(call: ToolCall) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            name: None,
            tool_call_id: None,
            tool_calls: vec![call],
        }
    }

    pub fn tool(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            name: None,
            tool_call_id: Some(id.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.role = role;
        self
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn tool_call(&self) -> Option<&ToolCall> {
        self.tool_calls.first()
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = self.role.as_str().to_uppercase();
        match (self.role, self.tool_call()) {
            (MessageRole::Assistant, Some(call)) => {
                let arguments = call.function.arguments_json();
                write!(f, "{role}: <tool call {}({arguments})>", call.function.name)
            }
            (MessageRole::Tool, _) => write!(
                f,
                "{role}: {} - tool_call_id: '{}'",
                self.text().unwrap_or_default(),
                self.tool_call_id.as_deref().unwrap_or_default()
            ),
            _ => write!(f, "{role}: {}", self.text().unwrap_or_default()),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ToolCall>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ToolCall>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    pub fn with_max_tokens(mut self, value: u32) -> Self {
        self.max_tokens = Some(value);
        self
    }

    pub fn with_temperature(mut self, value: f32) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn with_tools<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = Tool>,
    {
        self.tools.extend(tools);
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub message: ChatMessage,
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    pub fn new(message: ChatMessage) -> Self {
        Self {
            message,
            usage: None,
        }
    }
}

/// What a back-end can do natively; read once when its port is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub supports_function_calling: bool,
}

impl ProviderCapabilities {
    pub const fn new(supports_function_calling: bool) -> Self {
        Self {
            supports_function_calling,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::functions::FunctionCall;

    #[test]
    fn provider_message_with_null_tool_calls() {
        let raw = json!({
            "role": "assistant",
            "content": "Hello!",
            "tool_calls": null,
            "refusal": null
        });
        let message: ChatMessage = serde_json::from_value(raw).expect("message");
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.text(), Some("Hello!"));
        assert!(message.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_turn_round_trips_through_wire_format() {
        let call = ToolCall::new(FunctionCall::from_raw(
            "MakeReservation",
            r#"{"hotel_name":"Kensington Hotel","guests":3}"#,
        ))
        .with_id("call_abc");
        let original = ChatMessage::assistant_tool_call(call);

        let wire = serde_json::to_string(&original).expect("serialize");
        let parsed: ChatMessage = serde_json::from_str(&wire).expect("deserialize");

        assert_eq!(parsed, original);
        let parsed_call = parsed.tool_call().expect("tool call");
        assert_eq!(parsed_call.id(), Some("call_abc"));
        assert_eq!(parsed_call.name(), "MakeReservation");
        assert_eq!(
            parsed_call.function.raw_arguments.as_deref(),
            Some(r#"{"hotel_name":"Kensington Hotel","guests":3}"#)
        );
    }

    #[test]
    fn text_turns_round_trip() {
        for message in [
            ChatMessage::system("be helpful"),
            ChatMessage::user("I need a room"),
            ChatMessage::assistant("Where to?"),
            ChatMessage::tool("call_1", "[]"),
        ] {
            let wire = serde_json::to_value(&message).expect("serialize");
            let parsed: ChatMessage = serde_json::from_value(wire).expect("deserialize");
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn display_is_role_prefixed() {
        assert_eq!(ChatMessage::user("hi").to_string(), "USER: hi");
        assert_eq!(
            ChatMessage::tool("c1", "true").to_string(),
            "TOOL: true - tool_call_id: 'c1'"
        );
    }
}
