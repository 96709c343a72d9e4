use std::fmt;

use crate::error::HarnessError;
use crate::types::{ChatMessage, MessageRole};

const TRANSCRIPT_SEPARATOR_WIDTH: usize = 80;

/// Append-only, chronologically ordered conversation log.
///
/// Turns are never edited or removed once pushed. A `tool` turn is only
/// accepted when an earlier assistant turn in the same log carries a tool
/// call with the matching id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn from_messages<I>(messages: I) -> Result<Self, HarnessError>
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        let mut history = Self::new();
        history.extend(messages)?;
        Ok(history)
    }

    pub fn push(&mut self, message: ChatMessage) -> Result<(), HarnessError> {
        if message.role == MessageRole::Tool {
            let id = message.tool_call_id.as_deref().unwrap_or_default();
            if !self.has_tool_call(id) {
                return Err(HarnessError::DanglingToolResult(id.to_string()));
            }
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn extend<I>(&mut self, messages: I) -> Result<(), HarnessError>
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        for message in messages {
            self.push(message)?;
        }
        Ok(())
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::system(content));
    }

    pub fn push_tool(
        &mut self,
        id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), HarnessError> {
        self.push(ChatMessage::tool(id, content))
    }

    fn has_tool_call(&self, id: &str) -> bool {
        !id.is_empty()
            && self
                .messages
                .iter()
                .filter(|message| message.role == MessageRole::Assistant)
                .flat_map(|message| message.tool_calls.iter())
                .any(|call| call.id() == Some(id))
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn last_with_role(&self, role: MessageRole) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|message| message.role == role)
    }

    pub fn last_assistant_text(&self) -> Option<&str> {
        self.last_with_role(MessageRole::Assistant)
            .and_then(|message| message.text())
    }

    /// Flattens the log into role-prefixed text, one separator line per turn.
    pub fn render_transcript(&self) -> String {
        let separator = "-".repeat(TRANSCRIPT_SEPARATOR_WIDTH);
        self.messages
            .iter()
            .map(|message| format!("{message}\n{separator}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for ChatHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, message) in self.messages.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{message}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ChatHistory {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::functions::{FunctionCall, ToolCall};

    fn find_hotels_call(id: &str) -> ToolCall {
        ToolCall::new(FunctionCall::new("FindHotels", json!({"location": "London"}))).with_id(id)
    }

    #[test]
    fn tool_turn_requires_matching_call() {
        let mut history = ChatHistory::new();
        history.push_user("Find me a hotel");

        let error = history.push_tool("call_1", "[]").unwrap_err();
        assert!(matches!(error, HarnessError::DanglingToolResult(id) if id == "call_1"));
        assert_eq!(history.len(), 1);

        history
            .push(ChatMessage::assistant_tool_call(find_hotels_call("call_1")))
            .expect("assistant tool call");
        history.push_tool("call_1", "[]").expect("linked tool result");
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn tool_turn_without_id_is_rejected() {
        let mut history = ChatHistory::new();
        let mut orphan = ChatMessage::tool("x", "[]");
        orphan.tool_call_id = None;
        assert!(history.push(orphan).is_err());
    }

    #[test]
    fn last_assistant_text_skips_later_turns() {
        let mut history = ChatHistory::new();
        history.push_user("hello");
        history.push_assistant("Hi, how can I help?");
        history.push_user("bye");

        assert_eq!(history.last_assistant_text(), Some("Hi, how can I help?"));
        assert_eq!(history.last().and_then(|m| m.text()), Some("bye"));
    }

    #[test]
    fn transcript_is_role_prefixed() {
        let mut history = ChatHistory::new();
        history.push_user("I want a room");
        history.push_assistant("Which city?");

        let transcript = history.render_transcript();
        let lines: Vec<&str> = transcript.lines().collect();
        assert_eq!(lines[0], "USER: I want a room");
        assert_eq!(lines[1], "-".repeat(80));
        assert_eq!(lines[2], "ASSISTANT: Which city?");
    }
}
