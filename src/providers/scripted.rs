use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LLMError;
use crate::eval::scenario::ScriptedTurn;
use crate::functions::{FunctionCall, ToolCall};
use crate::providers::LLMProvider;
use crate::types::{
    ChatMessage, CompletionRequest, CompletionResponse, ProviderCapabilities,
};

/// Replays a fixed queue of assistant messages and records every request.
///
/// Used as the back-end for offline conversations; an exhausted queue is a
/// provider error.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ChatMessage>>,
    requests: Mutex<Vec<CompletionRequest>>,
    capabilities: ProviderCapabilities,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            capabilities: ProviderCapabilities::new(true),
        }
    }

    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_messages(texts.into_iter().map(ChatMessage::assistant))
    }

    pub fn from_messages<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        let provider = Self::new();
        lock(&provider.responses).extend(messages);
        provider
    }

    /// Tool calls become native calls, or `function_call` JSON text when the
    /// back-end is scripted without function calling.
    pub fn from_scripted_turns(turns: &[ScriptedTurn], function_calling: bool) -> Self {
        let provider = Self::new().with_function_calling(function_calling);
        for turn in turns {
            match turn {
                ScriptedTurn::Text(text) => provider.push_text(text.clone()),
                ScriptedTurn::ToolCall { tool, arguments } if function_calling => {
                    provider.push_tool_call(tool.clone(), arguments.clone())
                }
                ScriptedTurn::ToolCall { tool, arguments } => provider.push_text(
                    serde_json::json!({ "function_call": { "name": tool, "arguments": arguments } })
                        .to_string(),
                ),
            }
        }
        provider
    }

    pub fn with_function_calling(mut self, enabled: bool) -> Self {
        self.capabilities.supports_function_calling = enabled;
        self
    }

    pub fn push_text(&self, text: impl Into<String>) {
        lock(&self.responses).push_back(ChatMessage::assistant(text));
    }

    /// Queues a native tool call. The id is left empty so the port assigns one.
    pub fn push_tool_call(&self, name: impl Into<String>, arguments: Value) {
        let call = ToolCall::new(FunctionCall::new(name, arguments));
        lock(&self.responses).push_back(ChatMessage::assistant_tool_call(call));
    }

    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        lock(&self.requests).push(request);
        let message = lock(&self.responses)
            .pop_front()
            .ok_or_else(|| LLMError::Provider("no more scripted responses".to_string()))?;
        Ok(CompletionResponse::new(message))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
