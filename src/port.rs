//! The chat-completion port the conversation participants talk through.
//!
//! Two implementations exist and are selected once, from the back-end's
//! function-calling capability: [`NativeToolCallingPort`] hands tool schemas
//! to the provider as structured declarations, [`PromptedToolCallingPort`]
//! writes them into the system prompt and recovers a pseudo tool call from
//! the reply text.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{HarnessError, LLMError};
use crate::extract::{extract_json_objects, json_candidates};
use crate::functions::{FunctionCall, Tool, ToolCall, ToolChoice};
use crate::prompts::{self, TOOLS_PROMPT};
use crate::providers::openai::{OpenAI, OpenAIConfig};
use crate::providers::openrouter::{OpenRouter, OpenRouterConfig};
use crate::providers::LLMProvider;
use crate::types::{ChatMessage, CompletionRequest, MessageRole};

/// One model reply: either plain text or a single tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantTurn {
    Text(String),
    /// The call always carries an id.
    ToolCall(ToolCall),
}

impl AssistantTurn {
    pub fn text(&self) -> Option<&str> {
        match self {
            AssistantTurn::Text(text) => Some(text),
            AssistantTurn::ToolCall(_) => None,
        }
    }

    /// The reply text; a tool call is rendered as its wire JSON.
    pub fn into_text(self) -> String {
        match self {
            AssistantTurn::Text(text) => text,
            AssistantTurn::ToolCall(call) => json!({
                "name": call.function.name,
                "arguments": call.function.arguments,
            })
            .to_string(),
        }
    }
}

#[async_trait]
pub trait ChatCompletionPort: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<AssistantTurn, LLMError>;

    fn supports_function_calling(&self) -> bool;

    /// The turns that feed a tool result back to the model.
    fn tool_exchange(&self, call: &ToolCall, result: &str) -> Vec<ChatMessage>;

    fn name(&self) -> &str;
}

/// Per-request model settings shared by both port flavors.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model_name().to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn request(&self, messages: Vec<ChatMessage>) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.model.clone(), messages);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }
}

#[derive(Debug, Default)]
struct CallIds(AtomicUsize);

impl CallIds {
    fn ensure(&self, call: ToolCall) -> ToolCall {
        match call.id() {
            Some(id) if !id.is_empty() => call,
            _ => {
                let next = self.0.fetch_add(1, Ordering::Relaxed) + 1;
                call.with_id(format!("call_{next}"))
            }
        }
    }
}

fn first_call<T>(mut calls: Vec<T>, port: &str) -> Option<T> {
    if calls.len() > 1 {
        warn!(
            port,
            dropped = calls.len() - 1,
            "model returned several tool calls; acting on the first"
        );
    }
    if calls.is_empty() {
        None
    } else {
        Some(calls.swap_remove(0))
    }
}

pub struct NativeToolCallingPort {
    provider: Arc<dyn LLMProvider>,
    settings: ModelSettings,
    ids: CallIds,
}

impl NativeToolCallingPort {
    pub fn new(provider: Arc<dyn LLMProvider>, settings: ModelSettings) -> Self {
        Self {
            provider,
            settings,
            ids: CallIds::default(),
        }
    }
}

#[async_trait]
impl ChatCompletionPort for NativeToolCallingPort {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<AssistantTurn, LLMError> {
        let mut request = self.settings.request(messages.to_vec());
        if !tools.is_empty() {
            request = request
                .with_tools(tools.iter().cloned())
                .with_tool_choice(ToolChoice::auto());
        }

        debug!(
            provider = self.provider.name(),
            messages = messages.len(),
            tools = tools.len(),
            "native completion"
        );
        let response = self.provider.complete(request).await?;
        let message = response.message;

        match first_call(message.tool_calls, self.name()) {
            Some(call) => Ok(AssistantTurn::ToolCall(self.ids.ensure(call))),
            None => Ok(AssistantTurn::Text(message.content.unwrap_or_default())),
        }
    }

    fn supports_function_calling(&self) -> bool {
        true
    }

    fn tool_exchange(&self, call: &ToolCall, result: &str) -> Vec<ChatMessage> {
        let id = call.id().unwrap_or_default().to_string();
        vec![
            ChatMessage::assistant_tool_call(call.clone()),
            ChatMessage::tool(id, result),
        ]
    }

    fn name(&self) -> &str {
        "native"
    }
}

pub struct PromptedToolCallingPort {
    provider: Arc<dyn LLMProvider>,
    settings: ModelSettings,
    ids: CallIds,
}

impl PromptedToolCallingPort {
    pub fn new(provider: Arc<dyn LLMProvider>, settings: ModelSettings) -> Self {
        Self {
            provider,
            settings,
            ids: CallIds::default(),
        }
    }

    fn with_tool_instructions(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<Vec<ChatMessage>, LLMError> {
        let declarations = tools
            .iter()
            .map(|tool| serde_json::to_string(&tool.function))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| LLMError::Provider(format!("tool declaration: {error}")))?
            .join("\n");
        let instructions = prompts::render(TOOLS_PROMPT, &json!({ "tools": declarations }))
            .map_err(|error| LLMError::Provider(error.to_string()))?;

        let mut composed = messages.to_vec();
        match composed.first_mut() {
            Some(first) if first.role == MessageRole::System => {
                let base = first.content.take().unwrap_or_default();
                first.content = Some(format!("{base}\n\n{instructions}"));
            }
            _ => composed.insert(0, ChatMessage::system(instructions)),
        }
        Ok(composed)
    }
}

#[async_trait]
impl ChatCompletionPort for PromptedToolCallingPort {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<AssistantTurn, LLMError> {
        let composed = if tools.is_empty() {
            messages.to_vec()
        } else {
            self.with_tool_instructions(messages, tools)?
        };

        debug!(
            provider = self.provider.name(),
            messages = composed.len(),
            tools = tools.len(),
            "prompted completion"
        );
        let response = self.provider.complete(self.settings.request(composed)).await?;
        let message = response.message;

        if let Some(call) = first_call(message.tool_calls, self.name()) {
            return Ok(AssistantTurn::ToolCall(self.ids.ensure(call)));
        }

        let content = message.content.unwrap_or_default();
        if tools.is_empty() {
            return Ok(AssistantTurn::Text(content));
        }

        match first_call(extract_tool_calls(&content, tools), self.name()) {
            Some(function) => {
                debug!(tool = %function.name, "recovered tool call from reply text");
                Ok(AssistantTurn::ToolCall(
                    self.ids.ensure(ToolCall::new(function)),
                ))
            }
            None => Ok(AssistantTurn::Text(
                reply_content(&content).unwrap_or(content),
            )),
        }
    }

    fn supports_function_calling(&self) -> bool {
        false
    }

    fn tool_exchange(&self, call: &ToolCall, result: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::assistant(format!(
            "Function {} returned: {result}",
            call.name()
        ))]
    }

    fn name(&self) -> &str {
        "prompted"
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CallEnvelope {
    Wrapped {
        #[serde(alias = "tool_call", alias = "function")]
        function_call: FlatCall,
    },
    Flat(FlatCall),
}

#[derive(Debug, Deserialize)]
struct FlatCall {
    #[serde(alias = "function", alias = "action", alias = "tool")]
    name: String,
    #[serde(
        default,
        alias = "parameters",
        alias = "action_input",
        alias = "args",
        alias = "input"
    )]
    arguments: Option<Value>,
}

impl CallEnvelope {
    fn into_call(self) -> FlatCall {
        match self {
            CallEnvelope::Wrapped { function_call } => function_call,
            CallEnvelope::Flat(call) => call,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentReply {
    content: String,
}

fn parse_call(candidate: &str, tools: &[Tool]) -> Option<FunctionCall> {
    let call = serde_json::from_str::<CallEnvelope>(candidate)
        .ok()?
        .into_call();
    if !tools.iter().any(|tool| tool.function.name == call.name) {
        return None;
    }

    let function = match call.arguments {
        Some(Value::String(raw)) => FunctionCall::from_raw(call.name, raw),
        Some(arguments) => FunctionCall::new(call.name, arguments),
        None => FunctionCall::new(call.name, Value::Object(Default::default())),
    };
    Some(function)
}

/// Every pseudo tool call in `content`, in the order the model wrote them.
///
/// Only calls naming one of `tools` count.
pub fn extract_tool_calls(content: &str, tools: &[Tool]) -> Vec<FunctionCall> {
    extract_json_objects(content)
        .into_iter()
        .filter_map(|candidate| parse_call(candidate, tools))
        .collect()
}

/// Recovers the first pseudo tool call from free-form reply text.
///
/// Anything that does not name one of `tools` is treated as a plain reply.
pub fn extract_tool_call(content: &str, tools: &[Tool]) -> Option<FunctionCall> {
    extract_tool_calls(content, tools).into_iter().next()
}

// `{"content": "...", "function_call": null}` is a plain reply in call clothing
fn reply_content(content: &str) -> Option<String> {
    json_candidates(content).into_iter().find_map(|candidate| {
        serde_json::from_str::<ContentReply>(&candidate)
            .ok()
            .map(|reply| reply.content)
    })
}

/// Wraps `provider` in the port matching its function-calling capability.
///
/// An explicit `supports_function_calling` in `config` overrides what the
/// provider reports.
pub fn port_for(provider: Arc<dyn LLMProvider>, config: &LlmConfig) -> Arc<dyn ChatCompletionPort> {
    let native = config
        .supports_function_calling
        .unwrap_or_else(|| provider.capabilities().supports_function_calling);
    let settings = ModelSettings::from_config(config);

    debug!(
        provider = provider.name(),
        model = %settings.model,
        native,
        "building chat completion port"
    );
    if native {
        Arc::new(NativeToolCallingPort::new(provider, settings))
    } else {
        Arc::new(PromptedToolCallingPort::new(provider, settings))
    }
}

/// Builds the provider named in `config` and wraps it in a port.
pub fn connect(config: &LlmConfig) -> Result<Arc<dyn ChatCompletionPort>, HarnessError> {
    let provider = build_provider(config)?;
    Ok(port_for(provider, config))
}

fn build_provider(config: &LlmConfig) -> Result<Arc<dyn LLMProvider>, HarnessError> {
    let variable = config.api_key_variable().to_string();
    let api_key = match &config.api_key {
        Some(key) => key.clone(),
        None => std::env::var(&variable)
            .map_err(|_| HarnessError::Config(format!("missing API key: set {variable}")))?,
    };
    let timeout = config.request_timeout_ms.map(Duration::from_millis);

    match config.provider_name() {
        "openai" => {
            let mut settings = OpenAIConfig::new(api_key);
            if let Some(base_url) = &config.base_url {
                settings = settings.with_base_url(base_url);
            }
            if let Some(timeout) = timeout {
                settings = settings.with_timeout(timeout);
            }
            Ok(Arc::new(OpenAI::from_config(settings)?))
        }
        "openrouter" => {
            let mut settings = OpenRouterConfig::new(api_key);
            if let Some(base_url) = &config.base_url {
                settings = settings.with_base_url(base_url);
            }
            if let Some(timeout) = timeout {
                settings = settings.with_timeout(timeout);
            }
            Ok(Arc::new(OpenRouter::from_config(settings)?))
        }
        other => Err(HarnessError::Config(format!("unknown provider '{other}'"))),
    }
}
