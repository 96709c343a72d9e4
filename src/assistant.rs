use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::HarnessError;
use crate::functions::Tool;
use crate::history::ChatHistory;
use crate::hotel::{hotel_tools, HotelBackend, ToolInvocation};
use crate::port::{AssistantTurn, ChatCompletionPort};
use crate::prompts::{self, ASSISTANT_SYSTEM_PROMPT};
use crate::types::ChatMessage;

pub const DEFAULT_MAX_TOOL_DEPTH: usize = 3;
pub const TOOL_LIMIT_REPLY: &str = "done";

/// The system being exercised: answers one user utterance at a time.
#[async_trait]
pub trait Assistant: Send {
    async fn respond(&mut self, utterance: &str) -> Result<String, HarnessError>;
}

pub struct HotelReservationsAssistant {
    port: Arc<dyn ChatCompletionPort>,
    backend: Arc<dyn HotelBackend>,
    tools: Vec<Tool>,
    history: ChatHistory,
    current_date: NaiveDate,
    max_tool_depth: usize,
}

impl HotelReservationsAssistant {
    pub fn new(port: Arc<dyn ChatCompletionPort>, backend: Arc<dyn HotelBackend>) -> Self {
        Self {
            port,
            backend,
            tools: hotel_tools(),
            history: ChatHistory::new(),
            current_date: Local::now().date_naive(),
            max_tool_depth: DEFAULT_MAX_TOOL_DEPTH,
        }
    }

    /// Fixes "today" in the system prompt so runs are reproducible.
    pub fn with_current_date(mut self, date: NaiveDate) -> Self {
        self.current_date = date;
        self
    }

    pub fn with_max_tool_depth(mut self, depth: usize) -> Self {
        self.max_tool_depth = depth;
        self
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    fn system_prompt(&self) -> Result<String, HarnessError> {
        prompts::render(
            ASSISTANT_SYSTEM_PROMPT,
            &json!({ "current_date": self.current_date.format("%Y-%m-%d").to_string() }),
        )
    }

    fn compose(&self, system: &str, pending: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + pending.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(self.history.iter().cloned());
        messages.extend(pending.iter().cloned());
        messages
    }

    fn commit(&mut self, pending: Vec<ChatMessage>, reply: &str) -> Result<(), HarnessError> {
        self.history.extend(pending)?;
        self.history.push_assistant(reply);
        Ok(())
    }
}

#[async_trait]
impl Assistant for HotelReservationsAssistant {
    async fn respond(&mut self, utterance: &str) -> Result<String, HarnessError> {
        self.history.push_user(utterance);
        let system = self.system_prompt()?;

        let mut pending: Vec<ChatMessage> = Vec::new();
        let mut depth = 0;

        loop {
            if depth >= self.max_tool_depth {
                warn!(
                    depth,
                    limit = self.max_tool_depth,
                    "tool call limit reached; replying without asking the model again"
                );
                self.commit(pending, TOOL_LIMIT_REPLY)?;
                return Ok(TOOL_LIMIT_REPLY.to_string());
            }

            let messages = self.compose(&system, &pending);
            debug!(messages = messages.len(), depth, "assistant completion");

            match self.port.complete(&messages, &self.tools).await? {
                AssistantTurn::Text(reply) => {
                    self.commit(pending, &reply)?;
                    return Ok(reply);
                }
                AssistantTurn::ToolCall(call) => {
                    let invocation = ToolInvocation::parse(&call.function)?;
                    let result = invocation.invoke(self.backend.as_ref()).await?;
                    info!(tool = invocation.name(), depth, "tool call dispatched");

                    pending.extend(self.port.tool_exchange(&call, &result));
                    depth += 1;
                }
            }
        }
    }
}
