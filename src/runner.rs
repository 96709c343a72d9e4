use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::assistant::Assistant;
use crate::error::HarnessError;
use crate::history::ChatHistory;
use crate::port::ChatCompletionPort;
use crate::types::{ChatMessage, MessageRole};
use crate::user::{LlmUser, User};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// The shared transcript of a run plus the number of completed rounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub chat_history: ChatHistory,
    pub iterations_count: usize,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.chat_history.last()
    }

    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.chat_history.last_with_role(MessageRole::Assistant)
    }

    /// Case-insensitive substring match on the latest assistant turn.
    pub fn last_assistant_message_contains(&self, needle: &str) -> bool {
        self.last_assistant_message()
            .and_then(ChatMessage::text)
            .map(|text| contains_ignore_case(text, needle))
            .unwrap_or(false)
    }

    pub fn last_message_contains(&self, needle: &str) -> bool {
        self.last_message()
            .and_then(ChatMessage::text)
            .map(|text| contains_ignore_case(text, needle))
            .unwrap_or(false)
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Decides, after every round, whether the conversation is over.
#[derive(Clone)]
pub struct StopCondition(Arc<dyn Fn(&ConversationState) -> bool + Send + Sync>);

impl StopCondition {
    pub fn new(predicate: impl Fn(&ConversationState) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub fn max_iterations(limit: usize) -> Self {
        Self::new(move |state| state.iterations_count >= limit)
    }

    pub fn assistant_says(phrase: impl Into<String>) -> Self {
        let phrase = phrase.into();
        Self::new(move |state| state.last_assistant_message_contains(&phrase))
    }

    pub fn last_message_says(phrase: impl Into<String>) -> Self {
        let phrase = phrase.into();
        Self::new(move |state| state.last_message_contains(&phrase))
    }

    pub fn or(self, other: StopCondition) -> Self {
        Self::new(move |state| self.should_stop(state) || other.should_stop(state))
    }

    /// Stops on the phrase from the assistant, or after `limit` rounds.
    pub fn default_for(phrase: impl Into<String>, limit: usize) -> Self {
        Self::assistant_says(phrase).or(Self::max_iterations(limit))
    }

    pub fn should_stop(&self, state: &ConversationState) -> bool {
        (self.0)(state)
    }
}

impl Default for StopCondition {
    fn default() -> Self {
        Self::max_iterations(DEFAULT_MAX_ITERATIONS)
    }
}

impl fmt::Debug for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StopCondition(..)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    UserMessage { content: String },
    AssistantMessage { content: String },
    RoundCompleted { iteration: usize },
    Stopped { iterations: usize },
}

/// Alternates user and assistant turns until the stop condition holds.
pub struct ConversationRunner<U, A> {
    user: U,
    assistant: A,
    stop_condition: StopCondition,
    event_callback: Option<Arc<dyn Fn(&ConversationEvent) + Send + Sync>>,
}

impl<U: User, A: Assistant> ConversationRunner<U, A> {
    pub fn new(user: U, assistant: A) -> Self {
        Self {
            user,
            assistant,
            stop_condition: StopCondition::default(),
            event_callback: None,
        }
    }

    pub fn with_stop_condition(mut self, stop_condition: StopCondition) -> Self {
        self.stop_condition = stop_condition;
        self
    }

    pub fn with_event_callback(
        mut self,
        callback: impl Fn(&ConversationEvent) + Send + Sync + 'static,
    ) -> Self {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    pub fn user(&self) -> &U {
        &self.user
    }

    pub fn assistant(&self) -> &A {
        &self.assistant
    }

    fn emit_event(&self, event: ConversationEvent) {
        if let Some(callback) = &self.event_callback {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (callback)(&event)));
        }
    }

    /// Runs one conversation from scratch. Any failure aborts the run.
    pub async fn run(&mut self, seed: Option<&str>) -> Result<ConversationState, HarnessError> {
        let mut state = ConversationState::new();

        let mut utterance = self.user.start(seed).await?;
        state.chat_history.push_user(utterance.clone());
        self.emit_event(ConversationEvent::UserMessage {
            content: utterance.clone(),
        });

        // The opener alone never ends a run; the check follows each round
        loop {
            info!(iteration = state.iterations_count, "conversation round");

            let reply = self.assistant.respond(&utterance).await?;
            state.chat_history.push_assistant(reply.clone());
            self.emit_event(ConversationEvent::AssistantMessage {
                content: reply.clone(),
            });

            utterance = self.user.respond(&reply).await?;
            state.chat_history.push_user(utterance.clone());
            self.emit_event(ConversationEvent::UserMessage {
                content: utterance.clone(),
            });

            state.iterations_count += 1;
            self.emit_event(ConversationEvent::RoundCompleted {
                iteration: state.iterations_count,
            });

            if self.stop_condition.should_stop(&state) {
                break;
            }
        }

        debug!(iterations = state.iterations_count, "conversation stopped");
        self.emit_event(ConversationEvent::Stopped {
            iterations: state.iterations_count,
        });
        Ok(state)
    }
}

/// Plays `persona` through `user_port` against `assistant` until `stop` holds.
pub async fn run_conversation<A: Assistant>(
    persona: &str,
    user_port: Arc<dyn ChatCompletionPort>,
    assistant: A,
    seed: Option<&str>,
    stop: StopCondition,
) -> Result<ConversationState, HarnessError> {
    let user = LlmUser::new(persona, user_port);
    ConversationRunner::new(user, assistant)
        .with_stop_condition(stop)
        .run(seed)
        .await
}
