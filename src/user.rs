use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use colored::Colorize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::debug;

use crate::error::HarnessError;
use crate::history::ChatHistory;
use crate::port::ChatCompletionPort;
use crate::prompts::{self, USER_OPENER_INSTRUCTION, USER_SYSTEM_PROMPT};
use crate::types::{ChatMessage, MessageRole};

pub const DEFAULT_STOP_PHRASE: &str = "bye";

/// The counterpart driving the conversation.
#[async_trait]
pub trait User: Send {
    /// The opening utterance; a seed is used verbatim when given.
    async fn start(&mut self, seed: Option<&str>) -> Result<String, HarnessError>;

    async fn respond(&mut self, assistant_reply: &str) -> Result<String, HarnessError>;
}

/// A persona played by a language model.
///
/// The private log stores turns with their conversation roles: assistant
/// replies as `assistant`, this user's utterances as `user`. Roles are
/// swapped when the log is sent, so the model speaks as `assistant` from its
/// own point of view.
pub struct LlmUser {
    persona: String,
    port: Arc<dyn ChatCompletionPort>,
    stop_phrase: String,
    history: ChatHistory,
}

impl LlmUser {
    pub fn new(persona: impl Into<String>, port: Arc<dyn ChatCompletionPort>) -> Self {
        Self {
            persona: persona.into(),
            port,
            stop_phrase: DEFAULT_STOP_PHRASE.to_string(),
            history: ChatHistory::new(),
        }
    }

    pub fn with_stop_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.stop_phrase = phrase.into();
        self
    }

    pub fn stop_phrase(&self) -> &str {
        &self.stop_phrase
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    fn system_prompt(&self) -> Result<String, HarnessError> {
        prompts::render(
            USER_SYSTEM_PROMPT,
            &json!({ "persona": self.persona, "stop_phrase": self.stop_phrase }),
        )
    }

    fn mirrored(&self) -> Result<Vec<ChatMessage>, HarnessError> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt()?));
        if self.history.is_empty() {
            messages.push(ChatMessage::user(USER_OPENER_INSTRUCTION));
        }
        messages.extend(self.history.iter().map(|message| {
            let role = match message.role {
                MessageRole::User => MessageRole::Assistant,
                MessageRole::Assistant => MessageRole::User,
                other => other,
            };
            message.clone().with_role(role)
        }));
        Ok(messages)
    }

    async fn next_utterance(&mut self) -> Result<String, HarnessError> {
        let messages = self.mirrored()?;
        debug!(messages = messages.len(), "simulated user completion");
        let utterance = self.port.complete(&messages, &[]).await?.into_text();
        self.history.push_user(utterance.clone());
        Ok(utterance)
    }
}

#[async_trait]
impl User for LlmUser {
    async fn start(&mut self, seed: Option<&str>) -> Result<String, HarnessError> {
        match seed {
            Some(seed) => {
                self.history.push_user(seed);
                Ok(seed.to_string())
            }
            None => self.next_utterance().await,
        }
    }

    async fn respond(&mut self, assistant_reply: &str) -> Result<String, HarnessError> {
        self.history.push_assistant(assistant_reply);
        self.next_utterance().await
    }
}

/// A human at the terminal.
pub struct ConsoleUser {
    lines: Lines<BufReader<Stdin>>,
}

impl ConsoleUser {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn read_line(&mut self) -> Result<String, HarnessError> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        match self.lines.next_line().await? {
            Some(line) => Ok(line),
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed").into()),
        }
    }
}

impl Default for ConsoleUser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl User for ConsoleUser {
    async fn start(&mut self, seed: Option<&str>) -> Result<String, HarnessError> {
        match seed {
            Some(seed) => {
                println!("> {seed}");
                Ok(seed.to_string())
            }
            None => self.read_line().await,
        }
    }

    async fn respond(&mut self, assistant_reply: &str) -> Result<String, HarnessError> {
        println!("{}", assistant_reply.green());
        self.read_line().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ModelSettings, NativeToolCallingPort};
    use crate::providers::scripted::ScriptedProvider;

    fn user(provider: Arc<ScriptedProvider>) -> LlmUser {
        let port = Arc::new(NativeToolCallingPort::new(provider, ModelSettings::new("gpt-4")));
        LlmUser::new("I am John Smith and I need a hotel in London.", port)
    }

    #[tokio::test]
    async fn seed_is_returned_without_a_model_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut user = user(provider.clone());

        let opener = user.start(Some("Hi, I need a hotel")).await.expect("opener");
        assert_eq!(opener, "Hi, I need a hotel");
        assert!(provider.requests().is_empty());
        assert_eq!(user.history().len(), 1);
    }

    #[tokio::test]
    async fn roles_are_mirrored_for_the_model() {
        let provider = Arc::new(ScriptedProvider::from_texts([
            "Hello, I need a hotel in London.",
            "From 2024-02-09 to 2024-02-11.",
        ]));
        let mut user = user(provider.clone());

        user.start(None).await.expect("opener");
        let reply = user.respond("Sure, for which dates?").await.expect("reply");
        assert_eq!(reply, "From 2024-02-09 to 2024-02-11.");

        let requests = provider.requests();
        let opener = &requests[0].messages;
        assert_eq!(opener.len(), 2);
        assert!(opener[0].text().unwrap_or_default().contains("John Smith"));
        assert!(opener[0].text().unwrap_or_default().contains("\"bye\""));
        assert_eq!(opener[1].role, MessageRole::User);

        let second = &requests[1].messages;
        let roles: Vec<MessageRole> = second.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::Assistant, MessageRole::User]
        );
        assert!(requests.iter().all(|request| request.tools.is_empty()));

        let private: Vec<MessageRole> = user.history().iter().map(|m| m.role).collect();
        assert_eq!(
            private,
            vec![MessageRole::User, MessageRole::Assistant, MessageRole::User]
        );
    }

    #[tokio::test]
    async fn port_failure_propagates() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut user = user(provider);
        assert!(matches!(
            user.respond("Anything else?").await,
            Err(HarnessError::Provider(_))
        ));
    }
}
