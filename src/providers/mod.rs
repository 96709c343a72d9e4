use async_trait::async_trait;

use crate::error::LLMError;
use crate::types::{CompletionRequest, CompletionResponse, ProviderCapabilities};

pub mod openai;
pub mod openrouter;
pub mod scripted;
mod wire;

/// A raw chat-completion back-end.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError>;

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    fn name(&self) -> &'static str;
}
