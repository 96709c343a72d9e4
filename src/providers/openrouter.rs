use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::{
    error::LLMError,
    providers::{wire, LLMProvider},
    types::{CompletionRequest, CompletionResponse, ProviderCapabilities},
};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub referer: Option<String>,
    pub title: Option<String>,
    /// Most models routed through OpenRouter only follow tool instructions
    /// written into the prompt.
    pub supports_function_calling: bool,
}

impl OpenRouterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            referer: None,
            title: Some("dialogue-bench".to_string()),
            supports_function_calling: false,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct OpenRouter {
    client: Client,
    config: OpenRouterConfig,
}

impl OpenRouter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, LLMError> {
        Self::from_config(OpenRouterConfig::new(api_key))
    }

    pub fn from_config(config: OpenRouterConfig) -> Result<Self, LLMError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LLMProvider for OpenRouter {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(url).bearer_auth(&self.config.api_key);
        if let Some(referer) = &self.config.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.title {
            builder = builder.header("X-Title", title);
        }
        wire::send(builder, &request).await
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::new(self.config.supports_function_calling)
    }

    fn name(&self) -> &'static str {
        "openrouter"
    }
}
