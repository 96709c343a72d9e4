use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::Client;

use crate::{
    error::LLMError,
    providers::{wire, LLMProvider},
    types::{CompletionRequest, CompletionResponse, ProviderCapabilities},
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Connection settings for any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub organization: Option<String>,
    pub request_timeout: Duration,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Native function calling back-end.
#[derive(Debug, Clone)]
pub struct OpenAI {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAI {
    pub fn new(api_key: impl Into<String>) -> Result<Self, LLMError> {
        Self::from_config(OpenAIConfig::new(api_key))
    }

    /// Reads `OPENAI_API_KEY`, plus `OPENAI_BASE_URL` and
    /// `OPENAI_ORGANIZATION` when set.
    pub fn from_env() -> Result<Self, LLMError> {
        let api_key =
            env::var("OPENAI_API_KEY").map_err(|_| LLMError::MissingApiKey("OPENAI_API_KEY"))?;
        let mut config = OpenAIConfig::new(api_key);
        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            config = config.with_base_url(base_url);
        }
        if let Ok(organization) = env::var("OPENAI_ORGANIZATION") {
            config = config.with_organization(organization);
        }
        Self::from_config(config)
    }

    pub fn from_config(config: OpenAIConfig) -> Result<Self, LLMError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LLMProvider for OpenAI {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let mut builder = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.config.api_key);
        if let Some(organization) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", organization);
        }
        wire::send(builder, &request).await
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::new(true)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
