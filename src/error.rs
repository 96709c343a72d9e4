use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),
}

/// Failures surfaced by the conversation harness. None of them are recovered
/// locally: a failed round aborts the whole run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Provider(#[from] LLMError),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for tool {tool}: {message}")]
    ArgumentParse { tool: String, message: String },

    #[error("malformed verdict: {0}")]
    MalformedVerdict(String),

    #[error("tool result references unknown tool call id: {0}")]
    DanglingToolResult(String),

    #[error("template render error: {0}")]
    TemplateRender(#[from] handlebars::RenderError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    pub(crate) fn argument_parse(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArgumentParse {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
