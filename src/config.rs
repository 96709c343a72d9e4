use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Settings for one chat-completion back-end. Every field is optional so
/// partial configurations can be layered with [`merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub name: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub supports_function_calling: Option<bool>,
}

/// Field-by-field overlay: anything set in `overrides` wins.
pub fn merge(base: &LlmConfig, overrides: &LlmConfig) -> LlmConfig {
    LlmConfig {
        name: overrides.name.clone().or_else(|| base.name.clone()),
        provider: overrides.provider.clone().or_else(|| base.provider.clone()),
        model: overrides.model.clone().or_else(|| base.model.clone()),
        temperature: overrides.temperature.or(base.temperature),
        max_tokens: overrides.max_tokens.or(base.max_tokens),
        base_url: overrides.base_url.clone().or_else(|| base.base_url.clone()),
        api_key: overrides.api_key.clone().or_else(|| base.api_key.clone()),
        api_key_env: overrides
            .api_key_env
            .clone()
            .or_else(|| base.api_key_env.clone()),
        request_timeout_ms: overrides.request_timeout_ms.or(base.request_timeout_ms),
        supports_function_calling: overrides
            .supports_function_calling
            .or(base.supports_function_calling),
    }
}

impl LlmConfig {
    pub fn builtin() -> Self {
        Self {
            name: None,
            provider: Some(DEFAULT_PROVIDER.to_string()),
            model: Some(DEFAULT_MODEL.to_string()),
            temperature: Some(0.0),
            max_tokens: None,
            base_url: None,
            api_key: None,
            api_key_env: None,
            request_timeout_ms: None,
            supports_function_calling: None,
        }
    }

    /// Named model presets.
    pub fn preset(name: &str) -> Option<Self> {
        let (provider, model, function_calling) = match name {
            "openai-gpt-4" => ("openai", "gpt-4", true),
            "openai-gpt-4o-mini" => ("openai", "gpt-4o-mini", true),
            "openrouter-mixtral" => ("openrouter", "mistralai/mixtral-8x7b-instruct", false),
            "openrouter-claude" => ("openrouter", "anthropic/claude-3-haiku", false),
            _ => return None,
        };

        Some(Self {
            name: Some(name.to_string()),
            provider: Some(provider.to_string()),
            model: Some(model.to_string()),
            supports_function_calling: Some(function_calling),
            ..Self::default()
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_function_calling(mut self, enabled: bool) -> Self {
        self.supports_function_calling = Some(enabled);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// The environment variable holding the API key for this provider.
    pub fn api_key_variable(&self) -> &str {
        match (&self.api_key_env, self.provider_name()) {
            (Some(variable), _) => variable,
            (None, "openrouter") => "OPENROUTER_API_KEY",
            (None, _) => "OPENAI_API_KEY",
        }
    }

    /// Overlays `HARNESS_*` variables read through `lookup`.
    pub fn with_env_overrides<F>(self, lookup: F) -> Result<Self, HarnessError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = LlmConfig {
            provider: lookup("HARNESS_PROVIDER"),
            model: lookup("HARNESS_MODEL"),
            temperature: parse_var(&lookup, "HARNESS_TEMPERATURE")?,
            supports_function_calling: parse_var(&lookup, "HARNESS_FUNCTION_CALLING")?,
            ..LlmConfig::default()
        };
        Ok(merge(&self, &overrides))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, HarnessError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| HarnessError::Config(format!("{key} has an invalid value: {value}")))
        })
        .transpose()
}

/// The three conversation participants that each get their own back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Analyzer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Analyzer => "analyzer",
        }
    }
}

/// Per-role LLM settings loaded from YAML.
///
/// ```yaml
/// defaults:
///   preset: openai-gpt-4o-mini
/// assistant:
///   model: gpt-4
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub defaults: RoleConfig,
    pub user: RoleConfig,
    pub assistant: RoleConfig,
    pub analyzer: RoleConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub preset: Option<String>,
    #[serde(flatten)]
    pub llm: LlmConfig,
}

impl HarnessConfig {
    pub fn from_yaml_str(input: &str) -> Result<Self, HarnessError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    fn section(&self, role: Role) -> &RoleConfig {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
            Role::Analyzer => &self.analyzer,
        }
    }

    /// Builtin defaults, then the named preset, then `defaults`, then the
    /// role section. A role preset takes precedence over the default preset.
    pub fn layered(&self, role: Role) -> Result<LlmConfig, HarnessError> {
        let section = self.section(role);
        let preset_name = section.preset.as_ref().or(self.defaults.preset.as_ref());

        let mut config = LlmConfig::builtin();
        if let Some(name) = preset_name {
            let preset = LlmConfig::preset(name)
                .ok_or_else(|| HarnessError::Config(format!("unknown preset '{name}'")))?;
            config = merge(&config, &preset);
        }
        config = merge(&config, &self.defaults.llm);
        Ok(merge(&config, &section.llm))
    }

    /// [`HarnessConfig::layered`] plus `HARNESS_*` environment overrides.
    pub fn resolve(&self, role: Role) -> Result<LlmConfig, HarnessError> {
        self.layered(role)?
            .with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn roles(&self) -> Result<BTreeMap<&'static str, LlmConfig>, HarnessError> {
        [Role::User, Role::Assistant, Role::Analyzer]
            .into_iter()
            .map(|role| Ok((role.as_str(), self.resolve(role)?)))
            .collect()
    }
}
