use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Back-end selector tag. `None` is the sentinel returned when a cell names a
/// model the configuration store does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Api {
    Openai,
    Together,
    Google,
    Azure,
    OpenaiImagegen,
    AzureImagegen,
    None,
}

impl Api {
    /// Whether user messages may carry inline image parts on this wire.
    /// Non-multimodal back-ends get image markdown stripped instead.
    pub fn supports_image_input(self) -> bool {
        matches!(self, Api::Openai | Api::Azure | Api::Google)
    }

    pub fn is_image_generation(self) -> bool {
        matches!(self, Api::OpenaiImagegen | Api::AzureImagegen)
    }
}

fn default_true() -> bool {
    true
}

/// One entry of the host's model configuration, immutable for the duration of
/// a cell execution. Named fields are the reserved keys; everything else the
/// host configured lands in `extra` and is passed through to the provider
/// payload verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub name: String,
    pub api: Api,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "truncateTokens")]
    pub truncate_tokens: Option<usize>,
    #[serde(default = "default_true", rename = "truncateSysPrompt")]
    pub truncate_sys_prompt: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelConfig {
    /// Sentinel config for "no such model"; dispatch refuses it before any
    /// network call.
    pub fn none() -> Self {
        Self {
            name: String::new(),
            api: Api::None,
            model: String::new(),
            api_key: String::new(),
            url: None,
            truncate_tokens: None,
            truncate_sys_prompt: true,
            extra: Map::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api == Api::None {
            bail!("No valid model specified");
        }

        if let Some(url) = &self.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!(
                    "Invalid url '{}' for model '{}': expected http:// or https:// URL",
                    url,
                    self.name
                );
            }
        }

        if matches!(self.api, Api::Azure | Api::AzureImagegen) && self.url.is_none() {
            bail!(
                "Model '{}' uses the Azure API and must configure a deployment url",
                self.name
            );
        }

        if self.api_key.trim().is_empty() {
            bail!("Model '{}' has no api_key configured", self.name);
        }

        if self.model.is_empty() && !matches!(self.api, Api::Azure | Api::AzureImagegen) {
            // Azure routes by deployment URL, everything else names the model
            // in the request body.
            bail!("Model '{}' has no model identifier configured", self.name);
        }

        Ok(())
    }
}

/// Host-owned model configuration set; the core only ever reads it.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelConfig>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelConfig>) -> Self {
        Self { models }
    }

    /// Parse the host's `models` JSON array.
    pub fn from_json(json: &str) -> Result<Self> {
        let models: Vec<ModelConfig> = serde_json::from_str(json)?;
        Ok(Self { models })
    }

    /// Lookup by configured name; unknown names resolve to the `none`
    /// sentinel rather than an error.
    pub fn find(&self, name: &str) -> ModelConfig {
        self.models
            .iter()
            .find(|model| model.name == name)
            .cloned()
            .unwrap_or_else(ModelConfig::none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"[
            {
                "name": "gpt4",
                "api": "openai",
                "model": "gpt-4-turbo",
                "api_key": "sk-test",
                "truncateTokens": 4000,
                "temperature": 0.2,
                "max_tokens": 512
            },
            {
                "name": "llama",
                "api": "together",
                "model": "togethercomputer/llama-2-70b-chat",
                "api_key": "tk-test",
                "max_tokens": 1024,
                "stop": ["</s>", "[INST]"]
            },
            {
                "name": "dalle",
                "api": "openai-imagegen",
                "model": "dall-e-3",
                "api_key": "sk-test",
                "size": "1024x1024"
            }
        ]"#
    }

    #[test]
    fn test_registry_parses_models_and_tuning_extras() {
        let registry = ModelRegistry::from_json(sample_json()).unwrap();
        let gpt4 = registry.find("gpt4");
        assert_eq!(gpt4.api, Api::Openai);
        assert_eq!(gpt4.truncate_tokens, Some(4000));
        assert!(gpt4.truncate_sys_prompt);
        assert_eq!(gpt4.extra.get("temperature"), Some(&serde_json::json!(0.2)));
        assert_eq!(gpt4.extra.get("max_tokens"), Some(&serde_json::json!(512)));
        // Reserved keys never leak into the passthrough map.
        assert!(gpt4.extra.get("api_key").is_none());
        assert!(gpt4.extra.get("truncateTokens").is_none());
        assert!(gpt4.extra.get("model").is_none());
    }

    #[test]
    fn test_unknown_model_resolves_to_none_sentinel() {
        let registry = ModelRegistry::from_json(sample_json()).unwrap();
        let missing = registry.find("does-not-exist");
        assert_eq!(missing.api, Api::None);
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_validate_requires_azure_url() {
        let mut config = ModelConfig::none();
        config.name = "azure".to_string();
        config.api = Api::Azure;
        config.api_key = "key".to_string();
        assert!(config.validate().is_err());

        config.url = Some("https://example.openai.azure.com/openai/deployments/d/chat/completions?api-version=2024-02-01".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut config = ModelConfig::none();
        config.name = "bad".to_string();
        config.api = Api::Openai;
        config.model = "gpt-4".to_string();
        config.api_key = "key".to_string();
        config.url = Some("ftp://example.com".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_image_input_capability_per_api() {
        assert!(Api::Openai.supports_image_input());
        assert!(Api::Azure.supports_image_input());
        assert!(Api::Google.supports_image_input());
        assert!(!Api::Together.supports_image_input());
        assert!(!Api::OpenaiImagegen.supports_image_input());
        assert!(!Api::None.supports_image_input());
    }
}
