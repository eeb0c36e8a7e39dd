//! Config file loading and model provider resolution
//!
//! Resolution order, later wins:
//!   1. built-in defaults (`RecallConfig::new`)
//!   2. `config.toml` (`--config`, default `~/.recall/config.toml`)
//!   3. environment (`RECALL_MODEL`, `RECALL_MEMORY_FILE`)
//!   4. CLI flags (applied by the binary)
//!
//! Providers: built-in entries (ollama, ollama-chat, lmstudio, openai) are
//! merged with user-defined `[model_providers.*]` tables.

use crate::{MemoryMode, RecallConfig, RecallError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wire format spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireApi {
    /// Ollama native API (/api/chat)
    Ollama,
    /// OpenAI Chat Completions API (/chat/completions)
    Chat,
}

/// A resolved model provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Provider id as written in config
    pub id: String,
    pub base_url: String,
    pub wire_api: WireApi,
    /// Environment variable holding the bearer token, if any
    pub env_key: Option<String>,
}

impl ProviderSettings {
    /// The default provider: a local Ollama server
    pub fn ollama() -> Self {
        let base_url = std::env::var("OLLAMA_HOST")
            .map(|host| normalize_ollama_host(&host))
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        Self {
            id: "ollama".to_string(),
            base_url,
            wire_api: WireApi::Ollama,
            env_key: None,
        }
    }

    /// Whether failures should come with Ollama setup hints
    pub fn is_ollama(&self) -> bool {
        self.id.starts_with("ollama")
    }
}

/// `OLLAMA_HOST` is often given without a scheme (`127.0.0.1:11434`).
fn normalize_ollama_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

/// On-disk config file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigToml {
    pub model: Option<String>,

    /// Separate model for the extraction call
    pub extractor_model: Option<String>,

    /// Active provider id
    pub model_provider: Option<String>,

    pub memory_file: Option<PathBuf>,
    pub max_turns: Option<usize>,
    pub extract_every: Option<usize>,
    pub extract_window: Option<usize>,
    pub debug_memory: Option<bool>,

    /// "stateless", "short-term" or "long-term"
    pub mode: Option<String>,

    pub request_timeout_secs: Option<u64>,

    /// Custom providers, merged over the built-ins
    pub model_providers: HashMap<String, ModelProviderConfig>,

    pub redaction: RedactionToml,
}

/// `[model_providers.<id>]`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelProviderConfig {
    pub base_url: Option<String>,

    /// "ollama" or "chat"
    pub wire_api: Option<String>,

    /// Environment variable for the API key
    pub env_key: Option<String>,
}

/// `[redaction]`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RedactionToml {
    pub extra_key_markers: Vec<String>,
    pub extra_value_markers: Vec<String>,
}

fn built_in_model_providers() -> HashMap<String, ModelProviderConfig> {
    let ollama = ProviderSettings::ollama();
    let mut map = HashMap::new();

    map.insert(
        "ollama".to_string(),
        ModelProviderConfig {
            base_url: Some(ollama.base_url.clone()),
            wire_api: Some("ollama".to_string()),
            env_key: None,
        },
    );

    // Ollama's OpenAI-compatible endpoint
    map.insert(
        "ollama-chat".to_string(),
        ModelProviderConfig {
            base_url: Some(format!("{}/v1", ollama.base_url)),
            wire_api: Some("chat".to_string()),
            env_key: None,
        },
    );

    map.insert(
        "lmstudio".to_string(),
        ModelProviderConfig {
            base_url: Some("http://localhost:1234/v1".to_string()),
            wire_api: Some("chat".to_string()),
            env_key: None,
        },
    );

    map.insert(
        "openai".to_string(),
        ModelProviderConfig {
            base_url: Some(
                std::env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            ),
            wire_api: Some("chat".to_string()),
            env_key: Some("OPENAI_API_KEY".to_string()),
        },
    );

    map
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".recall").join("config.toml"))
}

impl ConfigToml {
    /// Read a config file. A missing file is not an error.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("No config file at {:?}", path);
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(path).await?;
        let parsed = toml::from_str::<ConfigToml>(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(Some(parsed))
    }

    /// Overlay this file onto `config`
    pub fn apply(self, mut config: RecallConfig, cwd: &Path) -> Result<RecallConfig> {
        if let Some(model) = self.model {
            config = config.with_model(model);
        }
        if let Some(model) = self.extractor_model {
            config = config.with_extractor_model(model);
        }
        if let Some(path) = self.memory_file {
            // Relative paths are relative to the working directory
            config.memory_file = if path.is_absolute() { path } else { cwd.join(path) };
        }
        if let Some(n) = self.max_turns {
            config.max_turns = n;
        }
        if let Some(n) = self.extract_every {
            config.extract_every = n;
        }
        if let Some(n) = self.extract_window {
            config.extract_window = n;
        }
        if let Some(debug) = self.debug_memory {
            config.debug_memory = debug;
        }
        if let Some(mode) = self.mode {
            config.mode = parse_mode(&mode)
                .ok_or_else(|| RecallError::Config(format!("unknown mode '{}'", mode)))?;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
            .extra_key_markers
            .extend(self.redaction.extra_key_markers);
        config
            .extra_value_markers
            .extend(self.redaction.extra_value_markers);

        let provider_id = self.model_provider.unwrap_or_else(|| "ollama".to_string());
        config.provider = resolve_provider(&provider_id, self.model_providers)?;

        Ok(config)
    }
}

/// Look up `provider_id` among built-in and user-defined providers
pub fn resolve_provider(
    provider_id: &str,
    user_providers: HashMap<String, ModelProviderConfig>,
) -> Result<ProviderSettings> {
    let mut providers = built_in_model_providers();
    for (key, prov) in user_providers {
        providers.insert(key, prov);
    }

    let provider = providers.get(provider_id).ok_or_else(|| {
        RecallError::Config(format!("unknown model provider '{}'", provider_id))
    })?;

    let wire_api = match provider.wire_api.as_deref() {
        Some("ollama") | None => WireApi::Ollama,
        Some("chat") => WireApi::Chat,
        Some(other) => {
            warn!("Unknown wire_api '{}', using chat completions", other);
            WireApi::Chat
        }
    };

    let base_url = provider
        .base_url
        .clone()
        .ok_or_else(|| {
            RecallError::Config(format!("provider '{}' has no base_url", provider_id))
        })?
        .trim_end_matches('/')
        .to_string();

    Ok(ProviderSettings {
        id: provider_id.to_string(),
        base_url,
        wire_api,
        env_key: provider.env_key.clone(),
    })
}

/// Apply `RECALL_*` environment overrides
pub fn apply_env(mut config: RecallConfig) -> RecallConfig {
    if let Ok(model) = std::env::var("RECALL_MODEL") {
        if !model.trim().is_empty() {
            config = config.with_model(model.trim());
        }
    }
    if let Ok(path) = std::env::var("RECALL_MEMORY_FILE") {
        if !path.trim().is_empty() {
            config.memory_file = PathBuf::from(path.trim());
        }
    }
    config
}

/// Parse a `--mode` style value from config text
pub fn parse_mode(s: &str) -> Option<MemoryMode> {
    match s.trim().to_lowercase().replace('_', "-").as_str() {
        "stateless" | "none" => Some(MemoryMode::Stateless),
        "short-term" | "short" => Some(MemoryMode::ShortTerm),
        "long-term" | "long" => Some(MemoryMode::LongTerm),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_toml() {
        let text = r#"
model = "qwen2.5:7b"
extractor_model = "llama3.2:3b"
model_provider = "local"
max_turns = 10
mode = "short-term"
memory_file = "facts.json"

[model_providers.local]
base_url = "http://10.0.0.5:8080/v1/"
wire_api = "chat"

[redaction]
extra_key_markers = ["ssn"]
"#;
        let parsed: ConfigToml = toml::from_str(text).unwrap();
        let cwd = PathBuf::from("/work");
        let config = parsed
            .apply(RecallConfig::new(cwd.clone()), &cwd)
            .unwrap();

        assert_eq!(config.model, "qwen2.5:7b");
        assert_eq!(config.extractor_model, "llama3.2:3b");
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.mode, MemoryMode::ShortTerm);
        assert_eq!(config.memory_file, PathBuf::from("/work/facts.json"));
        assert_eq!(config.provider.base_url, "http://10.0.0.5:8080/v1");
        assert_eq!(config.provider.wire_api, WireApi::Chat);
        assert_eq!(config.extra_key_markers, vec!["ssn".to_string()]);
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let result = resolve_provider("nope", HashMap::new());
        assert!(matches!(result, Err(RecallError::Config(_))));
    }

    #[test]
    fn test_openai_provider_uses_env_key() {
        let provider = resolve_provider("openai", HashMap::new()).unwrap();
        assert_eq!(provider.wire_api, WireApi::Chat);
        assert_eq!(provider.env_key.as_deref(), Some("OPENAI_API_KEY"));
        assert!(!provider.is_ollama());
    }

    #[test]
    fn test_normalize_ollama_host() {
        assert_eq!(normalize_ollama_host("127.0.0.1:11434"), "http://127.0.0.1:11434");
        assert_eq!(normalize_ollama_host("https://gpu.local/"), "https://gpu.local");
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("short_term"), Some(MemoryMode::ShortTerm));
        assert_eq!(parse_mode("Long-Term"), Some(MemoryMode::LongTerm));
        assert_eq!(parse_mode("none"), Some(MemoryMode::Stateless));
        assert_eq!(parse_mode("forever"), None);
    }
}
