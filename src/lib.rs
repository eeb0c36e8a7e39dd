//! Recall - personal assistant chat with two memory tiers
//!
//! A chat loop over a language model that keeps:
//! - a bounded short-term window of the active conversation
//! - a durable long-term fact store, filled automatically by a secondary
//!   extraction call every few user turns

pub mod assistant;
pub mod config;
pub mod memory;
pub mod protocol;

pub use assistant::{ChatClient, ChatModel, Session, TurnOutcome};
pub use config::{ProviderSettings, WireApi};
pub use memory::{Fact, FactStore, MemoryExtractor, RedactionFilter};
pub use protocol::{Message, Role};

use std::path::PathBuf;
use std::time::Duration;

/// Default chat model (what a stock local Ollama install usually has pulled)
pub const DEFAULT_MODEL: &str = "llama3.1:8b";

/// Short-term window size, in non-system messages
pub const DEFAULT_MAX_TURNS: usize = 18;

/// Run an extraction round every N successful user turns
pub const DEFAULT_EXTRACT_EVERY: usize = 2;

/// Number of trailing messages handed to the extractor
pub const DEFAULT_EXTRACT_WINDOW: usize = 8;

/// Which memory tiers the chat loop uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MemoryMode {
    /// No memory: every request is the system directive plus the current message
    Stateless,
    /// Windowed conversation history only
    ShortTerm,
    /// Windowed history plus the automatically populated fact store
    #[default]
    LongTerm,
}

/// Configuration for Recall
#[derive(Debug, Clone)]
pub struct RecallConfig {
    /// Model used for the conversation
    pub model: String,

    /// Model used for fact extraction (defaults to `model`)
    pub extractor_model: String,

    /// Resolved model provider
    pub provider: ProviderSettings,

    /// Path to the long-term fact store
    pub memory_file: PathBuf,

    /// Short-term window size in non-system messages
    pub max_turns: usize,

    /// Extraction cadence in successful user turns
    pub extract_every: usize,

    /// Trailing messages sent to the extractor
    pub extract_window: usize,

    /// Which memory tiers are active
    pub mode: MemoryMode,

    /// Surface extraction diagnostics to the user
    pub debug_memory: bool,

    /// Upper bound on a single model request
    pub request_timeout: Duration,

    /// Redaction markers added on top of the built-in denylists
    pub extra_key_markers: Vec<String>,
    pub extra_value_markers: Vec<String>,
}

impl RecallConfig {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            extractor_model: DEFAULT_MODEL.to_string(),
            provider: ProviderSettings::ollama(),
            memory_file: cwd.join("memory.json"),
            max_turns: DEFAULT_MAX_TURNS,
            extract_every: DEFAULT_EXTRACT_EVERY,
            extract_window: DEFAULT_EXTRACT_WINDOW,
            mode: MemoryMode::LongTerm,
            debug_memory: false,
            request_timeout: Duration::from_secs(120),
            extra_key_markers: Vec::new(),
            extra_value_markers: Vec::new(),
        }
    }

    /// Set the chat model. The extractor follows unless it was overridden.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if self.extractor_model == self.model {
            self.extractor_model = model.clone();
        }
        self.model = model;
        self
    }

    pub fn with_extractor_model(mut self, model: impl Into<String>) -> Self {
        self.extractor_model = model.into();
        self
    }

    pub fn with_memory_file(mut self, path: PathBuf) -> Self {
        self.memory_file = path;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_extract_every(mut self, every: usize) -> Self {
        self.extract_every = every;
        self
    }

    pub fn with_mode(mut self, mode: MemoryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_debug_memory(mut self, debug: bool) -> Self {
        self.debug_memory = debug;
        self
    }

    /// Reject settings the chat loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(RecallError::Config("max_turns must be at least 1".to_string()));
        }
        if self.extract_every == 0 {
            return Err(RecallError::Config(
                "extract_every must be at least 1".to_string(),
            ));
        }
        if self.extract_window == 0 {
            return Err(RecallError::Config(
                "extract_window must be at least 1".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(RecallError::Config("model must not be empty".to_string()));
        }
        Ok(())
    }

    /// Redaction filter with the configured extra markers applied
    pub fn redaction_filter(&self) -> RedactionFilter {
        RedactionFilter::default()
            .with_key_markers(self.extra_key_markers.iter().cloned())
            .with_value_markers(self.extra_value_markers.iter().cloned())
    }
}

/// Result type for Recall operations
pub type Result<T> = std::result::Result<T, RecallError>;

/// Errors that can occur in Recall
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extractor_model_follows_chat_model() {
        let config = RecallConfig::new(PathBuf::from(".")).with_model("qwen2.5:7b");
        assert_eq!(config.extractor_model, "qwen2.5:7b");

        let config = RecallConfig::new(PathBuf::from("."))
            .with_extractor_model("llama3.2:3b")
            .with_model("qwen2.5:7b");
        assert_eq!(config.model, "qwen2.5:7b");
        assert_eq!(config.extractor_model, "llama3.2:3b");
    }

    #[test]
    fn test_validate_rejects_zero_cadence() {
        let config = RecallConfig::new(PathBuf::from(".")).with_extract_every(0);
        assert!(matches!(config.validate(), Err(RecallError::Config(_))));

        let config = RecallConfig::new(PathBuf::from(".")).with_max_turns(0);
        assert!(config.validate().is_err());

        assert!(RecallConfig::new(PathBuf::from(".")).validate().is_ok());
    }

    #[test]
    fn test_default_memory_file_in_cwd() {
        let config = RecallConfig::new(PathBuf::from("/tmp/project"));
        assert_eq!(config.memory_file, PathBuf::from("/tmp/project/memory.json"));
    }
}
