//! Conversation session: the state the chat loop threads through every turn.
//!
//! Per user turn (long-term mode):
//!   append user message → trim window → primary call → append reply →
//!   every Nth successful turn run an extraction round → rebuild the pinned
//!   system message from the fact store.
//!
//! Nothing here is fatal. A failed primary call is reported and leaves the
//! history without a phantom reply; extraction failures are swallowed.

use super::ChatModel;
use crate::memory::{
    build_system_prompt, trim_history, ExtractionError, Fact, FactStore, MemoryExtractor,
    BASIC_SYSTEM_PROMPT,
};
use crate::protocol::Message;
use crate::{MemoryMode, RecallConfig, Result};
use tracing::{debug, info, warn};

/// Input that ends the session (case-insensitive)
pub const EXIT_COMMAND: &str = "exit";

/// Input that prints long-term memory without a model call
pub const MEMORY_COMMAND: &str = "/memory";

const OLLAMA_HINTS: &[&str] = &[
    "make sure Ollama is running:  ollama serve",
    "make sure the model exists:  ollama list",
];

/// What one line of input led to
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The user asked to leave
    Exit,
    /// Blank input
    Ignored,
    /// `/memory`: the rendered fact store
    Memory(String),
    /// The assistant answered
    Reply {
        text: String,
        /// Facts persisted by an extraction round this turn
        saved: Vec<Fact>,
        /// Extraction diagnostics, only in debug-memory mode
        notices: Vec<String>,
    },
    /// The primary call failed
    Failed {
        error: String,
        hints: Vec<&'static str>,
    },
}

/// One interactive conversation
pub struct Session<M: ChatModel> {
    client: M,
    config: RecallConfig,
    messages: Vec<Message>,
    user_turns: usize,
    extractor: Option<MemoryExtractor>,
}

impl<M: ChatModel> Session<M> {
    /// Start a session. In long-term mode the fact store is created if
    /// missing and the pinned system message is built from it.
    pub async fn new(client: M, config: RecallConfig) -> Result<Self> {
        config.validate()?;

        let extractor = match config.mode {
            MemoryMode::LongTerm => {
                let store = FactStore::new(config.memory_file.clone());
                store.ensure_exists().await?;
                Some(MemoryExtractor::new(
                    store,
                    config.redaction_filter(),
                    config.extractor_model.clone(),
                ))
            }
            MemoryMode::ShortTerm | MemoryMode::Stateless => None,
        };

        let system_prompt = match &extractor {
            Some(extractor) => build_system_prompt(&extractor.store().render().await?),
            None => BASIC_SYSTEM_PROMPT.to_string(),
        };

        info!(
            "Session started: mode={:?}, model={}, max_turns={}, extract_every={}",
            config.mode, config.model, config.max_turns, config.extract_every
        );

        Ok(Self {
            client,
            config,
            messages: vec![Message::system(system_prompt)],
            user_turns: 0,
            extractor,
        })
    }

    /// Active conversation, pinned system message first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Content of the pinned system message
    pub fn system_prompt(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Successful user turns so far
    pub fn user_turns(&self) -> usize {
        self.user_turns
    }

    pub fn fact_store(&self) -> Option<&FactStore> {
        self.extractor.as_ref().map(MemoryExtractor::store)
    }

    pub fn client(&self) -> &M {
        &self.client
    }

    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    /// Dispatch one line of user input
    pub async fn handle_input(&mut self, line: &str) -> TurnOutcome {
        let input = line.trim();
        if input.is_empty() {
            return TurnOutcome::Ignored;
        }
        if input.eq_ignore_ascii_case(EXIT_COMMAND) {
            return TurnOutcome::Exit;
        }
        if input == MEMORY_COMMAND {
            return TurnOutcome::Memory(self.memory_report().await);
        }
        self.send(input).await
    }

    /// Long-term memory as shown by `/memory`
    pub async fn memory_report(&self) -> String {
        match self.fact_store() {
            Some(store) => match store.render().await {
                Ok(rendered) => rendered,
                Err(e) => format!("(unavailable: {e})"),
            },
            None => format!(
                "(long-term memory is disabled in {} mode)",
                mode_name(self.config.mode)
            ),
        }
    }

    /// Run one conversation turn for `input`
    pub async fn send(&mut self, input: &str) -> TurnOutcome {
        if self.config.mode == MemoryMode::Stateless {
            let request = vec![Message::system(BASIC_SYSTEM_PROMPT), Message::user(input)];
            let result = self.client.chat(&self.config.model, &request).await;
            return match result {
                Ok(text) => {
                    self.user_turns += 1;
                    TurnOutcome::Reply {
                        text,
                        saved: Vec::new(),
                        notices: Vec::new(),
                    }
                }
                Err(e) => self.failure(e.to_string()),
            };
        }

        self.messages.push(Message::user(input));
        self.messages = trim_history(&self.messages, self.config.max_turns);

        let result = self.client.chat(&self.config.model, &self.messages).await;
        let text = match result {
            Ok(text) => text,
            Err(e) => return self.failure(e.to_string()),
        };
        self.messages.push(Message::assistant(text.clone()));
        self.user_turns += 1;

        let mut saved = Vec::new();
        let mut notices = Vec::new();
        if self.extractor.is_some() && self.user_turns % self.config.extract_every == 0 {
            match self.run_extraction().await {
                Ok(facts) => {
                    if facts.is_empty() && self.config.debug_memory {
                        notices.push("No new stable memory found this round.".to_string());
                    }
                    saved = facts;
                }
                Err(e) => {
                    debug!("Memory extraction produced nothing: {}", e);
                    if self.config.debug_memory {
                        notices.push(format!("Memory extraction error (ignored): {e}"));
                    }
                }
            }
            self.refresh_system_prompt().await;
        }

        TurnOutcome::Reply {
            text,
            saved,
            notices,
        }
    }

    /// Extract from the trailing `extract_window` messages
    async fn run_extraction(&self) -> std::result::Result<Vec<Fact>, ExtractionError> {
        let Some(extractor) = &self.extractor else {
            return Ok(Vec::new());
        };
        let start = self
            .messages
            .len()
            .saturating_sub(self.config.extract_window);
        extractor.extract(&self.client, &self.messages[start..]).await
    }

    /// Rewrite the pinned system message from the current fact store
    async fn refresh_system_prompt(&mut self) {
        let Some(store) = self.fact_store() else {
            return;
        };
        let rendered = match store.render().await {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Keeping previous system prompt, fact store unreadable: {}", e);
                return;
            }
        };
        let prompt = build_system_prompt(&rendered);
        match self.messages.first_mut() {
            Some(first) if first.is_system() => first.content = prompt,
            _ => self.messages.insert(0, Message::system(prompt)),
        }
    }

    fn failure(&self, error: String) -> TurnOutcome {
        warn!("Primary model call failed: {}", error);
        let hints = if self.config.provider.is_ollama() {
            OLLAMA_HINTS.to_vec()
        } else {
            Vec::new()
        };
        TurnOutcome::Failed { error, hints }
    }
}

fn mode_name(mode: MemoryMode) -> &'static str {
    match mode {
        MemoryMode::Stateless => "stateless",
        MemoryMode::ShortTerm => "short-term",
        MemoryMode::LongTerm => "long-term",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Role;
    use crate::RecallError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays canned replies and records every request
    struct Scripted {
        replies: Mutex<VecDeque<Result<String>>>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn chat(&self, _model: &str, messages: &[Message]) -> Result<String> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    fn config_in(dir: &TempDir) -> RecallConfig {
        RecallConfig::new(dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn test_commands_do_not_call_model() {
        let dir = TempDir::new().unwrap();
        let mut session = Session::new(Scripted::new(vec![]), config_in(&dir))
            .await
            .unwrap();

        assert_eq!(session.handle_input("   ").await, TurnOutcome::Ignored);
        assert_eq!(
            session.handle_input("/memory").await,
            TurnOutcome::Memory("(empty)".to_string())
        );
        assert_eq!(session.handle_input(" EXIT ").await, TurnOutcome::Exit);
        assert_eq!(session.client.request_count(), 0);
        assert_eq!(session.user_turns(), 0);
    }

    #[tokio::test]
    async fn test_failed_call_adds_no_assistant_turn() {
        let dir = TempDir::new().unwrap();
        let client = Scripted::new(vec![Err(RecallError::Model("connection: refused".into()))]);
        let mut session = Session::new(client, config_in(&dir)).await.unwrap();

        let outcome = session.handle_input("hello").await;
        match outcome {
            TurnOutcome::Failed { error, hints } => {
                assert!(error.contains("refused"));
                assert_eq!(hints.len(), 2);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(session.user_turns(), 0);
        assert!(session
            .messages()
            .iter()
            .all(|m| m.role != Role::Assistant));
    }

    #[tokio::test]
    async fn test_window_bounds_history() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir)
            .with_mode(MemoryMode::ShortTerm)
            .with_max_turns(4);
        let mut session = Session::new(Scripted::new(vec![]), config).await.unwrap();

        for i in 0..5 {
            session.handle_input(&format!("msg {i}")).await;
        }
        // Window is applied before the reply is appended
        assert!(session.messages().len() <= 4 + 2);
        assert!(session.messages()[0].is_system());
        assert_eq!(session.messages().last().unwrap().content, "ok");
    }

    #[tokio::test]
    async fn test_stateless_sends_only_current_message() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir).with_mode(MemoryMode::Stateless);
        let mut session = Session::new(Scripted::new(vec![]), config).await.unwrap();

        session.handle_input("first").await;
        session.handle_input("second").await;

        let requests = session.client.requests.lock().unwrap();
        assert_eq!(requests[1].len(), 2);
        assert_eq!(requests[1][1].content, "second");
        assert!(!dir.path().join("memory.json").exists());
    }

    #[tokio::test]
    async fn test_extraction_cadence() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir).with_extract_every(3);
        let mut session = Session::new(Scripted::new(vec![]), config).await.unwrap();

        session.handle_input("one").await;
        session.handle_input("two").await;
        assert_eq!(session.client.request_count(), 2);

        // Third turn: primary + extraction
        session.handle_input("three").await;
        assert_eq!(session.client.request_count(), 4);
    }

    #[tokio::test]
    async fn test_debug_memory_reports_parse_failure() {
        let dir = TempDir::new().unwrap();
        let client = Scripted::new(vec![
            Ok("Hi!".to_string()),
            Ok("Sure.".to_string()),
            Ok("No memories found.".to_string()),
        ]);
        let config = config_in(&dir).with_debug_memory(true);
        let mut session = Session::new(client, config).await.unwrap();

        session.handle_input("hi").await;
        let outcome = session.handle_input("thanks").await;
        match outcome {
            TurnOutcome::Reply { saved, notices, .. } => {
                assert!(saved.is_empty());
                assert_eq!(notices.len(), 1);
                assert!(notices[0].contains("no JSON array"));
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_memory_disabled_in_short_term_mode() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir).with_mode(MemoryMode::ShortTerm);
        let mut session = Session::new(Scripted::new(vec![]), config).await.unwrap();

        match session.handle_input("/memory").await {
            TurnOutcome::Memory(text) => assert!(text.contains("short-term")),
            other => panic!("expected memory report, got {:?}", other),
        }
    }
}
