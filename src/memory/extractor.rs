//! Automatic long-term memory extraction.
//!
//! One extraction round:
//!   1. Render the recent messages as a `ROLE: content` transcript
//!   2. Ask the extractor model for a JSON array of `{key, value}` records
//!   3. Recover the array from the reply (fences, prose around it)
//!   4. Drop malformed records and anything the redaction filter flags
//!   5. Upsert the rest into the fact store
//!
//! Every failure is reported as an `ExtractionError`; the chat loop treats
//! all of them as "no facts this round".

use super::fact_store::{Fact, FactStore};
use super::prompt::{build_transcript, EXTRACTOR_PROMPT};
use super::redaction::RedactionFilter;
use crate::assistant::responder::parse_fact_array;
use crate::assistant::ChatModel;
use crate::protocol::Message;
use serde_json::Value;
use tracing::{debug, info};

/// Why an extraction round produced nothing
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("extractor call failed: {0}")]
    Model(String),

    #[error("extractor returned no JSON array")]
    NoPayload,

    #[error("extractor JSON did not parse: {0}")]
    InvalidJson(String),

    #[error("extracted JSON is not a list")]
    NotAnArray,

    #[error("fact store error: {0}")]
    Store(String),
}

/// A decoded record not yet validated
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionCandidate {
    pub key: Option<Value>,
    pub value: Option<Value>,
}

impl ExtractionCandidate {
    /// Only JSON objects are candidates
    pub fn from_value(item: &Value) -> Option<Self> {
        let obj = item.as_object()?;
        Some(Self {
            key: obj.get("key").cloned(),
            value: obj.get("value").cloned(),
        })
    }

    /// Trimmed `(key, value)` text, if both fields are present
    pub fn into_parts(self) -> Option<(String, String)> {
        let key = coerce_text(self.key?);
        let value = coerce_text(self.value?);
        Some((key, value))
    }
}

/// Strings as-is, `null` as empty, anything else as its JSON text
fn coerce_text(value: Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Runs extraction rounds against a fact store
pub struct MemoryExtractor {
    store: FactStore,
    filter: RedactionFilter,
    model: String,
}

impl MemoryExtractor {
    pub fn new(store: FactStore, filter: RedactionFilter, model: impl Into<String>) -> Self {
        Self {
            store,
            filter,
            model: model.into(),
        }
    }

    pub fn store(&self) -> &FactStore {
        &self.store
    }

    /// Messages for the secondary call: extraction directive + transcript
    pub fn build_request(recent: &[Message]) -> Vec<Message> {
        vec![
            Message::system(EXTRACTOR_PROMPT),
            Message::user(build_transcript(recent)),
        ]
    }

    /// Run one round over `recent` and return the facts actually persisted.
    pub async fn extract<M>(
        &self,
        client: &M,
        recent: &[Message],
    ) -> Result<Vec<Fact>, ExtractionError>
    where
        M: ChatModel + ?Sized,
    {
        let request = Self::build_request(recent);
        let reply = client
            .chat(&self.model, &request)
            .await
            .map_err(|e| ExtractionError::Model(e.to_string()))?;
        debug!("Extractor raw output: {}", reply);

        let items = parse_fact_array(&reply)?;
        self.persist(&items).await
    }

    /// Validate, filter and upsert decoded records
    pub async fn persist(&self, items: &[Value]) -> Result<Vec<Fact>, ExtractionError> {
        let mut saved = Vec::new();

        for item in items {
            let Some((key, value)) =
                ExtractionCandidate::from_value(item).and_then(ExtractionCandidate::into_parts)
            else {
                debug!("Skipping malformed memory record: {}", item);
                continue;
            };

            if self.filter.is_secret(&key, &value) {
                debug!("Redacted a candidate memory (key length {})", key.len());
                continue;
            }

            let stored = self
                .store
                .upsert(&key, &value)
                .await
                .map_err(|e| ExtractionError::Store(e.to_string()))?;
            if let Some(fact) = stored {
                saved.push(fact);
            }
        }

        if !saved.is_empty() {
            info!("Saved {} memories", saved.len());
        }
        Ok(saved)
    }
}
