//! Memory module for Recall
//!
//! Short-term: a bounded window over the active conversation.
//! Long-term: a JSON fact store filled by periodic extraction rounds.

mod extractor;
mod fact_store;
mod prompt;
mod redaction;
mod window;

pub use extractor::{ExtractionCandidate, ExtractionError, MemoryExtractor};
pub use fact_store::{render_facts, Fact, FactStore, EMPTY_SENTINEL};
pub use prompt::{build_system_prompt, build_transcript, BASIC_SYSTEM_PROMPT, EXTRACTOR_PROMPT};
pub use redaction::RedactionFilter;
pub use window::trim_history;
