//! Assistant module
//!
//! The model client, the parser for its semi-structured replies, and the
//! conversation session that ties them to memory.

mod client;
pub mod responder;
mod session;

pub use client::{strip_think_tags, ChatClient, ChatModel};
pub use responder::{extract_json_array, parse_fact_array, strip_code_fences};
pub use session::{Session, TurnOutcome, EXIT_COMMAND, MEMORY_COMMAND};
