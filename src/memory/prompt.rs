//! Prompt text for the chat model and the memory extractor

use crate::protocol::Message;

/// System directive used when long-term memory is off
pub const BASIC_SYSTEM_PROMPT: &str = r#"You are a helpful personal assistant.
Rules:
- Be friendly and clear
- Be concise
- Ask at most ONE clarification question if needed
"#;

/// System directive for the extraction call
pub const EXTRACTOR_PROMPT: &str = r#"You are a memory extractor for a personal assistant.

Extract ONLY stable user facts and preferences that help personalization.

What to extract (examples):
- name
- preferred tone/style (e.g., "bullet points", "short answers")
- long-term goals (e.g., "learn Rust", "build a chatbot")
- recurring projects or interests

What NOT to extract:
- secrets (passwords, API keys, tokens)
- one-time temporary details (unless clearly important long-term)
- sensitive personal data (addresses, IDs, etc.)

OUTPUT MUST BE ONLY JSON.
Return ONLY a JSON array like:
[
  {"key": "name", "value": "Sam"},
  {"key": "tone", "value": "concise bullet points"}
]
If nothing to save, return: []
"#;

/// Pinned system directive with the rendered long-term memory block
pub fn build_system_prompt(memory_block: &str) -> String {
    format!(
        r#"You are a helpful personal AI assistant.

Long-term memory about the user:
{memory_block}

Rules:
- Use long-term memory when helpful (name, preferences, goals)
- Be friendly and concise
- Ask at most ONE clarification question if needed
- NEVER ask the user for secrets (passwords, API keys)
"#
    )
}

/// `ROLE: content` per non-system message, in order
pub fn build_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| !m.is_system())
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_skips_system() {
        let msgs = vec![
            Message::system("secret rules"),
            Message::user("My name is Sam"),
            Message::assistant("Nice to meet you, Sam!"),
        ];
        assert_eq!(
            build_transcript(&msgs),
            "USER: My name is Sam\nASSISTANT: Nice to meet you, Sam!"
        );
    }

    #[test]
    fn test_system_prompt_embeds_memory() {
        let prompt = build_system_prompt("- name: Sam");
        assert!(prompt.contains("Long-term memory about the user:\n- name: Sam\n"));
    }
}
