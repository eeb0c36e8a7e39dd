//! Short-term memory: bounded conversation window

use crate::protocol::Message;

/// Keep the first system message plus the last `max_turns` non-system messages.
///
/// Any later system messages are dropped, so the result holds at most one
/// and it is always first. Applying this twice gives the same result as once.
pub fn trim_history(messages: &[Message], max_turns: usize) -> Vec<Message> {
    let system = messages.iter().find(|m| m.is_system());
    let rest: Vec<&Message> = messages.iter().filter(|m| !m.is_system()).collect();
    let start = rest.len().saturating_sub(max_turns);

    system
        .into_iter()
        .chain(rest[start..].iter().copied())
        .cloned()
        .collect()
}
