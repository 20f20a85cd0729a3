//! Token estimation and budget windowing.

use super::Message;

/// Rough token estimate: one token per four characters, rounded up.
pub fn count_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

pub fn total_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(|m| u64::from(m.token_count)).sum()
}

/// Keeps the newest messages that fit in `max_tokens`.
///
/// Walks from newest to oldest and stops at the first message that would
/// overflow the budget; older messages are dropped even if they would fit.
/// `messages` must be chronological and the result stays chronological.
pub fn select_window(mut messages: Vec<Message>, max_tokens: u64) -> Vec<Message> {
    let mut used = 0u64;
    let mut keep = 0usize;
    for message in messages.iter().rev() {
        let next = used + u64::from(message.token_count);
        if next > max_tokens {
            break;
        }
        used = next;
        keep += 1;
    }
    messages.split_off(messages.len() - keep)
}
