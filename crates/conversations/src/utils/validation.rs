//! Input validation helpers.

use crate::types::{ConversationError, ConversationResult};

const MAX_PUBLIC_ID_LEN: usize = 64;

/// Trim message content and enforce the non-empty and length rules.
///
/// Length is counted in characters, not bytes.
pub fn normalize_content(content: &str, max_length: usize) -> ConversationResult<String> {
    let trimmed = content.trim();

    if trimmed.is_empty() {
        return Err(ConversationError::validation("Message content cannot be empty"));
    }

    if trimmed.chars().count() > max_length {
        return Err(ConversationError::validation(format!(
            "Message content too long (max {max_length} characters)"
        )));
    }

    Ok(trimmed.to_owned())
}

/// Check that a client supplied public id is plausibly one of ours.
pub fn validate_public_id(kind: &str, id: &str) -> ConversationResult<()> {
    let well_formed = !id.is_empty()
        && id.len() <= MAX_PUBLIC_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if !well_formed {
        return Err(ConversationError::validation(format!("Invalid {kind} id")));
    }

    Ok(())
}
