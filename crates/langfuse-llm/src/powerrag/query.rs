use crate::error::LlmError;
use crate::types::{Message, Role};

/// Build the PowerRAG query from a normalized conversation
///
/// User turns win; without any, system and assistant turns are used; as a
/// last resort the first message is sent verbatim.
pub fn extract_query(messages: &[Message]) -> Result<String, LlmError> {
    let join = |roles: &[Role]| {
        messages
            .iter()
            .filter(|m| roles.contains(&m.role))
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut query = join(&[Role::User]);
    if query.is_empty() {
        query = join(&[Role::System, Role::Assistant]);
    }
    if query.is_empty()
        && let Some(first) = messages.first()
    {
        query.clone_from(&first.content);
    }

    if query.is_empty() {
        return Err(LlmError::MissingQuery);
    }
    Ok(query)
}
