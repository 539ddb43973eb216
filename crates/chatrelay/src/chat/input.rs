use super::error::ChatError;
use crate::llm::{Message, ProviderId, ProviderInput, Role};

/// Start a provider input in the shape the provider's descriptor declares.
pub fn build_input(
    provider_id: &str,
    model: &str,
    system_prompt: &str,
) -> Result<ProviderInput, ChatError> {
    let provider = ProviderId::parse(provider_id)
        .ok_or_else(|| ChatError::UnsupportedProvider(provider_id.to_string()))?;
    Ok(ProviderInput::new(
        provider.descriptor().shape,
        model,
        system_prompt,
    ))
}

/// Append messages as turns, in order.
pub fn append_messages(input: &mut ProviderInput, messages: &[Message]) {
    for message in messages {
        match message.role {
            Role::User => input.add_user_turn(message.content.as_str()),
            Role::Assistant => input.add_assistant_turn(message.content.as_str()),
        }
    }
}
