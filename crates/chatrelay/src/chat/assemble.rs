use std::collections::BTreeSet;

use super::ChatResult;
use crate::llm::RawChatResult;

/// Collapse a raw provider result into the single answer returned to callers.
///
/// Only the first candidate is kept. References become a sorted set.
pub fn assemble(raw: RawChatResult) -> ChatResult {
    let text = raw.candidates.into_iter().next().unwrap_or_default();
    let references = raw.references.map(|refs| {
        refs.into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    });
    ChatResult { text, references }
}
