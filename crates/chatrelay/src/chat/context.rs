//! Relevance-ranked conversation context.
//!
//! The newest message is the query. Earlier messages are ranked by cosine
//! similarity to it and the best `window` are kept. Kept messages go back into
//! chronological order and the query is always last, so providers still see a
//! well-formed dialogue.

use std::cmp::Ordering;

use tracing::debug;

use super::error::ChatError;
use crate::llm::{Embedder, LLMError, Message};

/// The newest message plus up to `window` messages immediately before it.
pub fn raw_window(conversation: &[Message], window: usize) -> Vec<Message> {
    let start = conversation.len().saturating_sub(window.saturating_add(1));
    conversation[start..].to_vec()
}

/// Pick the `window` earlier messages most relevant to the newest one.
///
/// Without an embedder, and with more history than fits in the window, this
/// fails with `ContextUnavailable`. Short conversations are returned whole and
/// need no embedder.
pub async fn select_context(
    conversation: &[Message],
    window: usize,
    embedder: Option<&dyn Embedder>,
) -> Result<Vec<Message>, ChatError> {
    let Some((query, preceding)) = conversation.split_last() else {
        return Ok(Vec::new());
    };
    if preceding.len() <= window {
        return Ok(conversation.to_vec());
    }
    let Some(embedder) = embedder else {
        return Err(ChatError::ContextUnavailable(
            "no embedding credentials for this provider".to_string(),
        ));
    };

    let texts: Vec<String> = conversation.iter().map(|m| m.content.clone()).collect();
    let vectors = embedder.embed(&texts).await?;
    if vectors.len() != texts.len() {
        return Err(ChatError::Upstream(LLMError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            vectors.len()
        ))));
    }
    let Some((query_vector, history_vectors)) = vectors.split_last() else {
        return Err(ChatError::ContextUnavailable(
            "embedding returned no vectors".to_string(),
        ));
    };

    let mut ranked: Vec<(usize, f32)> = history_vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, cosine_similarity(query_vector, v)))
        .collect();
    // Highest score first; ties go to the more recent message.
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(b.0.cmp(&a.0))
    });

    let mut kept: Vec<usize> = ranked.into_iter().take(window).map(|(i, _)| i).collect();
    kept.sort_unstable();
    debug!(candidates = preceding.len(), kept = ?kept, "selected context");

    let mut selected: Vec<Message> = kept.into_iter().map(|i| preceding[i].clone()).collect();
    selected.push(query.clone());
    Ok(selected)
}

/// Cosine similarity in `[-1.0, 1.0]`; zero when either vector has no length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom < 1e-12 {
        return 0.0;
    }
    dot / denom
}
