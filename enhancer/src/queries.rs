//! Substitution search query generation.

use crate::llm_json;
use cartpilot_core::error::LlmError;
use cartpilot_core::port::{ChatMessage, CompletionOptions, LlmPort};

/// System prompt for LLM query generation.
pub const SYSTEM_PROMPT: &str = "You generate grocery search queries in Portuguese. \
Given a product name, answer with a JSON array of 2 to 4 search queries, \
most specific first, each one broader than the last. Answer with JSON only.";

/// Size and packaging tokens that narrow a query without describing the
/// product.
fn is_noise_token(token: &str) -> bool {
    let lowered = token.to_lowercase();
    let size_like = lowered
        .trim_end_matches(|c: char| c.is_alphabetic())
        .chars()
        .any(|c| c.is_ascii_digit());
    size_like
        || matches!(
            lowered.as_str(),
            "un" | "uni" | "pack" | "garrafa" | "lata" | "saco" | "embalagem"
        )
}

/// Deterministic query ladder: the full name, the name without sizes, the
/// first two descriptive words, and the head word.
#[must_use]
pub fn heuristic_queries(item_name: &str) -> Vec<String> {
    let trimmed = item_name.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let descriptive: Vec<&str> = trimmed
        .split_whitespace()
        .filter(|t| !is_noise_token(t))
        .collect();

    let mut queries = vec![trimmed.to_string()];
    if !descriptive.is_empty() {
        queries.push(descriptive.join(" "));
    }
    if descriptive.len() > 2 {
        queries.push(descriptive[..2].join(" "));
    }
    if let Some(head) = descriptive.first() {
        queries.push((*head).to_string());
    }

    queries.dedup();
    let mut seen = std::collections::HashSet::new();
    queries.retain(|q| seen.insert(q.to_lowercase()));
    queries.truncate(4);
    queries
}

/// Ask the LLM for the query ladder.
///
/// # Errors
///
/// Any port failure or an answer that is not 1–4 non-empty strings.
pub async fn llm_queries(
    llm: &dyn LlmPort,
    opts: &CompletionOptions,
    item_name: &str,
) -> Result<Vec<String>, LlmError> {
    let prompt = format!(
        "Product: \"{item_name}\". Generate the search query ladder as a JSON array."
    );
    let completion = llm.complete(&[ChatMessage::user(prompt)], opts).await?;
    let queries: Vec<String> = llm_json::extract(&completion.content)
        .ok_or_else(|| LlmError::InvalidResponse("expected a JSON array of queries".into()))?;

    let queries: Vec<String> = queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(4)
        .collect();
    if queries.is_empty() {
        return Err(LlmError::InvalidResponse("empty query list".into()));
    }
    Ok(queries)
}
