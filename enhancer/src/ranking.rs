//! Value-based candidate ranking.
//!
//! The composite score uses fixed weights: store brand 0.35, unit price
//! 0.40, absolute price 0.25. Price components are normalized against the
//! cheapest candidate in the set, so scores are comparable only within one
//! ranking call. The LLM may validate or reorder, never rescore.

use crate::llm_json;
use cartpilot_core::error::LlmError;
use cartpilot_core::port::{ChatMessage, CompletionOptions, LlmPort};
use cartpilot_core::types::{CartItem, SubstituteCandidate};

/// Fixed weight of the store-brand component.
pub const WEIGHT_STORE_BRAND: f64 = 0.35;
/// Fixed weight of the unit-price component.
pub const WEIGHT_UNIT_PRICE: f64 = 0.40;
/// Fixed weight of the absolute-price component.
pub const WEIGHT_ABS_PRICE: f64 = 0.25;

/// System prompt for LLM rank validation.
pub const SYSTEM_PROMPT: &str = "You sanity-check a value ranking of grocery substitutes. \
Answer with a JSON array of the candidate names in your preferred order. \
Keep the given order unless something is clearly wrong. Answer with JSON only.";

#[allow(clippy::cast_precision_loss)]
fn price_component(price: i64, cheapest: i64) -> f64 {
    if price <= 0 {
        return 0.0;
    }
    (cheapest as f64 / price as f64).clamp(0.0, 1.0)
}

/// Score candidates in place and sort best first.
#[must_use]
pub fn heuristic_rank(mut candidates: Vec<SubstituteCandidate>) -> Vec<SubstituteCandidate> {
    if candidates.is_empty() {
        return candidates;
    }

    let cheapest_abs = candidates
        .iter()
        .map(|c| c.price_cents)
        .filter(|p| *p > 0)
        .min()
        .unwrap_or(1);
    let cheapest_unit = candidates
        .iter()
        .filter_map(|c| c.unit_price_cents)
        .filter(|p| *p > 0)
        .min();

    for candidate in &mut candidates {
        let brand = if candidate.is_store_brand { 1.0 } else { 0.0 };
        // Candidates without a unit price fall back to the shelf price for
        // that component, against the same baseline family.
        let unit = match (candidate.unit_price_cents, cheapest_unit) {
            (Some(unit), Some(cheapest)) => price_component(unit, cheapest),
            _ => price_component(candidate.price_cents, cheapest_abs),
        };
        let abs = price_component(candidate.price_cents, cheapest_abs);
        candidate.score =
            WEIGHT_STORE_BRAND * brand + WEIGHT_UNIT_PRICE * unit + WEIGHT_ABS_PRICE * abs;
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

/// Ask the LLM to validate the heuristic order.
///
/// The answer must be a permutation of the candidate names; anything else
/// is an error and the caller keeps the heuristic order. Scores are kept
/// from the heuristic either way.
///
/// # Errors
///
/// Any port failure, or an answer that is not a permutation.
pub async fn llm_validate_order(
    llm: &dyn LlmPort,
    opts: &CompletionOptions,
    original: &CartItem,
    ranked: &[SubstituteCandidate],
) -> Result<Vec<SubstituteCandidate>, LlmError> {
    let listing: Vec<String> = ranked
        .iter()
        .map(|c| {
            format!(
                "- {} ({} cents{}{})",
                c.name,
                c.price_cents,
                c.unit_price_cents
                    .map_or_else(String::new, |u| format!(", {u} cents/unit")),
                if c.is_store_brand { ", store brand" } else { "" },
            )
        })
        .collect();
    let prompt = format!(
        "Replacing \"{}\". Current value ranking:\n{}\nAnswer with the JSON array of names in your preferred order.",
        original.name,
        listing.join("\n"),
    );

    let completion = llm.complete(&[ChatMessage::user(prompt)], opts).await?;
    let order: Vec<String> = llm_json::extract(&completion.content)
        .ok_or_else(|| LlmError::InvalidResponse("expected a JSON array of names".into()))?;

    if order.len() != ranked.len() {
        return Err(LlmError::InvalidResponse("not a permutation".into()));
    }
    let mut reordered = Vec::with_capacity(ranked.len());
    for name in &order {
        let found = ranked.iter().find(|c| &c.name == name);
        match found {
            Some(candidate) if !reordered.iter().any(|c: &SubstituteCandidate| c.name == candidate.name) => {
                reordered.push(candidate.clone());
            },
            _ => return Err(LlmError::InvalidResponse("not a permutation".into())),
        }
    }
    Ok(reordered)
}
