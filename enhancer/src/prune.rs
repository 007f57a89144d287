//! Pantry-prune decisions.
//!
//! The heuristic is conservative by construction: it only proposes
//! pruning shelf-stable items bought very recently, and it never proposes
//! pruning high-consequence categories (baby, medication, pet, medical
//! nutrition). The LLM may refine the other decisions, but a heuristic
//! KEEP on a high-consequence item is final.

use crate::llm_json;
use cartpilot_core::error::LlmError;
use cartpilot_core::port::{ChatMessage, CompletionOptions, LlmPort};
use cartpilot_core::types::{CartItem, PruneDecision};
use serde::Deserialize;

/// System prompt for LLM prune validation.
pub const SYSTEM_PROMPT: &str = "You validate pantry-prune decisions for a grocery cart. \
Be conservative: when in doubt, keep the item. Answer with a JSON object \
{\"prune\": bool, \"confidence\": number, \"reason\": string}. Answer with JSON only.";

const HIGH_CONSEQUENCE_MARKERS: &[&str] = &[
    "bebé",
    "bebe",
    "infantil",
    "fralda",
    "leite em pó",
    "medicament",
    "farmác",
    "farmacia",
    "ração",
    "racao",
    "gato",
    "cão",
    "cao",
    "nutri",
    "suplemento",
];

const SHELF_STABLE_MARKERS: &[&str] = &[
    "arroz",
    "massa",
    "azeite",
    "óleo",
    "oleo",
    "farinha",
    "açúcar",
    "acucar",
    "sal",
    "conserva",
    "atum",
    "papel",
    "detergente",
    "limpeza",
    "champô",
    "champo",
    "gel de banho",
];

fn matches_any(name: &str, markers: &[&str]) -> bool {
    let lowered = name.to_lowercase();
    markers.iter().any(|m| lowered.contains(m))
}

/// Whether an item belongs to a category the system never auto-prunes.
#[must_use]
pub fn is_high_consequence(name: &str) -> bool {
    matches_any(name, HIGH_CONSEQUENCE_MARKERS)
}

/// The deterministic prune decision.
#[must_use]
pub fn heuristic_prune(item: &CartItem, last_purchased_days_ago: Option<i64>) -> PruneDecision {
    if is_high_consequence(&item.name) {
        return PruneDecision {
            item_name: item.name.clone(),
            prune: false,
            confidence: 0.95,
            reason: "essential-category item; kept regardless of purchase history".to_string(),
        };
    }

    if let Some(days) = last_purchased_days_ago {
        if days <= 7 && matches_any(&item.name, SHELF_STABLE_MARKERS) {
            return PruneDecision {
                item_name: item.name.clone(),
                prune: true,
                confidence: 0.6,
                reason: format!("shelf-stable and purchased {days} day(s) ago; likely on hand"),
            };
        }
    }

    PruneDecision {
        item_name: item.name.clone(),
        prune: false,
        confidence: 0.5,
        reason: "no evidence the household already has this".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct LlmPruneAnswer {
    prune: bool,
    confidence: f64,
    reason: String,
}

/// Show the heuristic decision to the LLM for validation or refinement.
///
/// The heuristic KEEP dominates for high-consequence items regardless of
/// what the model answers.
///
/// # Errors
///
/// Any port failure or an unparseable answer.
pub async fn llm_validate(
    llm: &dyn LlmPort,
    opts: &CompletionOptions,
    item: &CartItem,
    heuristic: &PruneDecision,
) -> Result<PruneDecision, LlmError> {
    let prompt = format!(
        "Item: \"{}\" (quantity {}). Heuristic decision: {}. Validate or refine.",
        item.name,
        item.quantity,
        serde_json::to_string(heuristic)
            .unwrap_or_else(|_| "{}".to_string()),
    );

    let completion = llm.complete(&[ChatMessage::user(prompt)], opts).await?;
    let answer: LlmPruneAnswer = llm_json::extract(&completion.content)
        .ok_or_else(|| LlmError::InvalidResponse("expected a prune decision object".into()))?;

    if answer.prune && is_high_consequence(&item.name) {
        tracing::warn!(item = %item.name, "LLM proposed pruning a high-consequence item; keeping");
        return Ok(heuristic.clone());
    }

    Ok(PruneDecision {
        item_name: item.name.clone(),
        prune: answer.prune,
        confidence: answer.confidence.clamp(0.0, 1.0),
        reason: answer.reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartpilot_testing::ScriptedLlm;

    fn item(name: &str) -> CartItem {
        CartItem {
            product_id: None,
            name: name.to_string(),
            quantity: 1,
            unit_price: 1.0,
            available: true,
            availability_note: None,
        }
    }

    #[test]
    fn recent_shelf_stable_items_are_pruned() {
        let decision = heuristic_prune(&item("Arroz Agulha 1kg"), Some(3));
        assert!(decision.prune);
        assert!(decision.confidence >= 0.5);
    }

    #[test]
    fn perishables_are_kept_even_when_recent() {
        let decision = heuristic_prune(&item("Leite Meio Gordo"), Some(2));
        assert!(!decision.prune);
    }

    #[test]
    fn stale_purchases_are_kept() {
        let decision = heuristic_prune(&item("Arroz Agulha 1kg"), Some(45));
        assert!(!decision.prune);
    }

    #[test]
    fn high_consequence_items_are_always_kept() {
        for name in ["Fraldas T4", "Leite em pó infantil", "Ração gato esterilizado"] {
            let decision = heuristic_prune(&item(name), Some(1));
            assert!(!decision.prune, "{name} must be kept");
            assert!(decision.confidence > 0.9);
        }
    }

    #[tokio::test]
    async fn llm_cannot_prune_high_consequence_items() {
        let llm = ScriptedLlm::with_responses(vec![
            r#"{"prune": true, "confidence": 0.99, "reason": "plenty at home"}"#,
        ]);
        let target = item("Fraldas T4");
        let heuristic = heuristic_prune(&target, Some(1));
        let decision = llm_validate(&llm, &CompletionOptions::default(), &target, &heuristic).await;
        assert!(decision.is_ok_and(|d| !d.prune));
    }

    #[tokio::test]
    async fn llm_may_refine_ordinary_decisions() {
        let llm = ScriptedLlm::with_responses(vec![
            r#"{"prune": true, "confidence": 0.7, "reason": "bought twice this week"}"#,
        ]);
        let target = item("Papel higiénico 12 rolos");
        let heuristic = heuristic_prune(&target, None);
        assert!(!heuristic.prune);
        let decision = llm_validate(&llm, &CompletionOptions::default(), &target, &heuristic).await;
        assert!(decision.is_ok_and(|d| d.prune));
    }
}
