//! # Cartpilot Enhancer
//!
//! The optional semantic layer over three decisions:
//!
//! 1. substitution search queries ([`queries`]),
//! 2. value-based candidate ranking ([`ranking`]),
//! 3. pantry-prune decisions ([`prune`]).
//!
//! Every decision has a deterministic heuristic whose output stands on its
//! own; the LLM only validates or refines it. Any LLM failure — key
//! missing, rate limit, garbage output — logs at WARN and returns the
//! heuristic result unchanged, so a run never degrades below
//! heuristic quality and never fails because of the LLM. The LLM is never
//! authoritative for high-consequence items: a heuristic KEEP on those
//! always stands.

pub mod llm_json;
pub mod prune;
pub mod queries;
pub mod ranking;

use cartpilot_core::port::{CompletionOptions, LlmPort};
use cartpilot_core::types::{CartItem, PruneDecision, SubstituteCandidate};
use std::sync::Arc;

/// Enhancer configuration.
#[derive(Clone, Debug)]
pub struct EnhancerOptions {
    /// Model passed to the port.
    pub model: String,
    /// Output token cap per call.
    pub max_tokens: u32,
}

impl Default for EnhancerOptions {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: 512,
        }
    }
}

/// The enhancement layer: heuristics plus an optional LLM port.
pub struct Enhancer {
    llm: Arc<dyn LlmPort>,
    options: EnhancerOptions,
}

impl Enhancer {
    /// Build an enhancer over the given port.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmPort>, options: EnhancerOptions) -> Self {
        Self { llm, options }
    }

    fn completion_options(&self, system_prompt: &str) -> CompletionOptions {
        CompletionOptions {
            model: self.options.model.clone(),
            max_tokens: self.options.max_tokens,
            system_prompt: Some(system_prompt.to_string()),
            temperature: Some(0.0),
            stop_sequences: Vec::new(),
        }
    }

    /// A primary query plus progressively broader fallbacks for one item.
    pub async fn substitution_queries(&self, item_name: &str) -> Vec<String> {
        let heuristic = queries::heuristic_queries(item_name);
        if !self.llm.is_available().await {
            return heuristic;
        }
        match queries::llm_queries(self.llm.as_ref(), &self.completion_options(queries::SYSTEM_PROMPT), item_name).await {
            Ok(refined) => refined,
            Err(err) => {
                tracing::warn!(error = %err, item = item_name, "query generation fell back to heuristics");
                heuristic
            },
        }
    }

    /// Score and rank substitute candidates, best first.
    pub async fn rank_candidates(
        &self,
        original: &CartItem,
        candidates: Vec<SubstituteCandidate>,
    ) -> Vec<SubstituteCandidate> {
        let ranked = ranking::heuristic_rank(candidates);
        if ranked.len() < 2 || !self.llm.is_available().await {
            return ranked;
        }
        match ranking::llm_validate_order(
            self.llm.as_ref(),
            &self.completion_options(ranking::SYSTEM_PROMPT),
            original,
            &ranked,
        )
        .await
        {
            Ok(reordered) => reordered,
            Err(err) => {
                tracing::warn!(error = %err, item = %original.name, "ranking fell back to heuristics");
                ranked
            },
        }
    }

    /// Decide whether an item is likely already on hand.
    pub async fn prune_decision(
        &self,
        item: &CartItem,
        last_purchased_days_ago: Option<i64>,
    ) -> PruneDecision {
        let heuristic = prune::heuristic_prune(item, last_purchased_days_ago);
        if !self.llm.is_available().await {
            return heuristic;
        }
        match prune::llm_validate(
            self.llm.as_ref(),
            &self.completion_options(prune::SYSTEM_PROMPT),
            item,
            &heuristic,
        )
        .await
        {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(error = %err, item = %item.name, "prune decision fell back to heuristics");
                heuristic
            },
        }
    }
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
            available: false,
            availability_note: None,
        }
    }

    #[tokio::test]
    async fn offline_llm_means_pure_heuristics() {
        let enhancer = Enhancer::new(Arc::new(ScriptedLlm::unavailable()), EnhancerOptions::default());
        let queries = enhancer
            .substitution_queries("Leite Mimosa Meio Gordo 1L")
            .await;
        assert!(!queries.is_empty());
        let decision = enhancer.prune_decision(&item("Arroz Agulha 1kg"), Some(3)).await;
        assert!(decision.confidence > 0.0);
    }

    #[tokio::test]
    async fn llm_failure_never_bubbles_up() {
        let llm = ScriptedLlm::failing_with(cartpilot_core::error::LlmError::RateLimited {
            retry_after_secs: Some(30),
        });
        let enhancer = Enhancer::new(Arc::new(llm), EnhancerOptions::default());
        let queries = enhancer.substitution_queries("Leite Mimosa 1L").await;
        assert!(!queries.is_empty());
    }

    #[tokio::test]
    async fn scripted_queries_are_used_when_valid() {
        let llm = ScriptedLlm::with_responses(vec![
            r#"["leite mimosa meio gordo", "leite meio gordo", "leite"]"#,
        ]);
        let enhancer = Enhancer::new(Arc::new(llm), EnhancerOptions::default());
        let queries = enhancer.substitution_queries("Leite Mimosa Meio Gordo 1L").await;
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "leite mimosa meio gordo");
    }
}
