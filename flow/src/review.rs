//! Review pack assembly: diff, confidence, warnings, finalization gate.

use crate::diff::diff_carts;
use crate::merge::OrderMergeResult;
use crate::verify::Verification;
use cartpilot_core::error::{CopilotError, ErrorKind};
use cartpilot_core::types::{
    CartSnapshot, Confidence, DeliverySlot, PruneDecision, ReviewAction, ReviewCart, ReviewPack,
    ReviewPackStatus, ReviewWarning, SubstitutionProposal, WarningKind, WarningSeverity,
};
use chrono::{DateTime, Utc};

/// Everything the pack builder needs from the finished phases.
#[derive(Clone, Debug)]
pub struct ReviewInputs {
    /// Owning session.
    pub session_id: String,
    /// Opaque household identifier.
    pub household_id: String,
    /// Cart before the run.
    pub before: CartSnapshot,
    /// Prepared cart after the run.
    pub after: CartSnapshot,
    /// Per-order merge outcomes.
    pub merge_results: Vec<OrderMergeResult>,
    /// Substitution proposals, when the phase ran.
    pub substitutions: Option<Vec<SubstitutionProposal>>,
    /// Prune decisions, when pruning ran.
    pub pruning: Option<Vec<PruneDecision>>,
    /// Ranked slots, when the phase ran.
    pub slots: Option<Vec<DeliverySlot>>,
    /// Registry pages whose last validation was degraded or broken.
    pub degraded_pages: Vec<String>,
    /// Fewer orders than requested were available as sources.
    pub sparse_history: bool,
}

/// The finalization gate.
///
/// A pack may only become `review_ready` when the prepared cart holds
/// items, or when every order failed with a recorded reason. An empty cart
/// combined with any reported success is a fatal inconsistency: the cart
/// probes and the merge results disagree, and the run must pause rather
/// than present a plausible-looking empty pack.
///
/// # Errors
///
/// The fatal inconsistency described above.
pub fn finalization_gate(
    after_item_count: u32,
    merge_results: &[OrderMergeResult],
) -> Result<(), CopilotError> {
    if after_item_count > 0 {
        return Ok(());
    }
    let any_success = merge_results.iter().any(|r| r.success);
    if any_success {
        return Err(CopilotError::new(
            ErrorKind::Corruption,
            "merge reported success but the cart is empty",
        ));
    }
    let all_failed_with_reason = !merge_results.is_empty()
        && merge_results
            .iter()
            .all(|r| !r.success && r.failure.is_some());
    if all_failed_with_reason {
        return Ok(());
    }
    Err(CopilotError::new(
        ErrorKind::ExtractionFailed,
        "empty cart without a recorded failure for every order",
    ))
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Build the review pack from the finished phases.
///
/// Call [`finalization_gate`] first; the builder assumes the gate passed
/// and stamps the pack `review_ready`.
#[must_use]
pub fn build_review_pack(now: DateTime<Utc>, inputs: ReviewInputs) -> ReviewPack {
    let diff = diff_carts(&inputs.before, &inputs.after);

    // Confidence: removals and assumed verifications erode cart accuracy.
    #[allow(clippy::cast_precision_loss)]
    let removed_penalty = (0.1 * diff.summary.removed_count as f64).min(0.5);
    let assumed_orders = inputs
        .merge_results
        .iter()
        .filter(|r| r.verification == Some(Verification::Assumed))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let assumed_penalty = 0.1 * assumed_orders as f64;
    let cart_accuracy = clamp01(1.0 - removed_penalty - assumed_penalty);

    let low_quality_items = inputs
        .after
        .items
        .iter()
        .filter(|i| i.product_id.is_none() || i.unit_price == 0.0)
        .count();
    #[allow(clippy::cast_precision_loss)]
    let mut data_quality = 1.0 - (0.05 * low_quality_items as f64).min(0.5);
    if inputs.sparse_history || !inputs.degraded_pages.is_empty() {
        data_quality -= 0.1;
    }
    let data_quality = clamp01(data_quality);

    let mut warnings = Vec::new();
    for item in inputs.after.items.iter().filter(|i| !i.available) {
        warnings.push(ReviewWarning {
            kind: WarningKind::OutOfStock,
            item_name: Some(item.name.clone()),
            message: format!("\"{}\" is currently unavailable", item.name),
            severity: WarningSeverity::Warning,
        });
    }
    for removed in &diff.removed {
        warnings.push(ReviewWarning {
            kind: WarningKind::MissingItem,
            item_name: Some(removed.name.clone()),
            message: format!("\"{}\" did not land in the prepared cart", removed.name),
            severity: WarningSeverity::Warning,
        });
    }
    if diff.summary.price_difference.abs() > 10.0 {
        warnings.push(ReviewWarning {
            kind: WarningKind::PriceChange,
            item_name: None,
            message: format!(
                "Cart total moved by {:+.2} EUR against the previous cart",
                diff.summary.price_difference
            ),
            severity: WarningSeverity::Info,
        });
    }
    if low_quality_items > 0 {
        warnings.push(ReviewWarning {
            kind: WarningKind::DataQuality,
            item_name: None,
            message: format!(
                "{low_quality_items} item(s) extracted without a product id or price"
            ),
            severity: WarningSeverity::Info,
        });
    }
    if inputs.sparse_history {
        warnings.push(ReviewWarning {
            kind: WarningKind::DataQuality,
            item_name: None,
            message: "Fewer past orders than requested were available as sources".to_string(),
            severity: WarningSeverity::Info,
        });
    }
    for page in &inputs.degraded_pages {
        warnings.push(ReviewWarning {
            kind: WarningKind::DataQuality,
            item_name: None,
            message: format!("Selector coverage for the {page} page is degraded"),
            severity: WarningSeverity::Info,
        });
    }

    let mut actions = vec![ReviewAction {
        action: "approve".to_string(),
        label: "Approve the prepared cart and check out manually".to_string(),
    }];
    if inputs
        .substitutions
        .as_ref()
        .is_some_and(|s| !s.is_empty())
    {
        actions.push(ReviewAction {
            action: "review_substitutions".to_string(),
            label: "Review proposed substitutions".to_string(),
        });
    }
    if inputs.pruning.as_ref().is_some_and(|p| p.iter().any(|d| d.prune)) {
        actions.push(ReviewAction {
            action: "review_pruning".to_string(),
            label: "Review items flagged as already on hand".to_string(),
        });
    }
    if inputs.slots.as_ref().is_some_and(|s| !s.is_empty()) {
        actions.push(ReviewAction {
            action: "pick_slot".to_string(),
            label: "Pick a delivery slot".to_string(),
        });
    }

    let source_orders = inputs
        .merge_results
        .iter()
        .map(|r| r.order_id.clone())
        .collect();

    ReviewPack {
        session_id: inputs.session_id,
        generated_at: now,
        household_id: inputs.household_id,
        status: ReviewPackStatus::ReviewReady,
        cart: ReviewCart {
            summary: diff.summary.clone(),
            diff,
            before: inputs.before,
            after: inputs.after,
        },
        warnings,
        actions,
        confidence: Confidence {
            cart_accuracy,
            data_quality,
            source_orders,
        },
        substitutions: inputs.substitutions,
        pruning: inputs.pruning,
        slots: inputs.slots,
    }
}
