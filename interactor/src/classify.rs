//! Reorder-modal classification, shared by both adapters.
//!
//! Adapters gather three observations from the page; the decision itself is
//! pure so both back-ends classify identically:
//!
//! - merge wins: any visible button carries a merge label;
//! - removal requires the removal text AND the absence of a merge button;
//! - replace requires the confirm-reorder button inside a modal ancestor.

use cartpilot_core::probe::{ReorderModalKind, ReorderModalProbe};

/// Raw observations an adapter extracts from the live page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModalObservations {
    /// A visible button with a merge label exists.
    pub merge_button_visible: bool,
    /// Visible page text contains a removal phrase.
    pub removal_text_visible: bool,
    /// A confirm-reorder button sits inside a modal-class/role ancestor.
    pub confirm_in_modal: bool,
}

/// Classify the observations into a probe result.
#[must_use]
pub const fn classify(obs: ModalObservations) -> ReorderModalProbe {
    if obs.merge_button_visible {
        return ReorderModalProbe::found(ReorderModalKind::Merge);
    }
    if obs.removal_text_visible {
        return ReorderModalProbe::found(ReorderModalKind::Removal);
    }
    if obs.confirm_in_modal {
        return ReorderModalProbe::found(ReorderModalKind::Replace);
    }
    ReorderModalProbe::none()
}
