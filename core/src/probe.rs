//! Shared page-probe vocabulary.
//!
//! Both interactor adapters classify the reorder confirmation modal from
//! the same label sets, so the sets live here rather than in either
//! adapter. These strings are retailer UI text, not selectors; the
//! selector chains proper come from the registry.

use serde::{Deserialize, Serialize};

/// Variants of the retailer's reorder confirmation modal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderModalKind {
    /// No reorder modal visible.
    #[default]
    None,
    /// Modal offering to merge the order into the current cart.
    Merge,
    /// Modal offering to replace the cart with the order.
    Replace,
    /// Modal asking to remove every product from the cart.
    Removal,
}

/// Result of a reorder-modal probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderModalProbe {
    /// Which variant is visible.
    pub kind: ReorderModalKind,
    /// Whether any variant was found.
    pub found: bool,
}

impl ReorderModalProbe {
    /// Probe result for "nothing visible".
    #[must_use]
    pub const fn none() -> Self {
        Self {
            kind: ReorderModalKind::None,
            found: false,
        }
    }

    /// Probe result for a found variant.
    #[must_use]
    pub const fn found(kind: ReorderModalKind) -> Self {
        Self { kind, found: true }
    }
}

/// Button labels that identify the merge variant.
pub const MERGE_BUTTON_LABELS: &[&str] = &["Juntar", "Juntar ao carrinho"];

/// Texts that identify the cart-removal variant. Case-insensitive match.
pub const REMOVAL_TEXTS: &[&str] = &[
    "Remover produtos do carrinho",
    "remover todos os produtos",
];

/// Label of the confirm-reorder (replace) button.
pub const CONFIRM_REORDER_LABEL: &str = "Encomendar de novo";

/// Label of the cancel button used to preserve the cart.
pub const CANCEL_LABEL: &str = "Cancelar";

/// Selector identifying a modal-class/role ancestor; the replace variant
/// requires the confirm button to be a descendant of one of these.
pub const MODAL_ANCESTOR_SELECTOR: &str = ".modal, [role='dialog'], .popup, .auc-modal";

/// Whether `text` marks a cart-removal modal.
#[must_use]
pub fn is_removal_text(text: &str) -> bool {
    let lowered = text.to_lowercase();
    REMOVAL_TEXTS.iter().any(|t| lowered.contains(&t.to_lowercase()))
}

/// Whether `label` is a merge-button label.
#[must_use]
pub fn is_merge_label(label: &str) -> bool {
    let trimmed = label.trim();
    MERGE_BUTTON_LABELS.iter().any(|l| trimmed == *l)
}
