//! The configured popup pattern set.

use cartpilot_core::popup::{PopupPattern, TextMatchMode};

/// An immutable pattern set, ordered highest priority first.
#[derive(Clone, Debug)]
pub struct PatternSet {
    patterns: Vec<PopupPattern>,
}

impl PatternSet {
    /// Build a set, sorting by descending priority once.
    #[must_use]
    pub fn new(mut patterns: Vec<PopupPattern>) -> Self {
        patterns.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { patterns }
    }

    /// An empty set. Sweeping it is a no-op.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Patterns in sweep order.
    #[must_use]
    pub fn ordered(&self) -> &[PopupPattern] {
        &self.patterns
    }

    /// Number of patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// The default pattern set for the retailer.
///
/// Not exhaustive by design; patterns are data and deployments may extend
/// the set. Priorities put cart-preserving dismissals first.
#[must_use]
pub fn default_patterns() -> PatternSet {
    PatternSet::new(vec![
        PopupPattern {
            name: "cart-removal-cancel".into(),
            selector: ".modal button, [role='dialog'] button, .auc-modal button".into(),
            text_match: Some("Cancelar".into()),
            match_mode: TextMatchMode::Exact,
            priority: 100,
            skip_if_reorder_modal: true,
            description: Some("Cancels a stray cart-removal confirmation, preserving the cart".into()),
        },
        PopupPattern {
            name: "notification-decline-exact".into(),
            selector: "button, [role='button']".into(),
            text_match: Some("Não".into()),
            match_mode: TextMatchMode::Exact,
            priority: 90,
            skip_if_reorder_modal: true,
            description: Some("Declines the notification-subscription prompt".into()),
        },
        PopupPattern {
            name: "notification-decline".into(),
            selector: "button, [role='button']".into(),
            text_match: Some("Não, obrigado".into()),
            match_mode: TextMatchMode::Substring,
            priority: 89,
            skip_if_reorder_modal: true,
            description: Some("Declines the long-form subscription prompt".into()),
        },
        PopupPattern {
            name: "cookie-accept".into(),
            selector: "#onetrust-accept-btn-handler, [data-testid='cookie-accept'], button.cookie-accept"
                .into(),
            text_match: None,
            match_mode: TextMatchMode::Substring,
            priority: 80,
            skip_if_reorder_modal: false,
            description: Some("Accepts the cookie banner unconditionally".into()),
        },
        PopupPattern {
            name: "modal-close-x".into(),
            selector: "button[aria-label='Fechar'], button[aria-label='Close'], [aria-label='Fechar janela']"
                .into(),
            text_match: None,
            match_mode: TextMatchMode::Substring,
            priority: 10,
            skip_if_reorder_modal: true,
            description: Some("Closes leftover modals via their labelled close button only".into()),
        },
    ])
}
