//! The absolute click safety gate.
//!
//! The forbidden token lists are deliberately code, not registry data: they
//! are the one guardrail that must not be editable by a selector update.
//! The gate is authoritative over pattern matches; a rejection is final for
//! that element in that sweep.

/// Text fragments that mark an element as destructive.
pub const FORBIDDEN_TEXT_TOKENS: &[&str] = &[
    "Remover todos",
    "Remover todos os produtos",
    "Eliminar tudo",
    "Confirmar",
];

/// Class fragments that mark an element as destructive.
pub const FORBIDDEN_CLASS_TOKENS: &[&str] = &["auc-cart__remove-all", "remove-all-products"];

/// `data-target` fragments that mark an element as destructive.
pub const FORBIDDEN_TARGET_TOKENS: &[&str] = &["remove-all", "clear-cart", "empty-cart"];

/// Outcome of a gate evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// The click may proceed.
    Permit,
    /// The click is refused; the offending field and token are recorded.
    Reject {
        /// Which attribute tripped the gate (`text`, `class`, `data-target`).
        field: &'static str,
        /// The forbidden token that matched.
        token: &'static str,
    },
}

impl GateDecision {
    /// Whether the click may proceed.
    #[must_use]
    pub const fn permitted(&self) -> bool {
        matches!(self, Self::Permit)
    }
}

/// Stateless safety gate.
#[derive(Clone, Copy, Debug, Default)]
pub struct SafetyGate;

impl SafetyGate {
    /// Evaluate an element about to be clicked.
    ///
    /// Rejects when the text content, the `class` attribute or the
    /// `data-target` attribute contains any forbidden token. Absent
    /// attributes cannot trip the gate.
    #[must_use]
    pub fn evaluate(
        text: &str,
        class: Option<&str>,
        data_target: Option<&str>,
    ) -> GateDecision {
        for token in FORBIDDEN_TEXT_TOKENS {
            if text.contains(token) {
                return GateDecision::Reject {
                    field: "text",
                    token,
                };
            }
        }
        if let Some(class) = class {
            for token in FORBIDDEN_CLASS_TOKENS {
                if class.contains(token) {
                    return GateDecision::Reject {
                        field: "class",
                        token,
                    };
                }
            }
        }
        if let Some(target) = data_target {
            for token in FORBIDDEN_TARGET_TOKENS {
                if target.contains(token) {
                    return GateDecision::Reject {
                        field: "data-target",
                        token,
                    };
                }
            }
        }
        GateDecision::Permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_dismiss_buttons_pass() {
        assert!(SafetyGate::evaluate("Não, obrigado", Some("notif__dismiss"), None).permitted());
        assert!(SafetyGate::evaluate("Cancelar", None, None).permitted());
        assert!(SafetyGate::evaluate("X", Some("modal__close"), Some("close")).permitted());
    }

    #[test]
    fn forbidden_text_is_rejected() {
        let decision = SafetyGate::evaluate("Remover todos os produtos", None, None);
        assert!(!decision.permitted());
        assert!(matches!(
            decision,
            GateDecision::Reject { field: "text", .. }
        ));
    }

    #[test]
    fn forbidden_text_as_substring_is_rejected() {
        let decision = SafetyGate::evaluate("Sim, Eliminar tudo agora", None, None);
        assert!(!decision.permitted());
    }

    #[test]
    fn forbidden_class_is_rejected() {
        let decision =
            SafetyGate::evaluate("Ok", Some("btn auc-cart__remove-all"), None);
        assert!(matches!(
            decision,
            GateDecision::Reject { field: "class", .. }
        ));
    }

    #[test]
    fn forbidden_data_target_is_rejected() {
        let decision = SafetyGate::evaluate("Ok", None, Some("#clear-cart-confirm"));
        assert!(matches!(
            decision,
            GateDecision::Reject {
                field: "data-target",
                ..
            }
        ));
    }

    #[test]
    fn confirm_is_always_suspect() {
        // "Confirmar" confirms whatever the modal asks, including removal.
        assert!(!SafetyGate::evaluate("Confirmar", None, None).permitted());
    }

    #[test]
    fn absent_attributes_cannot_trip_the_gate() {
        assert!(SafetyGate::evaluate("Fechar", None, None).permitted());
    }
}
