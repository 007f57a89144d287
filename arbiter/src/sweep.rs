//! One-shot popup sweeps and the pre-critical-action guard.

use crate::gate::{GateDecision, SafetyGate};
use crate::patterns::PatternSet;
use cartpilot_core::port::{ClickOptions, Interactor};
use std::time::Duration;

/// Click deadline for a dismissal; overlays that refuse to go within this
/// window are left for the next sweep.
const DISMISS_CLICK_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Gap between attempts in [`ensure_no_blocking_popups`].
const ENSURE_GAP: Duration = Duration::from_millis(500);

/// Attempts in [`ensure_no_blocking_popups`].
const ENSURE_ATTEMPTS: u32 = 3;

/// Run one sweep over the pattern set, in priority order.
///
/// Before the sweep the reorder modal is probed once; patterns flagged
/// `skip_if_reorder_modal` are skipped for the whole sweep when any variant
/// is visible. Every candidate click passes the [`SafetyGate`]; rejections
/// are logged at WARN and do not count as dismissals. Returns the number of
/// elements dismissed.
pub async fn dismiss_popups<I: Interactor>(interactor: &I, patterns: &PatternSet) -> usize {
    if patterns.is_empty() {
        return 0;
    }

    let modal = interactor.reorder_modal().await;
    let mut dismissed = 0usize;

    for pattern in patterns.ordered() {
        if pattern.skip_if_reorder_modal && modal.found {
            tracing::debug!(pattern = %pattern.name, "skipped: reorder modal visible");
            continue;
        }

        let candidates = match interactor.popup_candidates(pattern).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::debug!(pattern = %pattern.name, error = %err, "candidate lookup failed");
                continue;
            },
        };

        for handle in candidates {
            if !interactor.is_visible(&handle).await {
                continue;
            }
            let text = interactor.text_content(&handle).await.unwrap_or_default();
            if !pattern.text_matches(&text) {
                continue;
            }

            let class = interactor.attribute(&handle, "class").await;
            let data_target = interactor.attribute(&handle, "data-target").await;
            match SafetyGate::evaluate(&text, class.as_deref(), data_target.as_deref()) {
                GateDecision::Reject { field, token } => {
                    tracing::warn!(
                        pattern = %pattern.name,
                        field,
                        token,
                        text = %text,
                        "safety gate refused popup click"
                    );
                    metrics::counter!("cartpilot_popup_clicks_rejected_total").increment(1);
                    continue;
                },
                GateDecision::Permit => {},
            }

            match interactor
                .click(
                    &handle,
                    ClickOptions {
                        timeout: DISMISS_CLICK_TIMEOUT,
                    },
                )
                .await
            {
                Ok(()) => {
                    dismissed += 1;
                    tracing::debug!(pattern = %pattern.name, text = %text, "popup dismissed");
                },
                Err(err) => {
                    tracing::debug!(pattern = %pattern.name, error = %err, "dismiss click failed");
                },
            }
        }
    }

    if dismissed > 0 {
        metrics::counter!("cartpilot_popups_dismissed_total").increment(dismissed as u64);
    }
    dismissed
}

/// Clear the way immediately before a critical click.
///
/// Runs up to three sweeps with a 500 ms gap, stopping early once a sweep
/// dismisses nothing. Returns the total dismissed. Callers still re-check
/// visibility of their target afterwards; the observer may act in between.
pub async fn ensure_no_blocking_popups<I: Interactor>(
    interactor: &I,
    patterns: &PatternSet,
    context: &str,
) -> usize {
    let mut total = 0usize;
    for attempt in 0..ENSURE_ATTEMPTS {
        let dismissed = dismiss_popups(interactor, patterns).await;
        total += dismissed;
        if dismissed == 0 {
            break;
        }
        tracing::debug!(context, attempt, dismissed, "blocking popups cleared, re-checking");
        if attempt + 1 < ENSURE_ATTEMPTS {
            interactor.wait_for_timeout(ENSURE_GAP).await;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::default_patterns;
    use cartpilot_core::popup::{PopupPattern, TextMatchMode};
    use cartpilot_core::probe::ReorderModalKind;
    use cartpilot_testing::mocks::{ElementSpec, MockInteractor};

    fn single_pattern(selector: &str, text: Option<&str>) -> PatternSet {
        PatternSet::new(vec![PopupPattern {
            name: "test".into(),
            selector: selector.into(),
            text_match: text.map(str::to_string),
            match_mode: TextMatchMode::Substring,
            priority: 1,
            skip_if_reorder_modal: false,
            description: None,
        }])
    }

    #[tokio::test]
    async fn empty_pattern_set_is_a_noop() {
        let page = MockInteractor::new();
        page.add_element("#onetrust-accept-btn-handler", "Aceitar");
        let dismissed = dismiss_popups(&page, &PatternSet::empty()).await;
        assert_eq!(dismissed, 0);
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn cookie_banner_is_dismissed() {
        let page = MockInteractor::new();
        page.add_element("#onetrust-accept-btn-handler", "Aceitar cookies");
        let dismissed = dismiss_popups(&page, &default_patterns()).await;
        assert_eq!(dismissed, 1);
        assert!(!page.has_element("#onetrust-accept-btn-handler"));
    }

    #[tokio::test]
    async fn forbidden_text_is_never_clicked() {
        let page = MockInteractor::new();
        // Matches the broad button selector and the substring decline
        // pattern, but the text also carries a forbidden token.
        page.add_element("button", "Não, obrigado. Remover todos os produtos");
        let dismissed = dismiss_popups(&page, &default_patterns()).await;
        assert_eq!(dismissed, 0);
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn forbidden_class_is_never_clicked() {
        let page = MockInteractor::new();
        page.add_spec(
            ElementSpec::new("button", "Ok")
                .with_attribute("class", "btn auc-cart__remove-all"),
        );
        let dismissed = dismiss_popups(&page, &single_pattern("button", None)).await;
        assert_eq!(dismissed, 0);
    }

    #[tokio::test]
    async fn forbidden_data_target_is_never_clicked() {
        let page = MockInteractor::new();
        page.add_spec(
            ElementSpec::new("button", "Sim")
                .with_attribute("data-target", "#remove-all-confirm"),
        );
        let dismissed = dismiss_popups(&page, &single_pattern("button", None)).await;
        assert_eq!(dismissed, 0);
    }

    #[tokio::test]
    async fn reorder_modal_suppresses_flagged_patterns() {
        let page = MockInteractor::new();
        page.set_modal(ReorderModalKind::Merge);
        // Would match cart-removal-cancel, which is flagged.
        page.add_element(".modal button", "Cancelar");
        // Cookie banner is unconditional and still goes.
        page.add_element("#onetrust-accept-btn-handler", "Aceitar");

        let dismissed = dismiss_popups(&page, &default_patterns()).await;
        assert_eq!(dismissed, 1);
        assert!(page.has_element(".modal button"));
        assert!(!page.has_element("#onetrust-accept-btn-handler"));
    }

    #[tokio::test]
    async fn sweep_runs_in_priority_order() {
        let page = MockInteractor::new();
        page.add_element("button[aria-label='Fechar']", "fechar-janela");
        page.add_element("#onetrust-accept-btn-handler", "aceitar-cookies");

        let dismissed = dismiss_popups(&page, &default_patterns()).await;
        assert_eq!(dismissed, 2);
        // cookie-accept (priority 80) before modal-close-x (priority 10)
        assert_eq!(
            page.clicked_texts(),
            vec!["aceitar-cookies".to_string(), "fechar-janela".to_string()]
        );
    }

    #[tokio::test]
    async fn invisible_candidates_are_ignored() {
        let page = MockInteractor::new();
        page.add_spec(ElementSpec::new("#onetrust-accept-btn-handler", "Aceitar").hidden());
        let dismissed = dismiss_popups(&page, &default_patterns()).await;
        assert_eq!(dismissed, 0);
    }

    #[tokio::test]
    async fn ensure_runs_until_a_clean_sweep() {
        let page = MockInteractor::new();
        page.add_element("#onetrust-accept-btn-handler", "Aceitar");
        let total = ensure_no_blocking_popups(&page, &default_patterns(), "test").await;
        // First sweep dismisses one, second sweep is clean and stops.
        assert_eq!(total, 1);
    }
}
