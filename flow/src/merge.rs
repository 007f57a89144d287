//! The reorder-and-merge flow.
//!
//! Orders are processed oldest first: the first replaces the cart, the
//! rest merge into it, so the newest items end up last. The popup observer
//! runs for the whole flow and is detached on every exit path. A single
//! failing order does not abort the flow; the flow is globally successful
//! only when every order succeeded.

use crate::modal::{handle_reorder_modal, ModalOutcome};
use crate::verify::{items_added, verify_change, MergeMode, Verification};
use cartpilot_arbiter::observer::{ObserverConfig, PopupObserver};
use cartpilot_arbiter::patterns::PatternSet;
use cartpilot_arbiter::sweep::ensure_no_blocking_popups;
use cartpilot_core::config::CopilotConfig;
use cartpilot_core::error::CopilotError;
use cartpilot_core::port::{ClickOptions, FindOptions, Interactor, NavigateOptions};
use cartpilot_core::types::{CartState, OrderToMerge};
use cartpilot_registry::{try_resolve, Registry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Per-order outcome of the merge flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderMergeResult {
    /// The order processed.
    pub order_id: String,
    /// Replace or merge.
    pub mode: MergeMode,
    /// Overall success: verified change or cart redirect.
    pub success: bool,
    /// Verification ladder outcome, when the attempt got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    /// Items this order added, when counts were readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_added: Option<i64>,
    /// Cart probe before the reorder click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_before: Option<CartState>,
    /// Cart probe after the update wait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_after: Option<CartState>,
    /// Why the order failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Aggregate result of the merge flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartMergeFlowResult {
    /// Per-order outcomes, in processing order (oldest first).
    pub orders: Vec<OrderMergeResult>,
    /// Final cart probe after the last order.
    pub final_cart: CartState,
    /// The flow succeeded only if every order succeeded.
    pub all_succeeded: bool,
    /// Popups dismissed by the observer while the flow ran.
    pub observer_dismissals: u64,
}

/// Options for one flow invocation.
pub struct MergeOptions {
    /// Mode of the first processed order. A fresh run replaces; a recovery
    /// resuming after already-merged orders continues with merge.
    pub first_mode: MergeMode,
    /// Per-order progress channel, used by the orchestrator to checkpoint
    /// between orders.
    pub progress: Option<tokio::sync::mpsc::UnboundedSender<OrderMergeResult>>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            first_mode: MergeMode::Replace,
            progress: None,
        }
    }
}

/// The shared cart-merge flow, generic over the page adapter.
pub struct MergeFlow<I: Interactor + 'static> {
    interactor: Arc<I>,
    registry: Arc<Registry>,
    patterns: PatternSet,
    config: CopilotConfig,
    observer_config: ObserverConfig,
}

const ORDER_DETAIL_PAGE: &str = "order-detail";

impl<I: Interactor + 'static> MergeFlow<I> {
    /// Build a flow over the given adapter and registry.
    #[must_use]
    pub fn new(
        interactor: Arc<I>,
        registry: Arc<Registry>,
        patterns: PatternSet,
        config: CopilotConfig,
    ) -> Self {
        Self {
            interactor,
            registry,
            patterns,
            config,
            observer_config: ObserverConfig::default(),
        }
    }

    /// Override the observer timing (tests use faster intervals).
    #[must_use]
    pub const fn with_observer_config(mut self, observer_config: ObserverConfig) -> Self {
        self.observer_config = observer_config;
        self
    }

    /// Run the flow over up to N orders.
    ///
    /// Orders are sorted ascending by date; the first gets
    /// [`MergeMode::Replace`], the rest [`MergeMode::Merge`]. The popup
    /// observer is attached for the duration and detached on every exit
    /// path, including early returns.
    pub async fn run(&self, orders: Vec<OrderToMerge>) -> CartMergeFlowResult {
        self.run_with(orders, MergeOptions::default()).await
    }

    /// Run the flow with explicit options (see [`MergeOptions`]).
    pub async fn run_with(
        &self,
        mut orders: Vec<OrderToMerge>,
        options: MergeOptions,
    ) -> CartMergeFlowResult {
        orders.sort_by_key(|o| o.date);

        let observer = PopupObserver::new(
            Arc::clone(&self.interactor),
            self.patterns.clone(),
            self.observer_config,
        );
        observer.attach().await;

        let mut results = Vec::with_capacity(orders.len());
        for (index, order) in orders.iter().enumerate() {
            let mode = if index == 0 {
                options.first_mode
            } else {
                MergeMode::Merge
            };
            tracing::info!(order_id = %order.order_id, ?mode, "merging order");
            let result = self.merge_one(order, mode).await;
            if let Some(failure) = &result.failure {
                tracing::warn!(order_id = %order.order_id, failure, "order merge failed");
            }
            if let Some(progress) = &options.progress {
                let _ = progress.send(result.clone());
            }
            results.push(result);
        }

        let final_cart = self.interactor.cart_state().await;
        let observer_dismissals = observer.detach().await;

        let all_succeeded = !results.is_empty() && results.iter().all(|r| r.success);
        CartMergeFlowResult {
            orders: results,
            final_cart,
            all_succeeded,
            observer_dismissals,
        }
    }

    /// One order: navigate, guard, click, handle modal, verify.
    async fn merge_one(&self, order: &OrderToMerge, mode: MergeMode) -> OrderMergeResult {
        let mut result = OrderMergeResult {
            order_id: order.order_id.clone(),
            mode,
            success: false,
            verification: None,
            items_added: None,
            cart_before: None,
            cart_after: None,
            failure: None,
        };

        if let Err(err) = self.goto_order(order).await {
            result.failure = Some(err.to_string());
            return result;
        }

        // Reorder click plus modal handling, retried once when the modal
        // does not materialize (or a removal modal pushed back).
        let timeouts = &self.config.timeouts;
        let mut cart_before = None;
        for attempt in 0..2u8 {
            ensure_no_blocking_popups(
                self.interactor.as_ref(),
                &self.patterns,
                "before reorder click",
            )
            .await;

            let before = self.interactor.cart_state().await;

            if let Err(err) = self.click_reorder().await {
                result.failure = Some(err.to_string());
                return result;
            }

            self.interactor
                .wait_for_timeout(Duration::from_millis(timeouts.modal_materialize_ms))
                .await;

            match handle_reorder_modal(
                self.interactor.as_ref(),
                &self.registry,
                &self.patterns,
                mode,
                timeouts,
            )
            .await
            {
                Ok(ModalOutcome::Handled) => {
                    cart_before = Some(before);
                    break;
                },
                Ok(ModalOutcome::NotHandled) => {
                    tracing::debug!(order_id = %order.order_id, attempt, "modal not handled");
                },
                Err(err) => {
                    result.failure = Some(err.to_string());
                    return result;
                },
            }
        }

        let Some(before) = cart_before else {
            result.failure = Some("reorder modal never handled".to_string());
            return result;
        };

        self.interactor
            .wait_for_timeout(Duration::from_millis(timeouts.cart_update_wait_ms))
            .await;

        let after = self.interactor.cart_state().await;
        let verification = verify_change(mode, &before, &after);
        let redirected_to_cart = self
            .interactor
            .current_url()
            .await
            .is_ok_and(|url| url.contains(&self.config.site.cart_path));

        result.items_added = items_added(mode, &before, &after);
        result.cart_before = Some(before);
        result.cart_after = Some(after);
        result.verification = Some(verification);
        result.success = verification.success() || redirected_to_cart;
        if !result.success {
            result.failure = Some("cart state did not reflect the merge".to_string());
        }
        result
    }

    /// Land on the order detail page, unless already there.
    async fn goto_order(&self, order: &OrderToMerge) -> Result<(), CopilotError> {
        let current = self
            .interactor
            .current_url()
            .await
            .unwrap_or_default();
        if !current.contains(&order.order_id) {
            self.interactor
                .navigate_to(
                    &order.detail_url,
                    NavigateOptions {
                        timeout: self.config.timeouts.navigation(),
                    },
                )
                .await
                .map_err(CopilotError::from)?;
        }

        let header = try_resolve(
            self.interactor.as_ref(),
            &self.registry,
            ORDER_DETAIL_PAGE,
            "order-header",
            FindOptions::visible_within(Duration::from_millis(
                self.config.timeouts.order_header_wait_ms,
            )),
        )
        .await
        .map_err(CopilotError::from)?;

        if header.is_none() {
            return Err(CopilotError::new(
                cartpilot_core::error::ErrorKind::ElementNotFound,
                format!("order header missing for {}", order.order_id),
            ));
        }
        Ok(())
    }

    /// Click the reorder button, with one guarded retry on failure.
    async fn click_reorder(&self) -> Result<(), CopilotError> {
        let button = try_resolve(
            self.interactor.as_ref(),
            &self.registry,
            ORDER_DETAIL_PAGE,
            "reorder-button",
            FindOptions::visible_within(self.config.timeouts.operation()),
        )
        .await
        .map_err(CopilotError::from)?
        .ok_or_else(|| {
            CopilotError::new(
                cartpilot_core::error::ErrorKind::ElementNotFound,
                "reorder button not found",
            )
        })?;

        let click_opts = ClickOptions {
            timeout: self.config.timeouts.operation(),
        };
        if let Err(first) = self.interactor.click(&button.handle, click_opts).await {
            tracing::debug!(error = %first, "reorder click failed; clearing popups and retrying");
            ensure_no_blocking_popups(
                self.interactor.as_ref(),
                &self.patterns,
                "reorder click retry",
            )
            .await;
            self.interactor
                .click(&button.handle, click_opts)
                .await
                .map_err(CopilotError::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartpilot_arbiter::patterns::default_patterns;
    use cartpilot_core::probe::ReorderModalKind;
    use cartpilot_testing::mocks::{ClickEffect, MockInteractor};
    use chrono::{TimeZone, Utc};

    fn fast_config() -> CopilotConfig {
        let mut config = CopilotConfig::default();
        config.timeouts.operation_ms = 100;
        config.timeouts.order_header_wait_ms = 100;
        config.timeouts.modal_materialize_ms = 10;
        config.timeouts.merge_button_wait_ms = 50;
        config.timeouts.modal_wait_ms = 50;
        config.timeouts.cart_update_wait_ms = 10;
        config
    }

    fn fast_observer() -> ObserverConfig {
        ObserverConfig {
            scan_interval: Duration::from_millis(40),
            mutation_debounce: Duration::from_millis(5),
            cascade_delay: Duration::from_millis(15),
        }
    }

    fn order(id: &str, day: u32) -> OrderToMerge {
        OrderToMerge {
            order_id: id.to_string(),
            detail_url: format!("https://www.mercado.example/orders/{id}"),
            date: Utc
                .with_ymd_and_hms(2026, 1, day, 10, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    #[allow(clippy::expect_used)] // Test code
    fn registry() -> Arc<Registry> {
        Arc::new(Registry::bundled().expect("bundled registry parses"))
    }

    /// Wire a page where the reorder button opens a merge/replace modal and
    /// confirming it bumps the cart to the given count.
    fn script_order_page(page: &MockInteractor, after_count: u32, after_cents: i64, merge: bool) {
        page.add_element("[data-testid='order-detail-header']", "Encomenda");
        let reorder = page.add_element("[data-testid='reorder-button']", "Encomendar de novo");
        let modal_kind = if merge {
            ReorderModalKind::Merge
        } else {
            ReorderModalKind::Replace
        };
        page.set_click_effects(reorder, vec![ClickEffect::SetModal(modal_kind)]);

        let confirm_selector = if merge {
            "[data-testid='reorder-merge']"
        } else {
            "[data-testid='reorder-confirm']"
        };
        let label = if merge { "Juntar" } else { "Encomendar de novo" };
        let confirm = page.add_element(confirm_selector, label);
        page.set_click_effects(
            confirm,
            vec![
                ClickEffect::RemoveSelf,
                ClickEffect::ClearModal,
                ClickEffect::SetCartState {
                    item_count: Some(after_count),
                    total_cents: Some(after_cents),
                },
            ],
        );
    }

    #[tokio::test]
    async fn happy_merge_of_two_orders() {
        let page = Arc::new(MockInteractor::new());
        page.set_cart(Some(0), Some(0));
        script_order_page(&page, 6, 1200, false);

        let flow = MergeFlow::new(
            Arc::clone(&page),
            registry(),
            default_patterns(),
            fast_config(),
        )
        .with_observer_config(fast_observer());

        // Newest first on purpose; the flow must sort oldest first.
        let orders = vec![order("B", 9), order("A", 2)];

        // After order A lands, rewire the page for order B's merge.
        let page_for_b = Arc::clone(&page);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let cart = page_for_b.cart_state().await;
                if cart.item_count == Some(6)
                    && !page_for_b.has_element("[data-testid='reorder-merge']")
                    && !page_for_b.has_element("[data-testid='reorder-confirm']")
                {
                    script_order_page(&page_for_b, 9, 2000, true);
                    break;
                }
            }
        });

        let result = flow.run(orders).await;
        handle.abort();

        assert!(result.all_succeeded, "orders: {:?}", result.orders);
        assert_eq!(result.orders.len(), 2);
        // Oldest first: A replaced, B merged.
        assert_eq!(result.orders[0].order_id, "A");
        assert_eq!(result.orders[0].mode, MergeMode::Replace);
        assert_eq!(result.orders[1].order_id, "B");
        assert_eq!(result.orders[1].mode, MergeMode::Merge);
        assert_eq!(result.orders[0].items_added, Some(6));
        assert_eq!(result.orders[1].items_added, Some(3));
        assert_eq!(result.final_cart.item_count, Some(9));
    }

    #[tokio::test]
    async fn removal_modal_is_cancelled_then_merge_retries() {
        let page = Arc::new(MockInteractor::new());
        page.set_cart(Some(3), Some(600));
        page.add_element("[data-testid='order-detail-header']", "Encomenda");

        // First click raises the removal modal; the flow cancels it and
        // retries, and the second click raises the real replace modal.
        let reorder = page.add_element("[data-testid='reorder-button']", "Encomendar de novo");
        page.set_click_effect_sequence(
            reorder,
            vec![
                vec![ClickEffect::SetModal(ReorderModalKind::Removal)],
                vec![ClickEffect::SetModal(ReorderModalKind::Replace)],
            ],
        );

        let cancel = page.add_element("[data-testid='reorder-cancel']", "Cancelar");
        page.set_click_effects(cancel, vec![ClickEffect::RemoveSelf, ClickEffect::ClearModal]);

        let confirm = page.add_element("[data-testid='reorder-confirm']", "Encomendar de novo");
        page.set_click_effects(
            confirm,
            vec![
                ClickEffect::RemoveSelf,
                ClickEffect::ClearModal,
                ClickEffect::SetCartState {
                    item_count: Some(7),
                    total_cents: Some(1400),
                },
            ],
        );

        let flow = MergeFlow::new(
            Arc::clone(&page),
            registry(),
            default_patterns(),
            fast_config(),
        )
        .with_observer_config(fast_observer());

        let result = flow.run(vec![order("A", 2)]).await;

        // The destructive confirm was never clicked; Cancelar was.
        let clicked = page.clicked_texts();
        assert!(clicked.contains(&"Cancelar".to_string()));
        assert!(result.all_succeeded, "orders: {:?}", result.orders);
        assert_eq!(result.final_cart.item_count, Some(7));
    }

    #[tokio::test]
    async fn missing_order_header_fails_that_order_only() {
        let page = Arc::new(MockInteractor::new());
        page.set_cart(Some(0), Some(0));
        // No header element at all: the first order fails fast.

        let flow = MergeFlow::new(
            Arc::clone(&page),
            registry(),
            default_patterns(),
            fast_config(),
        )
        .with_observer_config(fast_observer());

        let result = flow.run(vec![order("A", 2)]).await;
        assert!(!result.all_succeeded);
        assert_eq!(result.orders.len(), 1);
        let failure = result.orders[0].failure.as_deref().unwrap_or_default();
        assert!(failure.contains("order header"), "failure: {failure}");
    }

    #[tokio::test]
    async fn all_null_probes_assume_success() {
        let page = Arc::new(MockInteractor::new());
        page.set_cart(None, None);
        script_order_page(&page, 1, 1, false);
        // Confirm click must leave the probes unreadable.
        let confirm_clicks = vec![ClickEffect::RemoveSelf, ClickEffect::ClearModal];
        let ids = {
            // Find the confirm element id by clicking paths: re-add cleanly.
            page.remove_matching("[data-testid='reorder-confirm']");
            let id = page.add_element("[data-testid='reorder-confirm']", "Encomendar de novo");
            page.set_click_effects(id, confirm_clicks);
            id
        };
        let _ = ids;

        let flow = MergeFlow::new(
            Arc::clone(&page),
            registry(),
            default_patterns(),
            fast_config(),
        )
        .with_observer_config(fast_observer());

        let result = flow.run(vec![order("A", 2)]).await;
        assert!(result.all_succeeded);
        assert_eq!(
            result.orders[0].verification,
            Some(Verification::Assumed)
        );
    }

    #[tokio::test]
    async fn empty_order_list_is_not_a_success() {
        let page = Arc::new(MockInteractor::new());
        let flow = MergeFlow::new(
            Arc::clone(&page),
            registry(),
            default_patterns(),
            fast_config(),
        )
        .with_observer_config(fast_observer());

        let result = flow.run(Vec::new()).await;
        assert!(!result.all_succeeded);
        assert!(result.orders.is_empty());
    }
}
