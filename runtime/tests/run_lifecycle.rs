//! Integration tests for the run orchestrator lifecycle.
//!
//! Each test wires a scripted page, real stores (in-memory) and an
//! unavailable LLM, then drives the orchestrator through the full phase
//! pipeline and asserts on the resulting state machine and review pack.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use cartpilot_core::config::CopilotConfig;
use cartpilot_core::error::{CopilotError, ErrorKind};
use cartpilot_core::port::{PersistedSession, SessionStore, SystemClock};
use cartpilot_core::probe::ReorderModalKind;
use cartpilot_core::state::{
    CheckpointRecord, PartialResults, RunPhase, RunState, RunStatus, RunStep,
};
use cartpilot_core::types::{OrderToMerge, ReviewPackStatus};
use cartpilot_enhancer::{Enhancer, EnhancerOptions};
use cartpilot_registry::Registry;
use cartpilot_runtime::orchestrator::{Orchestrator, OrchestratorDeps};
use cartpilot_runtime::service::ApprovalData;
use cartpilot_testing::mocks::{ClickEffect, ElementSpec, MockInteractor};
use cartpilot_testing::stores::{
    MemoryCacheStore, MemoryEphemeralStore, MemoryPreferenceStore, MemorySessionStore,
};
use cartpilot_testing::ScriptedLlm;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

fn fast_config() -> CopilotConfig {
    let mut config = CopilotConfig::default();
    config.timeouts.operation_ms = 100;
    config.timeouts.order_header_wait_ms = 150;
    config.timeouts.modal_materialize_ms = 10;
    config.timeouts.modal_wait_ms = 50;
    config.timeouts.merge_button_wait_ms = 50;
    config.timeouts.cart_update_wait_ms = 10;
    config.max_orders_to_merge = 3;
    config
}

struct Harness {
    page: Arc<MockInteractor>,
    session_store: Arc<MemorySessionStore>,
    orchestrator: Arc<Orchestrator<MockInteractor>>,
}

fn harness_with(page: Arc<MockInteractor>, session_store: Arc<MemorySessionStore>) -> Harness {
    let deps = OrchestratorDeps {
        interactor: Arc::clone(&page),
        registry: Arc::new(Registry::bundled().expect("bundled registry parses")),
        config: fast_config(),
        enhancer: Arc::new(Enhancer::new(
            Arc::new(ScriptedLlm::unavailable()),
            EnhancerOptions::default(),
        )),
        session_store: Arc::clone(&session_store) as Arc<dyn SessionStore>,
        ephemeral: Arc::new(MemoryEphemeralStore::new()),
        preferences: Arc::new(MemoryPreferenceStore::new()),
        cache: Arc::new(MemoryCacheStore::new()),
        clock: Arc::new(SystemClock),
    };
    let orchestrator = Arc::new(Orchestrator::new("sess-test", deps));
    Harness {
        page,
        session_store,
        orchestrator,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(MockInteractor::new()), Arc::new(MemorySessionStore::new()))
}

fn stage_login(page: &MockInteractor) {
    page.add_element("[data-testid='account-menu']", "A minha conta");
    page.add_element("[data-testid='account-name']", "Marta");
}

fn stage_order_list(page: &MockInteractor, orders: &[(&str, &str, &str)]) {
    for (id, date, total) in orders {
        page.add_element("[data-testid='order-card']", "");
        page.add_element("[data-testid='order-number']", *id);
        page.add_element("[data-testid='order-date']", *date);
        page.add_element("[data-testid='order-total']", *total);
        page.add_element("[data-testid='order-product-count']", "9 artigos");
        page.add_spec(
            ElementSpec::new("a[data-testid='order-detail-link']", "Ver detalhe")
                .with_attribute("href", &format!("/orders/{id}")),
        );
    }
}

/// Cart line elements added by a confirm click, so the cart page fills up
/// only after the merge actually happens.
fn cart_line_effects(name: &str, qty: &str, price: &str, product_id: &str) -> Vec<ClickEffect> {
    vec![
        ClickEffect::AddElement(
            ElementSpec::new("[data-testid='cart-line']", "")
                .with_attribute("data-product-id", product_id),
        ),
        ClickEffect::AddElement(ElementSpec::new("[data-testid='cart-line-name']", name)),
        ClickEffect::AddElement(
            ElementSpec::new("[data-testid='cart-line-qty'] input", "").with_attribute("value", qty),
        ),
        ClickEffect::AddElement(ElementSpec::new("[data-testid='cart-line-price']", price)),
    ]
}

async fn wait_for_status(
    orchestrator: &Arc<Orchestrator<MockInteractor>>,
    expected: RunStatus,
) -> RunState {
    for _ in 0..400 {
        let state = orchestrator.state().await;
        if state.status == expected {
            return state;
        }
        if state.status == RunStatus::Paused && expected != RunStatus::Paused {
            panic!("run paused unexpectedly: {:?}", state.error);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run never reached {expected:?}");
}

// ============================================================================
// Full pipeline
// ============================================================================

#[tokio::test]
async fn two_orders_merge_to_review_ready_with_heuristics_only() {
    let h = harness();
    stage_login(&h.page);
    stage_order_list(
        &h.page,
        &[
            ("10002", "09/01/2026", "48,70 €"),
            ("10001", "02/01/2026", "35,10 €"),
        ],
    );

    h.page.add_element("[data-testid='order-detail-header']", "Encomenda");
    h.page.set_cart(Some(0), Some(0));

    // Order 10001 (older) goes first and replaces the cart.
    let reorder_a = h.page.add_element("[data-testid='reorder-button']", "Encomendar de novo");
    h.page.set_click_effects(
        reorder_a,
        vec![
            ClickEffect::SetModal(ReorderModalKind::Replace),
            ClickEffect::RemoveSelf,
        ],
    );
    let confirm_a = h.page.add_element("[data-testid='reorder-confirm']", "Encomendar de novo");
    let mut effects_a = vec![
        ClickEffect::RemoveSelf,
        ClickEffect::ClearModal,
        ClickEffect::SetCartState {
            item_count: Some(4),
            total_cents: Some(1200),
        },
    ];
    effects_a.extend(cart_line_effects("Leite Meio Gordo", "4", "0,93 €", "p-1"));
    h.page.set_click_effects(confirm_a, effects_a);

    // Order 10002 (newer) merges via the Juntar button.
    let reorder_b = h.page.add_element("[data-testid='reorder-button']", "Encomendar de novo");
    h.page.set_click_effects(reorder_b, vec![ClickEffect::SetModal(ReorderModalKind::Merge)]);
    let merge_b = h.page.add_element("[data-testid='reorder-merge']", "Juntar");
    let mut effects_b = vec![
        ClickEffect::RemoveSelf,
        ClickEffect::ClearModal,
        ClickEffect::SetCartState {
            item_count: Some(6),
            total_cents: Some(1800),
        },
    ];
    effects_b.extend(cart_line_effects("Pão de forma", "2", "1,39 €", "p-2"));
    // The merged item is flagged unavailable, feeding the substitution phase.
    effects_b.push(ClickEffect::AddElement(ElementSpec::new(
        "[data-testid='cart-line-unavailable']",
        "Pão de forma",
    )));
    h.page.set_click_effects(merge_b, effects_b);

    // Substitute search results.
    for (name, price, brand) in [
        ("Pão de forma Mercado", "1,19 €", "Mercado"),
        ("Pão de forma Bimbo", "1,59 €", "Bimbo"),
    ] {
        h.page.add_element("[data-testid='product-tile']", "");
        h.page.add_element("[data-testid='tile-name']", name);
        h.page.add_element("[data-testid='tile-price']", price);
        h.page.add_element("[data-testid='tile-unit-price']", "");
        h.page.add_element("[data-testid='tile-brand']", brand);
    }

    // One bookable delivery slot.
    h.page.add_spec(
        ElementSpec::new("[data-testid='delivery-slot']", "")
            .with_attribute("data-slot-id", "slot-1")
            .with_attribute("data-starts-at", "2026-08-03T10:00:00Z")
            .with_attribute("data-ends-at", "2026-08-03T12:00:00Z"),
    );

    h.orchestrator.start("household-1").await.expect("start");
    tokio::spawn(Arc::clone(&h.orchestrator).run());

    let state = wait_for_status(&h.orchestrator, RunStatus::Review).await;
    assert_eq!(state.phase, RunPhase::Finalizing);
    assert_eq!(state.error_count, 0);
    assert_eq!(state.progress.orders_total, 2);
    assert_eq!(state.progress.unavailable_items, 1);
    assert_eq!(state.progress.substitutes_proposed, 1);
    assert_eq!(state.progress.slots_found, 1);

    let pack = h.orchestrator.review_pack().await.expect("review pack");
    assert_eq!(pack.status, ReviewPackStatus::ReviewReady);
    assert!(pack.cart.summary.added_count >= 1);
    assert_eq!(pack.confidence.source_orders.len(), 2);
    // Two source orders against a budget of three: sparse history.
    assert!(pack.confidence.data_quality < 1.0);
    let substitutions = pack.substitutions.as_ref().expect("substitutions");
    assert_eq!(substitutions[0].original.name, "Pão de forma");
    assert!(!substitutions[0].candidates.is_empty());
    assert!(pack.pruning.as_ref().is_some_and(|p| !p.is_empty()));
    assert!(pack.slots.as_ref().is_some_and(|s| s.len() == 1));

    // Approval is the only road to complete, and it places no order.
    let state = h
        .orchestrator
        .approve(ApprovalData::default())
        .await
        .expect("approve");
    assert_eq!(state.status, RunStatus::Complete);
}

// ============================================================================
// Finalization gate
// ============================================================================

#[tokio::test]
async fn successful_merge_with_empty_cart_pauses_as_inconsistent() {
    let h = harness();
    stage_login(&h.page);
    stage_order_list(&h.page, &[("10001", "02/01/2026", "35,10 €")]);

    h.page.add_element("[data-testid='order-detail-header']", "Encomenda");
    h.page.set_cart(Some(0), Some(0));

    let reorder = h.page.add_element("[data-testid='reorder-button']", "Encomendar de novo");
    h.page.set_click_effects(reorder, vec![ClickEffect::SetModal(ReorderModalKind::Replace)]);
    let confirm = h.page.add_element("[data-testid='reorder-confirm']", "Encomendar de novo");
    // The probe claims items landed, but no cart rows ever appear.
    h.page.set_click_effects(
        confirm,
        vec![
            ClickEffect::RemoveSelf,
            ClickEffect::ClearModal,
            ClickEffect::SetCartState {
                item_count: Some(5),
                total_cents: Some(900),
            },
        ],
    );

    h.orchestrator.start("household-1").await.expect("start");
    tokio::spawn(Arc::clone(&h.orchestrator).run());

    for _ in 0..400 {
        let state = h.orchestrator.state().await;
        if state.status == RunStatus::Paused {
            let error = state.error.expect("paused with error");
            assert_eq!(error.kind, ErrorKind::Corruption);
            assert!(h.orchestrator.review_pack().await.is_none());
            return;
        }
        assert_ne!(state.status, RunStatus::Review, "gate must not pass");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run never paused on the finalization gate");
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn stale_running_session_resumes_mid_cart_with_merge_mode() {
    let session_store = Arc::new(MemorySessionStore::new());
    let now = Utc::now();

    let order = |id: &str, days_ago: i64| OrderToMerge {
        order_id: id.to_string(),
        detail_url: format!("https://www.mercado.example/orders/{id}"),
        date: now - ChronoDuration::days(days_ago),
    };

    // A run died after merging order A: status running, stale heartbeat,
    // checkpoint in the cart phase with A recorded as merged.
    let mut state = RunState::idle("run-sess-test", now - ChronoDuration::minutes(5));
    state.status = RunStatus::Running;
    state.phase = RunPhase::Cart;
    state.step = Some(RunStep::MergingOrders);
    state.started_at = Some(now - ChronoDuration::minutes(6));
    let checkpoint = CheckpointRecord {
        phase: RunPhase::Cart,
        step: Some(RunStep::MergingOrders),
        last_successful_item: Some("A".to_string()),
        partial_results: PartialResults {
            orders_loaded: Some(vec![order("A", 9), order("B", 2)]),
            ..PartialResults::default()
        },
        timestamp: now - ChronoDuration::minutes(5),
    };
    session_store
        .save(
            "sess-test",
            &PersistedSession {
                state,
                checkpoint: Some(checkpoint),
                household_id: Some("household-1".to_string()),
            },
        )
        .await
        .expect("seed persisted session");

    // Page state as the dead run left it: A's items already in the cart.
    let page = Arc::new(MockInteractor::new());
    stage_login(&page);
    page.set_cart(Some(4), Some(1200));
    page.add_element("[data-testid='cart-line']", "");
    page.add_element("[data-testid='cart-line-name']", "Leite Meio Gordo");
    page.add_spec(
        ElementSpec::new("[data-testid='cart-line-qty'] input", "").with_attribute("value", "4"),
    );
    page.add_element("[data-testid='cart-line-price']", "0,93 €");

    page.add_element("[data-testid='order-detail-header']", "Encomenda");
    let reorder = page.add_element("[data-testid='reorder-button']", "Encomendar de novo");
    page.set_click_effects(reorder, vec![ClickEffect::SetModal(ReorderModalKind::Merge)]);
    let merge = page.add_element("[data-testid='reorder-merge']", "Juntar");
    let mut effects = vec![
        ClickEffect::RemoveSelf,
        ClickEffect::ClearModal,
        ClickEffect::SetCartState {
            item_count: Some(6),
            total_cents: Some(1800),
        },
    ];
    effects.extend(cart_line_effects("Ovos M", "2", "2,49 €", "p-9"));
    page.set_click_effects(merge, effects);

    let deps = OrchestratorDeps {
        interactor: Arc::clone(&page),
        registry: Arc::new(Registry::bundled().expect("bundled registry parses")),
        config: fast_config(),
        enhancer: Arc::new(Enhancer::new(
            Arc::new(ScriptedLlm::unavailable()),
            EnhancerOptions::default(),
        )),
        session_store: Arc::clone(&session_store) as Arc<dyn SessionStore>,
        ephemeral: Arc::new(MemoryEphemeralStore::new()),
        preferences: Arc::new(MemoryPreferenceStore::new()),
        cache: Arc::new(MemoryCacheStore::new()),
        clock: Arc::new(SystemClock),
    };
    let orchestrator = Arc::new(
        Orchestrator::recover("sess-test", deps)
            .await
            .expect("recover"),
    );
    assert!(orchestrator.recovery_needed().await);

    tokio::spawn(Arc::clone(&orchestrator).run());
    let state = wait_for_status(&orchestrator, RunStatus::Review).await;
    assert!(!state.recovery_needed);

    // Only order B was (re)processed, in merge mode: the replace click
    // pattern for A never ran again.
    let navigations = page.navigations();
    assert!(navigations.iter().any(|u| u.contains("/orders/B")));
    assert!(!navigations.iter().any(|u| u.contains("/orders/A")));
    assert_eq!(page.clicked_texts().first().map(String::as_str), Some("Encomendar de novo"));
    assert!(page.clicked_texts().contains(&"Juntar".to_string()));

    let pack = orchestrator.review_pack().await.expect("review pack");
    assert!(pack.cart.after.item_count > 0);
    assert_eq!(pack.household_id, "household-1");
}

// ============================================================================
// Guards and cancellation
// ============================================================================

#[tokio::test]
async fn approve_outside_review_is_an_invalid_transition() {
    let h = harness();
    let result = h.orchestrator.approve(ApprovalData::default()).await;
    assert!(matches!(
        result,
        Err(CopilotError {
            kind: ErrorKind::InvalidTransition,
            ..
        })
    ));
}

#[tokio::test]
async fn start_requires_login() {
    let h = harness();
    // No account menu on the page at all.
    let result = h.orchestrator.start("household-1").await;
    assert!(result.is_err_and(|e| e.kind == ErrorKind::NotLoggedIn));
    assert_eq!(h.orchestrator.state().await.status, RunStatus::Idle);
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let h = harness();
    stage_login(&h.page);
    stage_order_list(&h.page, &[("10001", "02/01/2026", "35,10 €")]);
    h.orchestrator.start("household-1").await.expect("start");

    let second = h.orchestrator.start("household-1").await;
    assert!(second.is_err_and(|e| e.kind == ErrorKind::InvalidTransition));
}

#[tokio::test]
async fn cancel_pauses_with_user_cancelled_and_is_idempotent() {
    let h = harness();
    stage_login(&h.page);
    // Order history never renders, so the run sits in retries.
    h.orchestrator.start("household-1").await.expect("start");
    tokio::spawn(Arc::clone(&h.orchestrator).run());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = h.orchestrator.cancel_run().await;
    assert_eq!(state.status, RunStatus::Paused);
    assert!(state.error.as_ref().is_some_and(|e| e.kind == ErrorKind::Cancelled));

    // Second cancel changes nothing.
    let again = h.orchestrator.cancel_run().await;
    assert_eq!(again.status, RunStatus::Paused);
    assert_eq!(again.error, state.error);
}

#[tokio::test]
async fn checkpoints_are_persisted_and_survive_store_failures() {
    let h = harness();
    stage_login(&h.page);
    stage_order_list(&h.page, &[("10001", "02/01/2026", "35,10 €")]);

    h.page.add_element("[data-testid='order-detail-header']", "Encomenda");
    h.page.set_cart(Some(0), Some(0));
    let reorder = h.page.add_element("[data-testid='reorder-button']", "Encomendar de novo");
    h.page.set_click_effects(reorder, vec![ClickEffect::SetModal(ReorderModalKind::Replace)]);
    let confirm = h.page.add_element("[data-testid='reorder-confirm']", "Encomendar de novo");
    let mut effects = vec![
        ClickEffect::RemoveSelf,
        ClickEffect::ClearModal,
        ClickEffect::SetCartState {
            item_count: Some(2),
            total_cents: Some(400),
        },
    ];
    effects.extend(cart_line_effects("Arroz Agulha 1kg", "2", "2,00 €", "p-3"));
    h.page.set_click_effects(confirm, effects);

    // Every write fails; the run must still reach review on memory alone.
    h.session_store.fail_writes(true);

    h.orchestrator.start("household-1").await.expect("start");
    tokio::spawn(Arc::clone(&h.orchestrator).run());
    wait_for_status(&h.orchestrator, RunStatus::Review).await;
    assert!(h.session_store.is_empty());

    // With writes healthy again, the next state change lands on disk.
    h.session_store.fail_writes(false);
    h.orchestrator
        .approve(ApprovalData::default())
        .await
        .expect("approve");
    assert_eq!(h.session_store.len(), 1);
}
