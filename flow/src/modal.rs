//! Reorder-modal handling policy.

use crate::verify::MergeMode;
use cartpilot_arbiter::patterns::PatternSet;
use cartpilot_arbiter::sweep::ensure_no_blocking_popups;
use cartpilot_core::config::Timeouts;
use cartpilot_core::error::CopilotError;
use cartpilot_core::port::{ClickOptions, FindOptions, Interactor};
use cartpilot_core::probe::ReorderModalKind;
use cartpilot_registry::{try_resolve, Registry};
use std::time::Duration;

/// Result of one modal-handling attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModalOutcome {
    /// The modal was confirmed; the cart should be updating.
    Handled,
    /// No modal was handled; the caller may retry the reorder click.
    NotHandled,
}

const MODAL_PAGE: &str = "reorder-modal";

/// Apply the modal policy for one reorder attempt.
///
/// - A removal modal is cancelled to preserve the cart and reported as
///   [`ModalOutcome::NotHandled`] so the outer step retries.
/// - In merge mode the merge button is preferred; when it does not appear
///   within the merge-button window the confirm button is used instead.
/// - In replace mode the confirm button is used directly.
///
/// Every click is preceded by a bounded popup sweep; the arbiter may act
/// concurrently at any point.
///
/// # Errors
///
/// Propagates registry misses (fatal for the phase) and click failures.
pub async fn handle_reorder_modal<I: Interactor>(
    interactor: &I,
    registry: &Registry,
    patterns: &PatternSet,
    mode: MergeMode,
    timeouts: &Timeouts,
) -> Result<ModalOutcome, CopilotError> {
    let probe = interactor.reorder_modal().await;

    if probe.kind == ReorderModalKind::Removal {
        tracing::warn!("cart-removal modal detected; cancelling to preserve the cart");
        ensure_no_blocking_popups(interactor, patterns, "modal button click").await;
        let cancel = try_resolve(
            interactor,
            registry,
            MODAL_PAGE,
            "cancel-button",
            FindOptions::visible_within(Duration::from_millis(timeouts.modal_wait_ms)),
        )
        .await
        .map_err(CopilotError::from)?;
        if let Some(cancel) = cancel {
            interactor
                .click(
                    &cancel.handle,
                    ClickOptions {
                        timeout: Duration::from_millis(timeouts.modal_wait_ms),
                    },
                )
                .await
                .map_err(CopilotError::from)?;
        }
        return Ok(ModalOutcome::NotHandled);
    }

    if !probe.found {
        return Ok(ModalOutcome::NotHandled);
    }

    if mode == MergeMode::Merge {
        ensure_no_blocking_popups(interactor, patterns, "modal button click").await;
        let merge_button = try_resolve(
            interactor,
            registry,
            MODAL_PAGE,
            "merge-button",
            FindOptions::visible_within(Duration::from_millis(timeouts.merge_button_wait_ms)),
        )
        .await
        .map_err(CopilotError::from)?;
        if let Some(merge_button) = merge_button {
            interactor
                .click(
                    &merge_button.handle,
                    ClickOptions {
                        timeout: Duration::from_millis(timeouts.modal_wait_ms),
                    },
                )
                .await
                .map_err(CopilotError::from)?;
            tracing::debug!("merge button clicked");
            return Ok(ModalOutcome::Handled);
        }
        tracing::debug!("merge button never appeared; falling through to confirm");
    }

    ensure_no_blocking_popups(interactor, patterns, "modal button click").await;
    let confirm = try_resolve(
        interactor,
        registry,
        MODAL_PAGE,
        "confirm-button",
        FindOptions::visible_within(Duration::from_millis(timeouts.modal_wait_ms)),
    )
    .await
    .map_err(CopilotError::from)?;
    match confirm {
        Some(confirm) => {
            interactor
                .click(
                    &confirm.handle,
                    ClickOptions {
                        timeout: Duration::from_millis(timeouts.modal_wait_ms),
                    },
                )
                .await
                .map_err(CopilotError::from)?;
            tracing::debug!("confirm-reorder button clicked");
            Ok(ModalOutcome::Handled)
        },
        None => Ok(ModalOutcome::NotHandled),
    }
}
