//! Runtime chain resolution against a live page.

use crate::error::RegistryError;
use crate::registry::Registry;
use cartpilot_core::port::{FindOptions, FindResult, Interactor};

/// Resolve `(page_id, chain_id)` against the live page.
///
/// Looks the chain up in the registry — a missing chain is an error, fatal
/// for the calling phase — then asks the interactor to try the chain's
/// patterns in declared order. A resolution timeout is `Ok(None)`, never an
/// error; callers record `ELEMENT_NOT_FOUND` themselves when the chain is
/// essential.
///
/// # Errors
///
/// [`RegistryError::ChainNotFound`] / [`RegistryError::PageNotFound`] for
/// registry misses, [`RegistryError::Interact`] for transport faults below
/// the resolver.
pub async fn try_resolve<I: Interactor>(
    interactor: &I,
    registry: &Registry,
    page_id: &str,
    chain_id: &str,
    opts: FindOptions,
) -> Result<Option<FindResult<I::Handle>>, RegistryError> {
    let chain = registry.resolve(page_id, chain_id)?;
    let found = interactor.find_element(chain, opts).await?;
    match &found {
        Some(result) => {
            tracing::debug!(
                page = page_id,
                chain = chain_id,
                selector_index = result.selector_index,
                matched = %result.matched_selector,
                "chain resolved"
            );
            if result.selector_index > 0 {
                tracing::debug!(
                    page = page_id,
                    chain = chain_id,
                    "primary selector missed; fallback used"
                );
            }
        },
        None => {
            tracing::debug!(page = page_id, chain = chain_id, "chain resolution timed out");
        },
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartpilot_core::selector::{PageRegistryEntry, PageVersion, SelectorChain};
    use cartpilot_testing::mocks::MockInteractor;
    use std::time::Duration;

    fn registry_with(chains: Vec<SelectorChain>) -> Registry {
        Registry::from_entries(vec![PageRegistryEntry {
            page_id: "order-detail".into(),
            url_pattern: "/orders/".into(),
            active_version: "v1".into(),
            versions: vec![PageVersion {
                version: "v1".into(),
                chains,
            }],
            last_validation: None,
        }])
    }

    #[tokio::test]
    async fn resolves_via_fallback_and_reports_index() {
        let interactor = MockInteractor::new();
        interactor.add_element("button.order-detail__reorder", "Encomendar de novo");

        let registry = registry_with(vec![SelectorChain::from_patterns(
            "reorder-button",
            &["[data-testid='reorder']", "button.order-detail__reorder"],
        )]);

        let found = try_resolve(
            &interactor,
            &registry,
            "order-detail",
            "reorder-button",
            FindOptions::visible_within(Duration::from_millis(100)),
        )
        .await;

        let found = found.unwrap_or(None);
        assert!(found.is_some_and(|r| r.selector_index == 1));
    }

    #[tokio::test]
    async fn timeout_resolves_to_none() {
        let interactor = MockInteractor::new();
        let registry = registry_with(vec![SelectorChain::from_patterns(
            "reorder-button",
            &["[data-testid='reorder']"],
        )]);

        let found = try_resolve(
            &interactor,
            &registry,
            "order-detail",
            "reorder-button",
            FindOptions::visible_within(Duration::from_millis(50)),
        )
        .await;

        assert!(matches!(found, Ok(None)));
    }

    #[tokio::test]
    async fn missing_chain_is_an_error() {
        let interactor = MockInteractor::new();
        let registry = registry_with(vec![]);

        let result = try_resolve(
            &interactor,
            &registry,
            "order-detail",
            "reorder-button",
            FindOptions::default(),
        )
        .await;

        assert!(matches!(
            result,
            Err(RegistryError::ChainNotFound { .. })
        ));
    }
}
