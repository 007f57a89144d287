//! Full cart-page extraction.
//!
//! The differ works on item-level snapshots, not the header probe; this
//! module reads the cart page itself. Quantities come from the line input,
//! availability from the unavailable-marker chain matched by name.

use crate::extract::{column, find_all_chain, texts_of_chain};
use cartpilot_core::config::CopilotConfig;
use cartpilot_core::error::CopilotError;
use cartpilot_core::money::{cents_to_eur, parse_eur_cents};
use cartpilot_core::port::{FindOptions, Interactor, NavigateOptions};
use cartpilot_core::types::{CartItem, CartSnapshot};
use cartpilot_registry::{try_resolve, Registry};
use chrono::{DateTime, Utc};
use std::time::Duration;

const CART_PAGE: &str = "cart";

/// Extract the cart page into a snapshot.
///
/// An empty cart is a valid empty snapshot, distinguished from a page that
/// never rendered by waiting on the row chain first and tolerating its
/// absence only when the header probe also reads zero.
///
/// # Errors
///
/// Fails on navigation errors and registry misses.
pub async fn extract_cart<I: Interactor>(
    interactor: &I,
    registry: &Registry,
    config: &CopilotConfig,
    now: DateTime<Utc>,
) -> Result<CartSnapshot, CopilotError> {
    let cart_url = config.site.url(&config.site.cart_path);
    let current = interactor.current_url().await.unwrap_or_default();
    if !current.starts_with(&cart_url) {
        interactor
            .navigate_to(
                &cart_url,
                NavigateOptions {
                    timeout: config.timeouts.navigation(),
                },
            )
            .await
            .map_err(CopilotError::from)?;
    }

    let first_row = try_resolve(
        interactor,
        registry,
        CART_PAGE,
        "cart-item-row",
        FindOptions::visible_within(Duration::from_millis(config.timeouts.operation_ms)),
    )
    .await
    .map_err(CopilotError::from)?;
    if first_row.is_none() {
        tracing::debug!("no cart rows; treating as empty cart");
        return Ok(CartSnapshot::empty(now));
    }

    let names = texts_of_chain(interactor, registry.resolve(CART_PAGE, "cart-item-name")?).await;
    let prices = texts_of_chain(interactor, registry.resolve(CART_PAGE, "cart-item-price")?).await;
    let unavailable_names =
        texts_of_chain(interactor, registry.resolve(CART_PAGE, "cart-item-unavailable")?).await;

    // Quantities live in an input's value attribute.
    let qty_chain = registry.resolve(CART_PAGE, "cart-item-qty")?;
    let qty_handles = find_all_chain(interactor, qty_chain).await;
    let mut quantities = Vec::with_capacity(qty_handles.len());
    for handle in &qty_handles {
        quantities.push(
            interactor
                .attribute(handle, "value")
                .await
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(1),
        );
    }

    // Product ids ride on the row elements when the page exposes them.
    let row_chain = registry.resolve(CART_PAGE, "cart-item-row")?;
    let row_handles = find_all_chain(interactor, row_chain).await;
    let mut product_ids = Vec::with_capacity(row_handles.len());
    for handle in &row_handles {
        product_ids.push(interactor.attribute(handle, "data-product-id").await);
    }

    let mut items = Vec::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let unit_price = parse_eur_cents(&column(&prices, index)).map_or(0.0, cents_to_eur);
        let available = !unavailable_names.iter().any(|u| u.contains(name.as_str()));
        items.push(CartItem {
            product_id: product_ids.get(index).cloned().flatten(),
            name: name.clone(),
            quantity: *quantities.get(index).unwrap_or(&1),
            unit_price,
            available,
            availability_note: (!available).then(|| "indisponível".to_string()),
        });
    }

    Ok(CartSnapshot::new(now, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartpilot_testing::mocks::{ElementSpec, MockInteractor};

    #[allow(clippy::expect_used)] // Test code
    fn registry() -> Registry {
        Registry::bundled().expect("bundled registry parses")
    }

    fn fast_config() -> CopilotConfig {
        let mut config = CopilotConfig::default();
        config.timeouts.operation_ms = 100;
        config
    }

    #[tokio::test]
    async fn rows_become_items_with_ids_and_quantities() {
        let page = MockInteractor::new();
        page.add_spec(
            ElementSpec::new("[data-testid='cart-line']", "")
                .with_attribute("data-product-id", "p-11"),
        );
        page.add_spec(ElementSpec::new("[data-testid='cart-line']", ""));
        page.add_element("[data-testid='cart-line-name']", "Leite Meio Gordo");
        page.add_element("[data-testid='cart-line-name']", "Pão de forma");
        page.add_spec(
            ElementSpec::new("[data-testid='cart-line-qty'] input", "").with_attribute("value", "2"),
        );
        page.add_spec(
            ElementSpec::new("[data-testid='cart-line-qty'] input", "").with_attribute("value", "1"),
        );
        page.add_element("[data-testid='cart-line-price']", "0,93 €");
        page.add_element("[data-testid='cart-line-price']", "1,39 €");
        page.add_element("[data-testid='cart-line-unavailable']", "Pão de forma");

        let snapshot = extract_cart(&page, &registry(), &fast_config(), Utc::now()).await;
        let snapshot = snapshot.unwrap_or_else(|_| CartSnapshot::empty(Utc::now()));
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.item_count, 3);
        assert_eq!(snapshot.items[0].product_id.as_deref(), Some("p-11"));
        assert!(snapshot.items[0].available);
        assert!(!snapshot.items[1].available);
        assert!((snapshot.total_price - (2.0 * 0.93 + 1.39)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn bare_page_is_an_empty_cart() {
        let page = MockInteractor::new();
        let snapshot = extract_cart(&page, &registry(), &fast_config(), Utc::now()).await;
        assert!(snapshot.is_ok_and(|s| s.items.is_empty() && s.item_count == 0));
    }
}
