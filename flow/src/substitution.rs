//! Search-page candidate extraction for substitutions.
//!
//! The flow side only gathers raw candidates; query generation, scoring
//! and ranking belong to the enhancer, which the orchestrator composes
//! with this module.

use crate::extract::{column, texts_of_chain};
use cartpilot_core::config::CopilotConfig;
use cartpilot_core::error::CopilotError;
use cartpilot_core::money::parse_eur_cents;
use cartpilot_core::port::{FindOptions, Interactor, NavigateOptions};
use cartpilot_core::types::SubstituteCandidate;
use cartpilot_registry::{try_resolve, Registry};
use std::time::Duration;

const SEARCH_PAGE: &str = "search";

/// Run one search query and extract the product tiles as unranked
/// candidates (`score` 0.0; the enhancer scores them).
///
/// An empty result page is a valid empty vector. Tiles whose price does
/// not parse are dropped.
///
/// # Errors
///
/// Fails on navigation errors and registry misses.
pub async fn search_candidates<I: Interactor>(
    interactor: &I,
    registry: &Registry,
    config: &CopilotConfig,
    query: &str,
) -> Result<Vec<SubstituteCandidate>, CopilotError> {
    let url = config.site.search_url(query);
    interactor
        .navigate_to(
            &url,
            NavigateOptions {
                timeout: config.timeouts.navigation(),
            },
        )
        .await
        .map_err(CopilotError::from)?;

    let first_tile = try_resolve(
        interactor,
        registry,
        SEARCH_PAGE,
        "product-tile",
        FindOptions::visible_within(Duration::from_millis(config.timeouts.operation_ms)),
    )
    .await
    .map_err(CopilotError::from)?;
    if first_tile.is_none() {
        tracing::debug!(query, "search returned no tiles");
        return Ok(Vec::new());
    }

    let names = texts_of_chain(interactor, registry.resolve(SEARCH_PAGE, "tile-name")?).await;
    let prices = texts_of_chain(interactor, registry.resolve(SEARCH_PAGE, "tile-price")?).await;
    let unit_prices =
        texts_of_chain(interactor, registry.resolve(SEARCH_PAGE, "tile-unit-price")?).await;
    let brands = texts_of_chain(interactor, registry.resolve(SEARCH_PAGE, "tile-brand")?).await;

    let markers = &config.site.store_brand_markers;
    let mut candidates = Vec::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let Some(price_cents) = parse_eur_cents(&column(&prices, index)) else {
            tracing::debug!(tile = %name, "tile dropped: unparseable price");
            continue;
        };
        let brand = column(&brands, index).to_lowercase();
        candidates.push(SubstituteCandidate {
            name: name.clone(),
            price_cents,
            is_store_brand: markers.iter().any(|m| brand.contains(m)),
            unit_price_cents: parse_eur_cents(&column(&unit_prices, index)),
            score: 0.0,
        });
    }

    tracing::debug!(query, candidates = candidates.len(), "search extracted");
    Ok(candidates)
}
