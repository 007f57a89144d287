//! Order-history extraction and the 24 h local cache.

use crate::extract::{attributes_of_chain, column, texts_of_chain};
use cartpilot_core::config::CopilotConfig;
use cartpilot_core::error::{CopilotError, ErrorKind};
use cartpilot_core::money::parse_eur_cents;
use cartpilot_core::port::{CacheStore, FindOptions, Interactor, NavigateOptions};
use cartpilot_core::types::{OrderHistoryCache, OrderSummary, OrderToMerge};
use cartpilot_registry::{try_resolve, Registry};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use std::time::Duration;

const ORDER_LIST_PAGE: &str = "order-list";

/// Parse an order date as rendered on the list page.
///
/// Accepts `dd/mm/yyyy`, `dd-mm-yyyy` and ISO `yyyy-mm-dd`; the time is
/// pinned to midday UTC so date-only ordering is stable across zones.
#[must_use]
pub fn parse_order_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    let date = NaiveDate::parse_from_str(trimmed, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%d-%m-%Y"))
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0)?))
}

fn parse_count_text(raw: &str) -> u32 {
    raw.chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

/// Scrape the order history list from the live page.
///
/// Column-wise extraction over the registry chains; rows whose id or date
/// fail to parse are dropped with a debug log rather than failing the
/// phase.
///
/// # Errors
///
/// Fails when navigation fails or the order list never renders.
pub async fn scrape_order_history<I: Interactor>(
    interactor: &I,
    registry: &Registry,
    config: &CopilotConfig,
) -> Result<Vec<OrderSummary>, CopilotError> {
    let list_url = config.site.url(&config.site.order_history_path);
    let current = interactor.current_url().await.unwrap_or_default();
    if !current.starts_with(&list_url) {
        interactor
            .navigate_to(
                &list_url,
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
        ORDER_LIST_PAGE,
        "order-row",
        FindOptions::visible_within(Duration::from_millis(config.timeouts.order_header_wait_ms)),
    )
    .await
    .map_err(CopilotError::from)?;
    if first_row.is_none() {
        return Err(CopilotError::new(
            ErrorKind::ElementNotFound,
            "order history list never rendered",
        ));
    }

    let ids = texts_of_chain(interactor, registry.resolve(ORDER_LIST_PAGE, "order-id")?).await;
    let dates = texts_of_chain(interactor, registry.resolve(ORDER_LIST_PAGE, "order-date")?).await;
    let totals =
        texts_of_chain(interactor, registry.resolve(ORDER_LIST_PAGE, "order-total")?).await;
    let counts = texts_of_chain(
        interactor,
        registry.resolve(ORDER_LIST_PAGE, "order-product-count")?,
    )
    .await;
    let links = attributes_of_chain(
        interactor,
        registry.resolve(ORDER_LIST_PAGE, "order-detail-link")?,
        "href",
    )
    .await;

    let mut orders = Vec::with_capacity(ids.len());
    for (index, id) in ids.iter().enumerate() {
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        let Some(date) = parse_order_date(&column(&dates, index)) else {
            tracing::debug!(order_id = id, "order row dropped: unparseable date");
            continue;
        };
        let total_price = parse_eur_cents(&column(&totals, index))
            .map_or(0.0, cartpilot_core::money::cents_to_eur);
        let detail_url = links
            .get(index)
            .cloned()
            .flatten()
            .map_or_else(String::new, |href| config.site.absolutize(&href));

        orders.push(OrderSummary {
            order_id: id.to_string(),
            date,
            product_count: parse_count_text(&column(&counts, index)),
            total_price,
            detail_url,
        });
    }

    tracing::info!(orders = orders.len(), "order history scraped");
    Ok(orders)
}

/// Load order history, preferring a fresh cache entry.
///
/// Cache entries older than the configured TTL are ignored and refreshed.
/// Cache write failures are logged and never fail the load.
///
/// # Errors
///
/// Propagates scrape failures when no fresh cache entry exists.
pub async fn load_order_history<I: Interactor, C: CacheStore + ?Sized>(
    interactor: &I,
    registry: &Registry,
    config: &CopilotConfig,
    cache: &C,
    household_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<OrderSummary>, CopilotError> {
    let ttl = ChronoDuration::milliseconds(i64::try_from(config.order_cache_ttl_ms).unwrap_or(0));
    if let Some(cached) = cache.order_history(household_id).await {
        if now - cached.fetched_at < ttl {
            tracing::debug!(
                orders = cached.orders.len(),
                "order history served from cache"
            );
            return Ok(cached.orders);
        }
    }

    let orders = scrape_order_history(interactor, registry, config).await?;
    let entry = OrderHistoryCache {
        fetched_at: now,
        orders: orders.clone(),
    };
    if let Err(err) = cache.save_order_history(household_id, &entry).await {
        tracing::warn!(error = %err, "order history cache write failed");
    }
    Ok(orders)
}

/// Pick the most recent orders for merging.
///
/// Returns up to `max` orders; the merge flow re-sorts them oldest first.
/// Orders with no detail link cannot be merged and are skipped.
#[must_use]
pub fn pick_orders_to_merge(orders: &[OrderSummary], max: usize) -> Vec<OrderToMerge> {
    let mut sorted: Vec<&OrderSummary> = orders
        .iter()
        .filter(|o| !o.detail_url.is_empty())
        .collect();
    sorted.sort_by_key(|o| std::cmp::Reverse(o.date));
    sorted
        .into_iter()
        .take(max)
        .map(|o| OrderToMerge {
            order_id: o.order_id.clone(),
            detail_url: o.detail_url.clone(),
            date: o.date,
        })
        .collect()
}
