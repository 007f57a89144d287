//! Delivery-slot extraction and preference ranking.
//!
//! Extraction is idempotent: re-running it after a recovery produces the
//! same slots for the same page.

use crate::extract::{attributes_of_chain, column, find_all_chain};
use cartpilot_core::config::CopilotConfig;
use cartpilot_core::error::CopilotError;
use cartpilot_core::money::parse_eur_cents;
use cartpilot_core::port::{FindOptions, Interactor, NavigateOptions};
use cartpilot_core::types::{DeliverySlot, SlotPreferences};
use cartpilot_registry::{try_resolve, Registry};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::time::Duration;

const SLOTS_PAGE: &str = "slots";

/// Extract the delivery-slot grid.
///
/// Slots carry their window in `data-starts-at` / `data-ends-at` (ISO 8601)
/// and their identity in `data-slot-id`; cells missing a parseable window
/// are dropped. Availability comes from `aria-disabled`.
///
/// # Errors
///
/// Fails on navigation errors and registry misses. A rendered page with no
/// slot cells is a valid empty result.
pub async fn extract_slots<I: Interactor>(
    interactor: &I,
    registry: &Registry,
    config: &CopilotConfig,
) -> Result<Vec<DeliverySlot>, CopilotError> {
    let url = config.site.url(&config.site.slots_path);
    let current = interactor.current_url().await.unwrap_or_default();
    if !current.starts_with(&url) {
        interactor
            .navigate_to(
                &url,
                NavigateOptions {
                    timeout: config.timeouts.navigation(),
                },
            )
            .await
            .map_err(CopilotError::from)?;
    }

    let first_cell = try_resolve(
        interactor,
        registry,
        SLOTS_PAGE,
        "slot-cell",
        FindOptions::visible_within(Duration::from_millis(config.timeouts.operation_ms)),
    )
    .await
    .map_err(CopilotError::from)?;
    if first_cell.is_none() {
        return Ok(Vec::new());
    }

    let cell_chain = registry.resolve(SLOTS_PAGE, "slot-cell")?;
    let cells = find_all_chain(interactor, cell_chain).await;
    let ids = attributes_of_chain(interactor, cell_chain, "data-slot-id").await;
    let starts = attributes_of_chain(interactor, cell_chain, "data-starts-at").await;
    let ends = attributes_of_chain(interactor, cell_chain, "data-ends-at").await;
    let disabled = attributes_of_chain(interactor, cell_chain, "aria-disabled").await;

    let mut price_texts = Vec::with_capacity(cells.len());
    {
        let price_chain = registry.resolve(SLOTS_PAGE, "slot-price")?;
        let prices = crate::extract::texts_of_chain(interactor, price_chain).await;
        for index in 0..cells.len() {
            price_texts.push(column(&prices, index));
        }
    }

    let parse_instant = |raw: Option<&String>| -> Option<DateTime<Utc>> {
        raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    };

    let mut slots = Vec::with_capacity(cells.len());
    for index in 0..cells.len() {
        let starts_at = parse_instant(ids_ref(&starts, index));
        let ends_at = parse_instant(ids_ref(&ends, index));
        let (Some(starts_at), Some(ends_at)) = (starts_at, ends_at) else {
            tracing::debug!(index, "slot cell dropped: unparseable window");
            continue;
        };
        let slot_id = ids_ref(&ids, index)
            .cloned()
            .unwrap_or_else(|| format!("slot-{index}"));
        slots.push(DeliverySlot {
            slot_id,
            starts_at,
            ends_at,
            price_cents: parse_eur_cents(&column(&price_texts, index)),
            available: ids_ref(&disabled, index).map(String::as_str) != Some("true"),
        });
    }

    tracing::info!(slots = slots.len(), "delivery slots extracted");
    Ok(slots)
}

fn ids_ref(values: &[Option<String>], index: usize) -> Option<&String> {
    values.get(index).and_then(Option::as_ref)
}

/// Score one slot against the stored preferences. Higher is better; the
/// scale is arbitrary but stable.
#[must_use]
pub fn score_slot(slot: &DeliverySlot, prefs: &SlotPreferences, now: DateTime<Utc>) -> f64 {
    if !slot.available {
        return f64::MIN;
    }

    let mut score = 0.0;

    let weekday = u8::try_from(slot.starts_at.weekday().num_days_from_monday()).unwrap_or(7);
    if prefs.preferred_days.contains(&weekday) {
        score += 3.0;
    }

    if let Some((from, to)) = prefs.preferred_hours {
        let hour = u8::try_from(slot.starts_at.hour()).unwrap_or(0);
        if hour >= from && hour < to {
            score += 2.0;
        }
    }

    match (slot.price_cents, prefs.max_price_cents) {
        (Some(price), Some(max)) if price > max => score -= 5.0,
        #[allow(clippy::cast_precision_loss)]
        (Some(price), _) => score += 1.0 - (price as f64 / 1_000.0).min(1.0),
        (None, _) => {},
    }

    // Earlier slots edge out later ones.
    let hours_out = (slot.starts_at - now).num_hours();
    #[allow(clippy::cast_precision_loss)]
    let recency = 1.0 - (hours_out.clamp(0, 168) as f64 / 168.0);
    score + recency
}

/// Rank slots by preference score, best first. Unavailable slots sink to
/// the end but are kept for display.
#[must_use]
pub fn rank_slots(
    mut slots: Vec<DeliverySlot>,
    prefs: &SlotPreferences,
    now: DateTime<Utc>,
) -> Vec<DeliverySlot> {
    slots.sort_by(|a, b| {
        score_slot(b, prefs, now)
            .partial_cmp(&score_slot(a, prefs, now))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    slots
}
