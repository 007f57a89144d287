//! Semantic cart diff.

use cartpilot_core::types::{CartDiff, CartItem, CartSnapshot, DiffSummary, QuantityChange};
use std::collections::HashMap;

/// Diff two cart snapshots.
///
/// Items are keyed by `product_id` when present, else by name. The four
/// partitions (`added`, `removed`, `quantity_changed`, `unchanged`) are
/// exhaustive and disjoint over the union of keys; equal quantities land in
/// `unchanged`. `price_difference` is always `after − before` on the
/// derived snapshot totals.
#[must_use]
pub fn diff_carts(before: &CartSnapshot, after: &CartSnapshot) -> CartDiff {
    let before_by_key: HashMap<&str, &CartItem> =
        before.items.iter().map(|i| (i.diff_key(), i)).collect();
    let after_keys: HashMap<&str, ()> =
        after.items.iter().map(|i| (i.diff_key(), ())).collect();

    let mut added = Vec::new();
    let mut quantity_changed = Vec::new();
    let mut unchanged = Vec::new();

    for item in &after.items {
        match before_by_key.get(item.diff_key()) {
            None => added.push(item.clone()),
            Some(previous) if previous.quantity == item.quantity => unchanged.push(item.clone()),
            Some(previous) => quantity_changed.push(QuantityChange {
                name: item.name.clone(),
                previous_quantity: previous.quantity,
                new_quantity: item.quantity,
                unit_price: item.unit_price,
            }),
        }
    }

    let removed: Vec<CartItem> = before
        .items
        .iter()
        .filter(|item| !after_keys.contains_key(item.diff_key()))
        .cloned()
        .collect();

    let summary = DiffSummary {
        added_count: added.len(),
        removed_count: removed.len(),
        changed_count: quantity_changed.len(),
        unchanged_count: unchanged.len(),
        total_items: after.items.len(),
        price_difference: after.total_price - before.total_price,
        new_total_price: after.total_price,
    };

    CartDiff {
        added,
        removed,
        quantity_changed,
        unchanged,
        summary,
    }
}
