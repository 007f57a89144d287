//! Domain value types: carts, orders, diffs, review packs.
//!
//! All types here are owned value types (`Clone + Serialize + Deserialize`)
//! handed between components by value. Monetary fields are integer cents
//! where named `_cents`, floating EUR otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single line in a cart or order.
///
/// `product_id` is the stable identity when the retailer exposes one;
/// `name` is the fallback key used by the differ.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    /// Retailer product identifier, when extractable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    /// Display name as shown on the product tile.
    pub name: String,
    /// Quantity, at least 1.
    pub quantity: u32,
    /// Unit price in EUR.
    pub unit_price: f64,
    /// Whether the retailer currently lists the item as available.
    pub available: bool,
    /// Free-text availability note from the page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_note: Option<String>,
}

impl CartItem {
    /// Key used for diffing: `product_id` when present, else the name.
    #[must_use]
    pub fn diff_key(&self) -> &str {
        self.product_id.as_deref().unwrap_or(&self.name)
    }

    /// Line total in EUR.
    #[must_use]
    pub fn line_total(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

/// A full extraction of the cart page at one instant.
///
/// `item_count` and `total_price` are always re-derived from `items`, never
/// trusted from the page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Every line in the cart.
    pub items: Vec<CartItem>,
    /// Sum of line quantities.
    pub item_count: u32,
    /// Sum of line totals in EUR.
    pub total_price: f64,
}

impl CartSnapshot {
    /// Build a snapshot, deriving `item_count` and `total_price`.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, items: Vec<CartItem>) -> Self {
        let item_count = items.iter().map(|i| i.quantity).sum();
        let total_price = items.iter().map(CartItem::line_total).sum();
        Self {
            timestamp,
            items,
            item_count,
            total_price,
        }
    }

    /// An empty cart at the given instant.
    #[must_use]
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, Vec::new())
    }
}

/// Best-effort header/minicart probe result.
///
/// Either field is `None` when its selector chain produced no visible,
/// parseable match. A probe never fails outright.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartState {
    /// Item count from the cart badge, if readable.
    pub item_count: Option<u32>,
    /// Cart total in cents, if readable.
    pub total_cents: Option<i64>,
    /// When the probe ran.
    pub captured_at: DateTime<Utc>,
}

impl CartState {
    /// A probe with nothing readable.
    #[must_use]
    pub const fn blank(captured_at: DateTime<Utc>) -> Self {
        Self {
            item_count: None,
            total_cents: None,
            captured_at,
        }
    }
}

/// Order list-view metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    /// Retailer order identifier.
    pub order_id: String,
    /// When the order was placed.
    pub date: DateTime<Utc>,
    /// Number of distinct products.
    pub product_count: u32,
    /// Order total in EUR.
    pub total_price: f64,
    /// Link to the order detail page.
    pub detail_url: String,
}

/// Delivery block of an order detail page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderDelivery {
    /// Delivery type as displayed (home delivery, pickup, ...).
    pub kind: String,
    /// Delivery address or pickup point.
    pub address: String,
    /// Scheduled date and time, when shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
}

/// Cost breakdown of an order detail page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderCostSummary {
    /// Items subtotal in EUR.
    pub subtotal: f64,
    /// Delivery fee in EUR.
    pub delivery_fee: f64,
    /// Grand total in EUR.
    pub total: f64,
}

/// Full order detail: the summary plus items, delivery and costs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    /// List-view metadata.
    pub summary: OrderSummary,
    /// Order lines.
    pub items: Vec<CartItem>,
    /// Delivery block, when extractable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<OrderDelivery>,
    /// Cost breakdown, when extractable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_summary: Option<OrderCostSummary>,
}

/// One order queued for the cart-merge flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderToMerge {
    /// Retailer order identifier.
    pub order_id: String,
    /// Order detail page URL.
    pub detail_url: String,
    /// Order date; the flow processes orders oldest-first.
    pub date: DateTime<Utc>,
}

/// Cached order history with its fetch instant, for the 24 h local cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderHistoryCache {
    /// When the history was scraped.
    pub fetched_at: DateTime<Utc>,
    /// Order summaries, newest first as listed on the page.
    pub orders: Vec<OrderSummary>,
}

/// A quantity change between two cart snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantityChange {
    /// Item name.
    pub name: String,
    /// Quantity before.
    pub previous_quantity: u32,
    /// Quantity after.
    pub new_quantity: u32,
    /// Unit price in EUR.
    pub unit_price: f64,
}

/// Derived counts for a [`CartDiff`]. Always consistent with the arrays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Number of added items.
    pub added_count: usize,
    /// Number of removed items.
    pub removed_count: usize,
    /// Number of quantity changes.
    pub changed_count: usize,
    /// Number of unchanged items.
    pub unchanged_count: usize,
    /// Distinct items in the after-cart.
    pub total_items: usize,
    /// `after.total_price - before.total_price`, in EUR.
    pub price_difference: f64,
    /// The after-cart total in EUR.
    pub new_total_price: f64,
}

/// Semantic diff between two cart snapshots.
///
/// The four partitions are exhaustive and disjoint over the union of item
/// keys on both sides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartDiff {
    /// Items only in the after-cart.
    pub added: Vec<CartItem>,
    /// Items only in the before-cart.
    pub removed: Vec<CartItem>,
    /// Items on both sides with differing quantity.
    pub quantity_changed: Vec<QuantityChange>,
    /// Items on both sides with equal quantity.
    pub unchanged: Vec<CartItem>,
    /// Derived counts.
    pub summary: DiffSummary,
}

/// Warning categories surfaced in a review pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// An item in the source orders is no longer purchasable.
    OutOfStock,
    /// An item's price moved noticeably since the source order.
    PriceChange,
    /// Extraction quality concern (missing ids, zero prices, degraded selectors).
    DataQuality,
    /// An expected item did not land in the merged cart.
    MissingItem,
}

/// Severity attached to a review warning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    /// Informational only.
    Info,
    /// Worth a look before approving.
    Warning,
    /// Should block approval until resolved.
    Critical,
}

/// One warning line in a review pack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewWarning {
    /// Warning category.
    #[serde(rename = "type")]
    pub kind: WarningKind,
    /// Item the warning refers to, if item-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Severity.
    pub severity: WarningSeverity,
}

/// Confidence block of a review pack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    /// How confident the system is that the prepared cart matches intent,
    /// in `[0, 1]`.
    pub cart_accuracy: f64,
    /// Quality of the extracted data, in `[0, 1]`.
    pub data_quality: f64,
    /// Order ids the cart was rebuilt from.
    pub source_orders: Vec<String>,
}

/// Suggested reviewer action attached to a review pack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewAction {
    /// Machine-readable action key (`approve`, `adjust_quantities`, ...).
    pub action: String,
    /// Human-readable label.
    pub label: String,
}

/// One substitute candidate for an unavailable item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubstituteCandidate {
    /// Candidate product name.
    pub name: String,
    /// Shelf price in cents.
    pub price_cents: i64,
    /// Whether the candidate is a store brand.
    pub is_store_brand: bool,
    /// Per-unit price in cents, when the tile exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price_cents: Option<i64>,
    /// Composite value score in `[0, 1]`; higher is better.
    pub score: f64,
}

/// Substitution proposal for one unavailable item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionProposal {
    /// The unavailable original item.
    pub original: CartItem,
    /// Ranked candidates, best first.
    pub candidates: Vec<SubstituteCandidate>,
    /// Search queries that produced the candidates.
    pub queries_used: Vec<String>,
}

/// Pantry-prune decision for one cart item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PruneDecision {
    /// Item the decision applies to.
    pub item_name: String,
    /// Whether the item should be removed from the prepared cart.
    pub prune: bool,
    /// Decision confidence in `[0, 1]`.
    pub confidence: f64,
    /// Why.
    pub reason: String,
}

/// A delivery slot extracted from the scheduling page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliverySlot {
    /// Retailer slot identifier or synthesized key.
    pub slot_id: String,
    /// Slot window start.
    pub starts_at: DateTime<Utc>,
    /// Slot window end.
    pub ends_at: DateTime<Utc>,
    /// Slot fee in cents, when shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
    /// Whether the slot is bookable.
    pub available: bool,
}

/// Stored slot-ranking preferences from the synchronized store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotPreferences {
    /// Preferred weekdays, 0 = Monday.
    #[serde(default)]
    pub preferred_days: Vec<u8>,
    /// Preferred hour range `(from, to)` in local hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_hours: Option<(u8, u8)>,
    /// Maximum acceptable slot fee in cents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price_cents: Option<i64>,
}

/// Login probe result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    /// Whether a household session is active on the page.
    pub is_logged_in: bool,
    /// Display name of the logged-in account, when shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// One entry in the ephemeral debug ring buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebugLogEntry {
    /// Entry instant.
    pub at: DateTime<Utc>,
    /// Component that emitted the entry.
    pub component: String,
    /// Message text.
    pub message: String,
}

/// Review pack lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPackStatus {
    /// Pack is still being assembled.
    GeneratingReview,
    /// Pack passed the finalization gate and is immutable.
    ReviewReady,
}

/// Cart section of a review pack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewCart {
    /// Headline totals of the prepared cart.
    pub summary: DiffSummary,
    /// Full semantic diff.
    pub diff: CartDiff,
    /// Cart before the run.
    pub before: CartSnapshot,
    /// Prepared cart after the run.
    pub after: CartSnapshot,
}

/// The terminal artifact of a run: everything the household needs to review
/// before checking out manually.
///
/// Immutable once `status` is [`ReviewPackStatus::ReviewReady`]. There is no
/// operation anywhere in the workspace that turns a review pack into a
/// placed order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewPack {
    /// Owning session.
    pub session_id: String,
    /// Generation instant.
    pub generated_at: DateTime<Utc>,
    /// Opaque household identifier.
    pub household_id: String,
    /// Lifecycle status.
    pub status: ReviewPackStatus,
    /// Cart section.
    pub cart: ReviewCart,
    /// Synthesized warnings, one per condition.
    pub warnings: Vec<ReviewWarning>,
    /// Suggested reviewer actions.
    pub actions: Vec<ReviewAction>,
    /// Confidence block.
    pub confidence: Confidence,
    /// Substitution proposals, when the substitution phase ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitutions: Option<Vec<SubstitutionProposal>>,
    /// Prune decisions, when pruning ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruning: Option<Vec<PruneDecision>>,
    /// Ranked delivery slots, when the slots phase ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<DeliverySlot>>,
}
