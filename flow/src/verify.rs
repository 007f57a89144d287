//! Post-merge change verification.

use cartpilot_core::types::CartState;
use serde::{Deserialize, Serialize};

/// How an order is applied to the cart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// First order: the cart is replaced.
    Replace,
    /// Subsequent orders: the order is merged in.
    Merge,
}

/// Outcome of the verification ladder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    /// Item counts were readable and moved the right way.
    VerifiedByCount,
    /// Totals were readable and moved the right way.
    VerifiedByTotal,
    /// Only the after-total was readable, and it is positive.
    VerifiedByNonZeroTotal,
    /// Nothing was readable on either side; success is assumed. The review
    /// confidence is reduced for every assumed order.
    Assumed,
    /// Readings were available and did not show the expected change.
    NotVerified,
}

impl Verification {
    /// Whether this outcome counts as success.
    #[must_use]
    pub const fn success(self) -> bool {
        !matches!(self, Self::NotVerified)
    }
}

/// The ordered verification ladder.
///
/// 1. Both item counts readable: replace needs `after > 0`, merge needs
///    `after > before`.
/// 2. Else both totals readable: analogous.
/// 3. Else a positive after-total alone verifies.
/// 4. Else, with all four readings missing, success is assumed.
/// 5. Anything else is not verified.
#[must_use]
pub const fn verify_change(mode: MergeMode, before: &CartState, after: &CartState) -> Verification {
    if let (Some(b), Some(a)) = (before.item_count, after.item_count) {
        let ok = match mode {
            MergeMode::Replace => a > 0,
            MergeMode::Merge => a > b,
        };
        return if ok {
            Verification::VerifiedByCount
        } else {
            Verification::NotVerified
        };
    }

    if let (Some(b), Some(a)) = (before.total_cents, after.total_cents) {
        let ok = match mode {
            MergeMode::Replace => a > 0,
            MergeMode::Merge => a > b,
        };
        return if ok {
            Verification::VerifiedByTotal
        } else {
            Verification::NotVerified
        };
    }

    if let Some(a) = after.total_cents {
        if a > 0 {
            return Verification::VerifiedByNonZeroTotal;
        }
    }

    if before.item_count.is_none()
        && before.total_cents.is_none()
        && after.item_count.is_none()
        && after.total_cents.is_none()
    {
        return Verification::Assumed;
    }

    Verification::NotVerified
}

/// Items added by this order, when both counts were readable.
#[must_use]
pub const fn items_added(mode: MergeMode, before: &CartState, after: &CartState) -> Option<i64> {
    match (before.item_count, after.item_count) {
        (Some(b), Some(a)) => Some(match mode {
            MergeMode::Replace => a as i64,
            MergeMode::Merge => a as i64 - b as i64,
        }),
        _ => None,
    }
}
