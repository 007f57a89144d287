//! # Cartpilot Flow
//!
//! The business logic between the page port and the orchestrator:
//!
//! - [`merge`] — the reorder-and-merge flow over prior orders, with the
//!   modal policy in [`modal`] and the change-verification ladder in
//!   [`verify`];
//! - [`orders`] — order-history extraction with the 24 h local cache;
//! - [`cart`] — full cart-page extraction into snapshots;
//! - [`login`] — household session probe;
//! - [`substitution`] — search-page candidate extraction for unavailable
//!   items;
//! - [`slots`] — delivery-slot extraction and preference ranking;
//! - [`diff`] — semantic cart diff;
//! - [`review`] — review pack assembly, confidence, warnings and the
//!   finalization gate.
//!
//! Everything here is generic over the `Interactor` port; no flow module
//! knows which adapter drives the page.

pub mod cart;
pub mod diff;
pub mod extract;
pub mod login;
pub mod merge;
pub mod modal;
pub mod orders;
pub mod review;
pub mod slots;
pub mod substitution;
pub mod verify;

pub use diff::diff_carts;
pub use merge::{CartMergeFlowResult, MergeFlow, MergeOptions, OrderMergeResult};
pub use review::{build_review_pack, finalization_gate, ReviewInputs};
pub use verify::{MergeMode, Verification};
