//! # Cartpilot Arbiter
//!
//! Continuous dismissal of nuisance overlays — cookie banners, subscription
//! prompts, cart-removal confirmations, modal close buttons — without ever
//! touching load-bearing modals.
//!
//! The arbiter runs concurrently with the main flow and mutates the same
//! page, so callers must treat it as an adversarial concurrent actor: no
//! ordering is guaranteed between arbiter clicks and caller clicks. Before
//! any critical click, call [`sweep::ensure_no_blocking_popups`] and
//! re-check visibility.
//!
//! Two hard rules hold everywhere:
//!
//! 1. The [`gate::SafetyGate`] is absolute: a matched element whose text,
//!    class or `data-target` carries a forbidden token is never clicked,
//!    regardless of which pattern matched it.
//! 2. Patterns flagged `skip_if_reorder_modal` are skipped for the whole
//!    sweep whenever any reorder-modal variant is visible.

pub mod gate;
pub mod observer;
pub mod patterns;
pub mod sweep;

pub use gate::{GateDecision, SafetyGate};
pub use observer::{ObserverConfig, PopupObserver};
pub use patterns::{default_patterns, PatternSet};
pub use sweep::{dismiss_popups, ensure_no_blocking_popups};
