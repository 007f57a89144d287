//! # Cartpilot Interactor
//!
//! The two adapters behind the `Interactor` port:
//!
//! - [`driver::DriverInteractor`] — full-control adapter over a persistent
//!   CDP browser session (chromiumoxide). Element handles are remote object
//!   references; clicks go through the driver's input pipeline; screenshots
//!   produce real image files.
//! - [`injected::InjectedInteractor`] — content-script-style adapter that
//!   drives the page exclusively through injected JavaScript: a window-side
//!   element registry, `getBoundingClientRect` visibility checks, DOM
//!   `click()` dispatch, and poll-based waits. Screenshots are stub
//!   identifiers; a page-side `MutationObserver` feeds the popup observer's
//!   mutation signal.
//!
//! Both adapters share the pure classification and probe-parsing helpers in
//! [`classify`] and [`cartprobe`], so a given page state is read identically
//! regardless of the back-end.

pub mod cartprobe;
pub mod classify;
pub mod driver;
pub mod injected;
mod js;

pub use driver::{BrowserSession, DriverInteractor, DriverOptions};
pub use injected::InjectedInteractor;
