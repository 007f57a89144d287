//! # Cartpilot Registry
//!
//! Versioned selector registry and runtime resolver.
//!
//! Selector chains are authored offline and shipped as JSON data: a master
//! index naming one file per retailer page, each file a
//! [`cartpilot_core::selector::PageRegistryEntry`] with versioned chains.
//! The registry is read-only shared configuration at runtime; the only
//! writers are offline discovery tools outside this workspace.
//!
//! Resolution tries a chain's patterns strictly in declared order. The
//! offline stability scoring (`data-testid` over `aria-*` over ids over
//! classes over structural selectors over text predicates) is reflected in
//! how chains are *authored*, never re-applied at runtime.

pub mod error;
pub mod registry;
pub mod resolver;

pub use error::RegistryError;
pub use registry::Registry;
pub use resolver::try_resolve;
