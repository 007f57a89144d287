//! # Cartpilot Core
//!
//! Core types and ports for the cartpilot grocery-shopping copilot.
//!
//! Cartpilot reconstructs a prepared cart from a household's prior orders on
//! a retailer site, proposes substitutions for unavailable items, prunes
//! items likely already on hand, and ranks delivery slots. The terminal
//! automated state is a human-reviewable Review Pack; checkout is always
//! performed manually by the user. Nothing in this workspace places an
//! order, and no such operation exists in any port defined here.
//!
//! ## Architecture
//!
//! The workspace follows a hexagonal layout. This crate owns:
//!
//! - **Value types**: cart snapshots, orders, diffs, review packs
//!   ([`types`]), run state and checkpoints ([`state`]), selector chains
//!   ([`selector`]) and popup patterns ([`popup`]).
//! - **Ports**: the [`port::Interactor`] page abstraction with two adapters
//!   in `cartpilot-interactor`, the [`port::LlmPort`] served by
//!   `cartpilot-anthropic`, and the storage ports served by
//!   `cartpilot-runtime`.
//! - **Cross-cutting**: the closed error taxonomy ([`error`]), the internal
//!   message protocol ([`protocol`]), locale money parsing ([`money`]) and
//!   configuration ([`config`]).
//!
//! Business logic lives in `cartpilot-flow`; orchestration, persistence and
//! recovery live in `cartpilot-runtime`.

pub mod config;
pub mod error;
pub mod money;
pub mod popup;
pub mod port;
pub mod probe;
pub mod protocol;
pub mod selector;
pub mod state;
pub mod types;

pub use chrono::{DateTime, Utc};

pub use error::{CopilotError, ErrorCategory, ErrorKind, InteractError, RetryStrategy};
pub use port::{Clock, Interactor, LlmPort};
pub use state::{RunPhase, RunState, RunStatus};
pub use types::{CartDiff, CartItem, CartSnapshot, ReviewPack};
