//! # Cartpilot Testing
//!
//! Testing utilities and mock ports for the cartpilot workspace.
//!
//! This crate provides:
//! - [`mocks::MockInteractor`]: a scripted in-memory page implementing the
//!   `Interactor` port, with a click journal, scriptable click effects,
//!   cart-state and reorder-modal scripting, and a mutation counter for
//!   popup-observer tests.
//! - [`mocks::FixedClock`]: deterministic time.
//! - [`stores`]: in-memory implementations of the storage ports.
//! - [`llm::ScriptedLlm`]: an `LlmPort` that replays canned results.
//!
//! Everything here is deterministic; no network, no browser, no disk.

pub mod llm;
pub mod mocks;
pub mod stores;

pub use llm::ScriptedLlm;
pub use mocks::{FixedClock, MockInteractor, test_clock};
pub use stores::{MemoryCacheStore, MemoryEphemeralStore, MemoryPreferenceStore, MemorySessionStore};
