//! # Cartpilot Anthropic
//!
//! Anthropic Messages API adapter behind the `LlmPort`.
//!
//! The API key lives only in the session-scoped ephemeral store: the
//! adapter reads it per call and never caches it. A missing key simply
//! means `is_available()` is false — the enhancer then runs on pure
//! heuristics, which is always a valid mode.
//!
//! Provider responses map onto the closed `LlmError` set: 401 invalidates
//! and clears the key, 429 carries the `Retry-After` hint, 5xx is
//! retryable, context-window overflows are terminal for that prompt, and
//! transport faults are network errors.

mod adapter;
mod wire;

pub use adapter::AnthropicAdapter;
