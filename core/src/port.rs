//! Hexagonal ports.
//!
//! Everything the business logic needs from the outside world is reached
//! through the traits here: the page ([`Interactor`]), the LLM
//! ([`LlmPort`]), storage ([`SessionStore`] and friends) and time
//! ([`Clock`]). Adapters live in their own crates; tests substitute mocks
//! from `cartpilot-testing`.

use crate::error::{InteractError, LlmError, StoreError};
use crate::popup::PopupPattern;
use crate::probe::ReorderModalProbe;
use crate::selector::SelectorChain;
use crate::state::{CheckpointRecord, RunState};
use crate::types::{CartState, DebugLogEntry, OrderHistoryCache, SlotPreferences};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Clock port for testable time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Options for [`Interactor::find_element`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FindOptions {
    /// Deadline for the whole chain.
    pub timeout: Duration,
    /// Require the match to be visible (connected, non-zero box, not
    /// display/visibility hidden).
    pub visible: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            visible: true,
        }
    }
}

impl FindOptions {
    /// Options with a specific timeout, visibility required.
    #[must_use]
    pub const fn visible_within(timeout: Duration) -> Self {
        Self {
            timeout,
            visible: true,
        }
    }
}

/// Options for [`Interactor::click`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClickOptions {
    /// Deadline for the element to become visible and enabled.
    pub timeout: Duration,
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Options for [`Interactor::navigate_to`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NavigateOptions {
    /// Navigation deadline.
    pub timeout: Duration,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Options for [`Interactor::wait_for_navigation`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WaitNavigationOptions {
    /// Deadline; `None` uses the adapter default.
    pub timeout: Option<Duration>,
    /// Regex the settled URL must match, when given.
    pub url_pattern: Option<String>,
}

/// A successful chain resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FindResult<H> {
    /// Opaque element handle.
    pub handle: H,
    /// Index into the chain (0 = primary) that matched.
    pub selector_index: usize,
    /// The CSS pattern that matched, for logs.
    pub matched_selector: String,
}

/// The page port. One uniform surface over the retailer page, implemented
/// by the full-control driver adapter and the injected-script adapter.
///
/// Contract highlights:
///
/// - `find_element` returns `Ok(None)` on timeout, never an error.
/// - The getters (`is_visible`, `text_content`, `attribute`) never fail on
///   stale handles; they return `false` / `None`.
/// - `click` propagates the underlying error when the element never
///   becomes clickable.
/// - `cart_state` is a best-effort probe: unreadable fields are `None`.
#[async_trait]
pub trait Interactor: Send + Sync {
    /// Opaque element handle produced by this adapter.
    type Handle: Clone + Send + Sync + 'static;

    /// Resolve a selector chain in declared order, returning the first
    /// match with the index of the pattern that matched.
    ///
    /// # Errors
    ///
    /// Returns an error only for transport-level faults; a plain "nothing
    /// matched before the deadline" is `Ok(None)`.
    async fn find_element(
        &self,
        chain: &SelectorChain,
        opts: FindOptions,
    ) -> Result<Option<FindResult<Self::Handle>>, InteractError>;

    /// All current matches of a raw selector list. No text post-filtering.
    ///
    /// # Errors
    ///
    /// Returns an error for transport-level faults.
    async fn find_all(&self, selector: &str) -> Result<Vec<Self::Handle>, InteractError>;

    /// Click an element once it is visible and enabled.
    ///
    /// # Errors
    ///
    /// Propagates a timeout when the element never becomes clickable, and
    /// transport faults from the underlying driver.
    async fn click(&self, handle: &Self::Handle, opts: ClickOptions)
        -> Result<(), InteractError>;

    /// Whether the element is currently visible. `false` for stale handles.
    async fn is_visible(&self, handle: &Self::Handle) -> bool;

    /// The element's text content. `None` for stale handles.
    async fn text_content(&self, handle: &Self::Handle) -> Option<String>;

    /// An attribute value. `None` when absent or the handle is stale.
    async fn attribute(&self, handle: &Self::Handle, name: &str) -> Option<String>;

    /// Probe the cart badge and total. Best-effort; never fails.
    async fn cart_state(&self) -> CartState;

    /// Classify the reorder confirmation modal, if visible. Best-effort.
    async fn reorder_modal(&self) -> ReorderModalProbe;

    /// The current page URL.
    ///
    /// # Errors
    ///
    /// Fails when the driving page is gone.
    async fn current_url(&self) -> Result<String, InteractError>;

    /// Navigate and wait for the load to settle.
    ///
    /// # Errors
    ///
    /// Times out per `opts`, or fails on transport faults.
    async fn navigate_to(&self, url: &str, opts: NavigateOptions) -> Result<(), InteractError>;

    /// Wait for an in-flight navigation to settle, optionally requiring the
    /// final URL to match a pattern.
    ///
    /// # Errors
    ///
    /// Times out per `opts`.
    async fn wait_for_navigation(
        &self,
        opts: WaitNavigationOptions,
    ) -> Result<(), InteractError>;

    /// Plain suspension; cancellable like every other suspension point.
    async fn wait_for_timeout(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Capture a screenshot and return its identifier. The injected
    /// adapter may return a stub identifier without image bytes.
    ///
    /// # Errors
    ///
    /// Fails on driver faults; callers treat screenshot failures as
    /// non-fatal.
    async fn screenshot(&self, name: &str) -> Result<String, InteractError>;

    /// Dismissible-popup sweep primitive: candidates for the given
    /// patterns, in document order. Used by the arbiter; adapters only
    /// locate, the arbiter decides.
    ///
    /// # Errors
    ///
    /// Returns an error for transport-level faults.
    async fn popup_candidates(
        &self,
        pattern: &PopupPattern,
    ) -> Result<Vec<Self::Handle>, InteractError> {
        self.find_all(&pattern.selector).await
    }

    /// Current value of the adapter's DOM-mutation counter, when the
    /// adapter can observe mutations. The popup observer polls this at its
    /// debounce interval and sweeps on change; `None` means "periodic scan
    /// only".
    async fn mutation_tick(&self) -> Option<u64> {
        None
    }
}

/// Chat roles for the LLM port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// User turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// One message in an LLM conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender role.
    pub role: ChatRole,
    /// Text content.
    pub content: String,
}

impl ChatMessage {
    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Options for one completion call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Model identifier.
    pub model: String,
    /// Output token cap.
    pub max_tokens: u32,
    /// System prompt, when used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: 1_024,
            system_prompt: None,
            temperature: None,
            stop_sequences: Vec::new(),
        }
    }
}

/// Token usage of a completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub input_tokens: u32,
    /// Output tokens produced.
    pub output_tokens: u32,
}

/// A completed LLM call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Concatenated text content.
    pub content: String,
    /// Token usage.
    pub usage: TokenUsage,
    /// Model that answered.
    pub model: String,
    /// Provider stop reason, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// The LLM port. Optional everywhere: every caller has a deterministic
/// heuristic fallback, and `is_available` never fails.
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Whether the port can currently serve completions. Never fails.
    async fn is_available(&self) -> bool;

    /// Run one completion.
    ///
    /// # Errors
    ///
    /// Returns the closed [`LlmError`] mapping of the provider response.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<Completion, LlmError>;

    /// Store the API key. Serialized with in-flight completions; at most
    /// one outstanding key mutation at a time.
    async fn set_api_key(&self, key: String);

    /// Clear the API key, making the port unavailable.
    async fn clear_api_key(&self);

    /// The most recent error, for diagnostics.
    async fn last_error(&self) -> Option<LlmError>;
}

/// Run state plus its latest checkpoint, as persisted per session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Full run state.
    pub state: RunState,
    /// Latest checkpoint, when any phase has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointRecord>,
    /// Household the run belongs to; restored on recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,
}

/// Session-scoped persistent store (`sessions/{id}.json`). Writes are
/// atomic and last-writer-wins within a run.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist the session.
    ///
    /// # Errors
    ///
    /// I/O or serialization failure. Checkpoint writers log and continue.
    async fn save(&self, session_id: &str, session: &PersistedSession) -> Result<(), StoreError>;

    /// Load a persisted session, `None` when absent.
    ///
    /// # Errors
    ///
    /// I/O or deserialization failure.
    async fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, StoreError>;

    /// Remove a persisted session. Absent sessions are not an error.
    ///
    /// # Errors
    ///
    /// I/O failure.
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;
}

/// Session-scoped ephemeral store: API key and the debug ring buffer.
/// Nothing here survives the process.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Store the LLM API key.
    async fn set_api_key(&self, key: String);

    /// Read the LLM API key.
    async fn api_key(&self) -> Option<String>;

    /// Clear the LLM API key.
    async fn clear_api_key(&self);

    /// Append a debug entry. The ring holds at most 500 entries; overflow
    /// silently drops the oldest.
    async fn push_debug(&self, entry: DebugLogEntry);

    /// Snapshot of the debug ring, oldest first.
    async fn debug_log(&self) -> Vec<DebugLogEntry>;
}

/// Synchronized user preference store.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Stored slot preferences, when any.
    async fn slot_preferences(&self) -> Option<SlotPreferences>;

    /// Save slot preferences.
    ///
    /// # Errors
    ///
    /// I/O failure.
    async fn save_slot_preferences(&self, prefs: &SlotPreferences) -> Result<(), StoreError>;
}

/// Local cache store for scraped order history (24 h TTL enforced by the
/// reader).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Cached order history for a household, when present.
    async fn order_history(&self, household_id: &str) -> Option<OrderHistoryCache>;

    /// Cache order history for a household.
    ///
    /// # Errors
    ///
    /// I/O failure.
    async fn save_order_history(
        &self,
        household_id: &str,
        cache: &OrderHistoryCache,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_options_default_is_five_seconds_visible() {
        let opts = FindOptions::default();
        assert_eq!(opts.timeout, Duration::from_secs(5));
        assert!(opts.visible);
    }

    #[test]
    fn chat_message_builders() {
        let m = ChatMessage::user("rank these");
        assert_eq!(m.role, ChatRole::User);
        let m = ChatMessage::assistant("done");
        assert_eq!(m.role, ChatRole::Assistant);
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn persisted_session_round_trips() {
        use crate::state::RunState;
        let session = PersistedSession {
            state: RunState::idle("run-9", Utc::now()),
            checkpoint: None,
            household_id: None,
        };
        let json = serde_json::to_string(&session).unwrap();
        let back: PersistedSession = serde_json::from_str(&json).unwrap();
        assert_eq!(session, back);
    }
}
