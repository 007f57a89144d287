//! Closed error taxonomy and retry policy tables.
//!
//! Every failure in the system is classified into an [`ErrorKind`] from a
//! closed set. The kind determines the category, whether the error is
//! locally recoverable, the retry strategy, and the fixed user-facing
//! message. Raw internal text never reaches the user.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity and upstream availability.
    Network,
    /// Page structure and extraction.
    Dom,
    /// Run state machine violations.
    State,
    /// Browser/runtime environment faults.
    Browser,
    /// Process lifecycle and recovery.
    Lifecycle,
    /// Retailer session validity.
    Auth,
    /// LLM port failures.
    Llm,
    /// User-initiated interruptions.
    User,
}

/// Closed set of error kinds. Adding a variant is a reviewed change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // network
    /// No connectivity at all.
    Offline,
    /// An operation exceeded its deadline.
    Timeout,
    /// Upstream 5xx-style failure.
    ServerError,
    // dom
    /// No selector in the chain matched.
    ElementNotFound,
    /// A chain matched but the element was unusable.
    SelectorFailed,
    /// The page no longer matches the registered layout.
    PageChanged,
    /// Structured extraction produced garbage.
    ExtractionFailed,
    // state
    /// A transition outside the allowed table was attempted.
    InvalidTransition,
    /// Persisted state failed validation on load.
    Corruption,
    /// State synchronization with the store failed.
    SyncFailed,
    // browser
    /// Storage quota exhausted.
    StorageQuota,
    /// A required browser permission is missing.
    PermissionDenied,
    /// The driving tab/page is gone.
    TabNotFound,
    /// Internal message delivery failed.
    MessagingFailed,
    // lifecycle
    /// The background worker was torn down mid-run.
    WorkerTerminated,
    /// Recovery from a checkpoint failed.
    RecoveryFailed,
    /// A keep-alive or scheduling timer failed.
    TimerFailed,
    // auth
    /// No household session on the retailer site.
    NotLoggedIn,
    /// The retailer session expired mid-run.
    SessionExpired,
    /// The operation needs a fresh login.
    LoginRequired,
    // llm
    /// No API key configured.
    ApiKeyMissing,
    /// The API key was rejected.
    ApiKeyInvalid,
    /// The LLM endpoint rate-limited the request.
    RateLimited,
    /// The prompt exceeded the model context window.
    ContextTooLong,
    /// The LLM endpoint failed server-side.
    LlmServerError,
    // user
    /// The user cancelled the run.
    Cancelled,
    /// The user let an interactive step lapse.
    UserTimeout,
}

/// Table-driven retry behavior for one error kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Do not retry; surface to the orchestrator.
    Abort,
    /// Retry immediately with a fixed gap.
    Immediate {
        /// Gap between attempts, in milliseconds.
        gap_ms: u64,
        /// Maximum attempts including the first.
        max_attempts: u32,
    },
    /// Retry on a fixed exponential ladder.
    Exponential {
        /// Delay ladder in milliseconds, one entry per retry.
        schedule_ms: &'static [u64],
    },
}

impl RetryStrategy {
    /// Maximum retry attempts this strategy allows.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        match self {
            Self::Abort => 0,
            Self::Immediate { max_attempts, .. } => *max_attempts,
            #[allow(clippy::cast_possible_truncation)]
            Self::Exponential { schedule_ms } => schedule_ms.len() as u32,
        }
    }

    /// Delay before retry number `attempt` (0-based), or `None` when the
    /// strategy is exhausted.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> Option<u64> {
        match self {
            Self::Abort => None,
            Self::Immediate {
                gap_ms,
                max_attempts,
            } => (attempt < *max_attempts).then_some(*gap_ms),
            Self::Exponential { schedule_ms } => schedule_ms.get(attempt as usize).copied(),
        }
    }
}

impl ErrorKind {
    /// Category this kind belongs to.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::Offline | Self::Timeout | Self::ServerError => ErrorCategory::Network,
            Self::ElementNotFound
            | Self::SelectorFailed
            | Self::PageChanged
            | Self::ExtractionFailed => ErrorCategory::Dom,
            Self::InvalidTransition | Self::Corruption | Self::SyncFailed => ErrorCategory::State,
            Self::StorageQuota
            | Self::PermissionDenied
            | Self::TabNotFound
            | Self::MessagingFailed => ErrorCategory::Browser,
            Self::WorkerTerminated | Self::RecoveryFailed | Self::TimerFailed => {
                ErrorCategory::Lifecycle
            },
            Self::NotLoggedIn | Self::SessionExpired | Self::LoginRequired => ErrorCategory::Auth,
            Self::ApiKeyMissing
            | Self::ApiKeyInvalid
            | Self::RateLimited
            | Self::ContextTooLong
            | Self::LlmServerError => ErrorCategory::Llm,
            Self::Cancelled | Self::UserTimeout => ErrorCategory::User,
        }
    }

    /// Whether the orchestrator may retry locally.
    #[must_use]
    pub const fn recoverable(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Offline
                | Self::ServerError
                | Self::ElementNotFound
                | Self::RateLimited
                | Self::LlmServerError
        )
    }

    /// The per-operation retry table.
    #[must_use]
    pub const fn retry_strategy(self) -> RetryStrategy {
        match self {
            // Network timeouts back off 1/2/4 s.
            Self::Timeout | Self::Offline | Self::ServerError => RetryStrategy::Exponential {
                schedule_ms: &[1_000, 2_000, 4_000],
            },
            // DOM lookups retry immediately with a 500 ms gap.
            Self::ElementNotFound => RetryStrategy::Immediate {
                gap_ms: 500,
                max_attempts: 3,
            },
            // Rate-limited LLM calls back off 30/60/120 s.
            Self::RateLimited => RetryStrategy::Exponential {
                schedule_ms: &[30_000, 60_000, 120_000],
            },
            // LLM 5xx retries on a flat 5 s cadence.
            Self::LlmServerError => RetryStrategy::Immediate {
                gap_ms: 5_000,
                max_attempts: 3,
            },
            _ => RetryStrategy::Abort,
        }
    }

    /// Fixed user-facing message for this kind.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::Offline => "You appear to be offline. Check your connection and retry.",
            Self::Timeout => "The store is responding slowly. The run will retry automatically.",
            Self::ServerError => "The store had a temporary problem. The run will retry shortly.",
            Self::ElementNotFound | Self::SelectorFailed | Self::PageChanged => {
                "The store page looks different than expected. Your cart was not modified."
            },
            Self::ExtractionFailed => {
                "Some product details could not be read. Review the cart carefully."
            },
            Self::InvalidTransition | Self::Corruption | Self::SyncFailed => {
                "The run hit an internal state problem and was paused."
            },
            Self::StorageQuota => "Local storage is full. Clear space and retry.",
            Self::PermissionDenied => "A required browser permission is missing.",
            Self::TabNotFound => "The shopping tab was closed. Start a new run.",
            Self::MessagingFailed | Self::WorkerTerminated | Self::TimerFailed => {
                "The assistant was interrupted. It will recover on the next start."
            },
            Self::RecoveryFailed => "The interrupted run could not be resumed. Start a new run.",
            Self::NotLoggedIn | Self::LoginRequired => {
                "Please log in to the store before starting a run."
            },
            Self::SessionExpired => "Your store session expired. Log in again and resume.",
            Self::ApiKeyMissing | Self::ApiKeyInvalid => {
                "Smart suggestions are unavailable; the run continues without them."
            },
            Self::RateLimited | Self::LlmServerError | Self::ContextTooLong => {
                "Smart suggestions are temporarily unavailable; the run continues without them."
            },
            Self::Cancelled => "Run cancelled. Your cart keeps whatever was already added.",
            Self::UserTimeout => "The run paused waiting for you and timed out.",
        }
    }
}

/// The error type carried through the orchestrator and persisted into
/// [`crate::state::RunState`].
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct CopilotError {
    /// Classified kind.
    pub kind: ErrorKind,
    /// Internal message for logs; never shown to users.
    pub message: String,
    /// Optional structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CopilotError {
    /// Build an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured context.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether the orchestrator may retry locally.
    #[must_use]
    pub const fn recoverable(&self) -> bool {
        self.kind.recoverable()
    }

    /// Category of the underlying kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Retry table entry for the underlying kind.
    #[must_use]
    pub const fn retry_strategy(&self) -> RetryStrategy {
        self.kind.retry_strategy()
    }

    /// Fixed user-facing message.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

/// Errors surfaced by the page interactor. Closed set; adapters map their
/// underlying driver faults into these five.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "code", content = "detail")]
pub enum InteractError {
    /// No selector in the chain matched within the deadline.
    #[error("element not found: {0}")]
    ElementNotFound(String),
    /// The current URL does not match the expected page.
    #[error("wrong page: {0}")]
    WrongPage(String),
    /// The document is not in a usable ready state.
    #[error("page not ready: {0}")]
    PageNotReady(String),
    /// An operation exceeded its deadline.
    #[error("timed out after {waited_ms} ms: {context}")]
    Timeout {
        /// How long the operation waited.
        waited_ms: u64,
        /// What was being waited for.
        context: String,
    },
    /// The underlying transport failed.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl InteractError {
    /// Classify into the orchestrator taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ElementNotFound(_) => ErrorKind::ElementNotFound,
            Self::WrongPage(_) => ErrorKind::PageChanged,
            Self::PageNotReady(_) => ErrorKind::ExtractionFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NetworkError(_) => ErrorKind::Offline,
        }
    }
}

impl From<InteractError> for CopilotError {
    fn from(err: InteractError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Run state machine violation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StateError {
    /// A transition outside the allowed table was attempted.
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Status before the attempt.
        from: crate::state::RunStatus,
        /// Requested status.
        to: crate::state::RunStatus,
    },
    /// A guard rejected an otherwise-shaped transition.
    #[error("transition guard rejected: {0}")]
    GuardRejected(String),
}

impl From<StateError> for CopilotError {
    fn from(err: StateError) -> Self {
        Self::new(ErrorKind::InvalidTransition, err.to_string())
    }
}

/// LLM port failures, mapped from provider responses by the adapter.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum LlmError {
    /// No API key configured; the port is unavailable.
    #[error("API key missing")]
    ApiKeyMissing,
    /// The provider rejected the key (401). The adapter clears the key.
    #[error("API key invalid")]
    ApiKeyInvalid,
    /// 429 from the provider.
    #[error("rate limited, retry after {retry_after_secs:?} s")]
    RateLimited {
        /// `Retry-After` from the response, when present.
        retry_after_secs: Option<u64>,
    },
    /// The prompt exceeded the model context window.
    #[error("context too long")]
    ContextTooLong,
    /// 5xx from the provider.
    #[error("server error (status {status})")]
    ServerError {
        /// HTTP status code.
        status: u16,
    },
    /// Transport-level failure.
    #[error("network error: {0}")]
    NetworkError(String),
    /// The response body did not parse.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether the call may be retried.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::NetworkError(_)
        )
    }

    /// Classify into the orchestrator taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ApiKeyMissing => ErrorKind::ApiKeyMissing,
            Self::ApiKeyInvalid => ErrorKind::ApiKeyInvalid,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ContextTooLong => ErrorKind::ContextTooLong,
            Self::ServerError { .. } | Self::InvalidResponse(_) => ErrorKind::LlmServerError,
            Self::NetworkError(_) => ErrorKind::Offline,
        }
    }
}

/// Storage port failures. Checkpoint writers log these and continue.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Filesystem or backend I/O failure.
    #[error("store I/O error: {0}")]
    Io(String),
    /// Payload failed to (de)serialize.
    #[error("store serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_set_matches_classification() {
        for kind in [
            ErrorKind::Timeout,
            ErrorKind::Offline,
            ErrorKind::ServerError,
            ErrorKind::ElementNotFound,
            ErrorKind::RateLimited,
            ErrorKind::LlmServerError,
        ] {
            assert!(kind.recoverable(), "{kind:?} should be recoverable");
        }
        for kind in [
            ErrorKind::NotLoggedIn,
            ErrorKind::InvalidTransition,
            ErrorKind::ContextTooLong,
            ErrorKind::ApiKeyMissing,
            ErrorKind::ApiKeyInvalid,
            ErrorKind::StorageQuota,
            ErrorKind::PermissionDenied,
            ErrorKind::PageChanged,
        ] {
            assert!(!kind.recoverable(), "{kind:?} should not be recoverable");
        }
    }

    #[test]
    fn network_timeouts_back_off_exponentially() {
        let strategy = ErrorKind::Timeout.retry_strategy();
        assert_eq!(strategy.delay_ms(0), Some(1_000));
        assert_eq!(strategy.delay_ms(1), Some(2_000));
        assert_eq!(strategy.delay_ms(2), Some(4_000));
        assert_eq!(strategy.delay_ms(3), None);
        assert_eq!(strategy.max_attempts(), 3);
    }

    #[test]
    fn dom_misses_retry_immediately() {
        let strategy = ErrorKind::ElementNotFound.retry_strategy();
        assert_eq!(strategy.delay_ms(0), Some(500));
        assert_eq!(strategy.delay_ms(2), Some(500));
        assert_eq!(strategy.delay_ms(3), None);
    }

    #[test]
    fn rate_limits_back_off_in_tens_of_seconds() {
        let strategy = ErrorKind::RateLimited.retry_strategy();
        assert_eq!(strategy.delay_ms(0), Some(30_000));
        assert_eq!(strategy.delay_ms(2), Some(120_000));
    }

    #[test]
    fn llm_server_errors_retry_on_a_flat_five_seconds() {
        let strategy = ErrorKind::LlmServerError.retry_strategy();
        assert_eq!(strategy.delay_ms(0), Some(5_000));
        assert_eq!(strategy.delay_ms(2), Some(5_000));
        assert_eq!(strategy.delay_ms(3), None);
        assert_eq!(strategy.max_attempts(), 3);
    }

    #[test]
    fn aborting_kinds_never_retry() {
        for kind in [
            ErrorKind::InvalidTransition,
            ErrorKind::StorageQuota,
            ErrorKind::PermissionDenied,
            ErrorKind::PageChanged,
        ] {
            assert_eq!(kind.retry_strategy(), RetryStrategy::Abort);
            assert_eq!(kind.retry_strategy().delay_ms(0), None);
        }
    }

    #[test]
    fn interact_errors_classify_into_taxonomy() {
        assert_eq!(
            InteractError::ElementNotFound("x".into()).kind(),
            ErrorKind::ElementNotFound
        );
        assert_eq!(
            InteractError::Timeout {
                waited_ms: 5_000,
                context: "header".into()
            }
            .kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn copilot_error_round_trips() {
        let err = CopilotError::new(ErrorKind::ElementNotFound, "reorder button")
            .with_details(serde_json::json!({"chain": "reorder-button"}));
        let json = serde_json::to_string(&err).unwrap();
        let back: CopilotError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn llm_errors_know_retryability() {
        assert!(LlmError::RateLimited {
            retry_after_secs: Some(60)
        }
        .retryable());
        assert!(LlmError::ServerError { status: 503 }.retryable());
        assert!(!LlmError::ApiKeyInvalid.retryable());
        assert!(!LlmError::ContextTooLong.retryable());
    }
}
