//! Internal message protocol.
//!
//! Orchestrator and page-side components speak a small request/response
//! protocol. Actions and error codes are closed enums; unknown strings fail
//! deserialization instead of flowing through as stringly-typed data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of protocol actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageAction {
    // state
    /// Read the current run state.
    GetRunState,
    // cart
    /// Probe the cart badge/total.
    GetCartState,
    /// Extract the full cart page.
    ExtractCart,
    // order
    /// Scrape the order history list.
    GetOrderHistory,
    /// Scrape one order detail page.
    GetOrderDetail,
    // search
    /// Run a product search and extract tiles.
    SearchProducts,
    // slots
    /// Extract the delivery slot grid.
    GetDeliverySlots,
    // page
    /// Check which registered page the current URL matches.
    CheckPage,
    // login
    /// Probe the login state.
    CheckLogin,
    // llm
    /// Store an LLM API key in the ephemeral store.
    SetApiKey,
    /// Clear the stored LLM API key.
    ClearApiKey,
    /// Report LLM port availability.
    GetLlmStatus,
    // run control
    /// Start a run.
    StartRun,
    /// Pause the running run.
    PauseRun,
    /// Resume a paused run.
    ResumeRun,
    /// Cancel the run.
    CancelRun,
    /// Approve the review pack. Never places an order.
    ApproveReview,
    // system events
    /// Liveness probe.
    Ping,
    /// Push notification that the run state changed.
    RunStateChanged,
    /// Keep-alive heartbeat tick.
    Heartbeat,
}

/// Closed set of protocol error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unclassified failure.
    Unknown,
    /// Deadline exceeded.
    Timeout,
    /// Malformed request payload.
    InvalidRequest,
    /// Operation not allowed in the current run status.
    InvalidState,
    /// Persisted and in-memory state disagree.
    StateMismatch,
    /// Selector resolution failed.
    ElementNotFound,
    /// Document not ready for the operation.
    PageNotReady,
    /// URL does not match the expected page.
    WrongPage,
    /// Transport failure.
    NetworkError,
    /// Upstream API failure.
    ApiError,
    /// No household session.
    NotLoggedIn,
    /// No LLM API key configured.
    ApiKeyMissing,
    /// LLM API key rejected.
    ApiKeyInvalid,
    /// LLM endpoint rate-limited.
    RateLimited,
}

impl From<&crate::error::InteractError> for ErrorCode {
    fn from(err: &crate::error::InteractError) -> Self {
        use crate::error::InteractError;
        match err {
            InteractError::ElementNotFound(_) => Self::ElementNotFound,
            InteractError::WrongPage(_) => Self::WrongPage,
            InteractError::PageNotReady(_) => Self::PageNotReady,
            InteractError::Timeout { .. } => Self::Timeout,
            InteractError::NetworkError(_) => Self::NetworkError,
        }
    }
}

/// A protocol request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id, echoed in the response.
    pub id: String,
    /// Requested action.
    pub action: MessageAction,
    /// Action-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Send instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a message with a payload.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        action: MessageAction,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            action,
            payload,
            timestamp: None,
        }
    }
}

/// Structured error in a failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Closed error code.
    pub code: ErrorCode,
    /// Log-friendly message.
    pub message: String,
    /// Optional structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Handling duration attached to responses for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Milliseconds spent handling the request.
    pub duration_ms: u64,
}

/// A protocol response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Correlation id from the request.
    pub id: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// Handling duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
}

impl MessageResponse {
    /// A success response.
    #[must_use]
    pub fn ok(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
            timing: None,
        }
    }

    /// A failure response.
    #[must_use]
    pub fn fail(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                details: None,
            }),
            timing: None,
        }
    }

    /// Attach a handling duration.
    #[must_use]
    pub const fn with_timing(mut self, duration_ms: u64) -> Self {
        self.timing = Some(Timing { duration_ms });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn actions_serialize_screaming_snake() {
        let json = serde_json::to_string(&MessageAction::StartRun).unwrap();
        assert_eq!(json, r#""START_RUN""#);
        let json = serde_json::to_string(&MessageAction::GetCartState).unwrap();
        assert_eq!(json, r#""GET_CART_STATE""#);
    }

    #[test]
    fn unknown_action_fails_deserialization() {
        let result: Result<MessageAction, _> = serde_json::from_str(r#""PLACE_ORDER""#);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn response_round_trip() {
        let resp = MessageResponse::fail("m-1", ErrorCode::NotLoggedIn, "no session")
            .with_timing(12);
        let json = serde_json::to_string(&resp).unwrap();
        let back: MessageResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, back);
        assert!(!back.success);
    }

    #[test]
    fn interact_error_maps_to_wire_code() {
        use crate::error::InteractError;
        let err = InteractError::WrongPage("expected order detail".into());
        assert_eq!(ErrorCode::from(&err), ErrorCode::WrongPage);
    }
}
