//! The control-plane service contract.
//!
//! `cartpilot-web` exposes these four operations over HTTP; the handlers
//! are generic over this trait so the web crate never touches the
//! orchestrator directly. Approval records user intent and nothing else:
//! there is no order-submission operation anywhere in this contract.

use async_trait::async_trait;
use cartpilot_core::error::{CopilotError, ErrorKind};
use cartpilot_core::state::{RunProgress, RunState, RunStatus};
use cartpilot_core::types::ReviewPack;
use serde::{Deserialize, Serialize};

/// Request to start a run for a household.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StartRequest {
    /// Opaque household identifier.
    pub household_id: String,
    /// Display name for logs only; credentials never pass through here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional config overrides for this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<cartpilot_core::config::CopilotConfig>,
}

/// User approval of a review pack. Stored, never acted on: checkout stays
/// manual.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ApprovalData {
    /// Who approved, for the audit trail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    /// Reviewer modifications to carry alongside the pack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications: Option<serde_json::Value>,
}

/// Wire-level session status. Mirrors the run status, with `cancelled`
/// for runs paused by an explicit user cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No run in progress.
    Idle,
    /// Run executing.
    Running,
    /// Run paused on an error.
    Paused,
    /// Review pack ready, awaiting approval.
    Review,
    /// Run complete after approval.
    Complete,
    /// Run cancelled by the user.
    Cancelled,
}

impl From<&RunState> for SessionStatus {
    fn from(state: &RunState) -> Self {
        match state.status {
            RunStatus::Idle => Self::Idle,
            RunStatus::Running => Self::Running,
            RunStatus::Paused => {
                let cancelled = state
                    .error
                    .as_ref()
                    .is_some_and(|e| e.kind == ErrorKind::Cancelled);
                if cancelled {
                    Self::Cancelled
                } else {
                    Self::Paused
                }
            },
            RunStatus::Review => Self::Review,
            RunStatus::Complete => Self::Complete,
        }
    }
}

/// Pollable session view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionView {
    /// Session identifier.
    pub session_id: String,
    /// Wire status.
    pub status: SessionStatus,
    /// Progress counters.
    pub progress: RunProgress,
    /// Fixed user-facing message when the run is paused on an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    /// The review pack, once ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_pack: Option<ReviewPack>,
}

impl SessionView {
    /// Build a view from a state copy and optional pack.
    #[must_use]
    pub fn from_state(
        session_id: impl Into<String>,
        state: &RunState,
        review_pack: Option<ReviewPack>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::from(state),
            progress: state.progress,
            user_message: state.error.as_ref().map(|e| e.user_message().to_string()),
            review_pack,
        }
    }
}

/// The four control-plane operations.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Start a run. Returns immediately; the run proceeds in the
    /// background.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the session already has a non-idle run, and
    /// login/setup failures.
    async fn start(&self, request: StartRequest) -> Result<SessionView, CopilotError>;

    /// Poll a session.
    ///
    /// # Errors
    ///
    /// Unknown session id.
    async fn get(&self, session_id: &str) -> Result<SessionView, CopilotError>;

    /// Approve the review pack. Records intent; never places an order.
    ///
    /// # Errors
    ///
    /// Unknown session id, or the session is not in review.
    async fn approve(
        &self,
        session_id: &str,
        approval: ApprovalData,
    ) -> Result<SessionView, CopilotError>;

    /// Cancel the session's run. Idempotent.
    ///
    /// # Errors
    ///
    /// Unknown session id.
    async fn cancel(&self, session_id: &str) -> Result<SessionView, CopilotError>;

    /// Resume a paused run from its checkpoint.
    ///
    /// # Errors
    ///
    /// Unknown session id, the session is not paused, or the retry guard
    /// rejects the resume.
    async fn resume(&self, session_id: &str) -> Result<SessionView, CopilotError>;
}
