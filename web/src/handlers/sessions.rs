//! The four session operations.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use cartpilot_runtime::{ApprovalData, SessionView, StartRequest};

/// `POST /v1/sessions` — start a run for a household. Returns immediately;
/// the run proceeds in the background and is pollable via `get`.
///
/// # Errors
///
/// Conflict when the household has no active retailer session; validation
/// errors for malformed bodies.
pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<SessionView>, AppError> {
    if request.household_id.trim().is_empty() {
        return Err(AppError::validation("household_id must not be empty"));
    }
    let view = state.service.start(request).await?;
    Ok(Json(view))
}

/// `GET /v1/sessions/{session_id}` — poll a session.
///
/// # Errors
///
/// 404 for unknown sessions.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.service.get(&session_id).await?;
    Ok(Json(view))
}

/// `POST /v1/sessions/{session_id}/approve` — record approval of the
/// review pack. Never places an order; checkout stays manual.
///
/// # Errors
///
/// 404 for unknown sessions, 409 outside review.
pub async fn approve(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(approval): Json<ApprovalData>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.service.approve(&session_id, approval).await?;
    Ok(Json(view))
}

/// `POST /v1/sessions/{session_id}/cancel` — cancel the run. Idempotent.
///
/// # Errors
///
/// 404 for unknown sessions.
pub async fn cancel(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.service.cancel(&session_id).await?;
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use cartpilot_core::error::{CopilotError, ErrorKind};
    use cartpilot_core::state::RunProgress;
    use cartpilot_runtime::service::{SessionService, SessionStatus};
    use serde_json::json;
    use std::sync::Arc;

    struct StubService;

    fn view(session_id: &str, status: SessionStatus) -> SessionView {
        SessionView {
            session_id: session_id.to_string(),
            status,
            progress: RunProgress::default(),
            user_message: None,
            review_pack: None,
        }
    }

    #[async_trait]
    impl SessionService for StubService {
        async fn start(&self, request: StartRequest) -> Result<SessionView, CopilotError> {
            if request.household_id == "not-logged-in" {
                return Err(CopilotError::new(ErrorKind::NotLoggedIn, "no session"));
            }
            Ok(view("sess-42", SessionStatus::Running))
        }

        async fn get(&self, session_id: &str) -> Result<SessionView, CopilotError> {
            if session_id == "sess-42" {
                Ok(view(session_id, SessionStatus::Review))
            } else {
                Err(CopilotError::new(ErrorKind::TabNotFound, "unknown"))
            }
        }

        async fn approve(
            &self,
            session_id: &str,
            _approval: ApprovalData,
        ) -> Result<SessionView, CopilotError> {
            if session_id == "sess-42" {
                Ok(view(session_id, SessionStatus::Complete))
            } else {
                Err(CopilotError::new(ErrorKind::InvalidTransition, "not in review"))
            }
        }

        async fn cancel(&self, session_id: &str) -> Result<SessionView, CopilotError> {
            Ok(view(session_id, SessionStatus::Cancelled))
        }

        async fn resume(&self, session_id: &str) -> Result<SessionView, CopilotError> {
            Ok(view(session_id, SessionStatus::Running))
        }
    }

    fn server() -> TestServer {
        let state = AppState::new(Arc::new(StubService));
        TestServer::new(router(state)).unwrap_or_else(|e| panic!("test server: {e}"))
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Test code
    async fn start_returns_running_session() {
        let server = server();
        let response = server
            .post("/v1/sessions")
            .json(&json!({ "household_id": "h-1" }))
            .await;
        response.assert_status_ok();
        let view: SessionView = response.json();
        assert_eq!(view.session_id, "sess-42");
        assert_eq!(view.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn empty_household_is_a_validation_error() {
        let server = server();
        let response = server
            .post("/v1/sessions")
            .json(&json!({ "household_id": "  " }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn logged_out_household_conflicts() {
        let server = server();
        let response = server
            .post("/v1/sessions")
            .json(&json!({ "household_id": "not-logged-in" }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn get_and_approve_round_trip() {
        let server = server();
        let response = server.get("/v1/sessions/sess-42").await;
        response.assert_status_ok();
        let view: SessionView = response.json();
        assert_eq!(view.status, SessionStatus::Review);

        let response = server
            .post("/v1/sessions/sess-42/approve")
            .json(&json!({ "approved_by": "marta" }))
            .await;
        response.assert_status_ok();
        let view: SessionView = response.json();
        assert_eq!(view.status, SessionStatus::Complete);
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let server = server();
        let response = server.get("/v1/sessions/nope").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_is_cancelled() {
        let server = server();
        let response = server.post("/v1/sessions/sess-42/cancel").await;
        response.assert_status_ok();
        let view: SessionView = response.json();
        assert_eq!(view.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let server = server();
        let response = server.get("/healthz").await;
        response.assert_status_ok();
    }
}
