//! Protocol message router.
//!
//! Dispatches [`Message`]s from UI-side components to the control plane
//! and the LLM port. Page-scoped actions (cart extraction, search, slots)
//! travel between the orchestrator and the page adapter directly and are
//! rejected here with `INVALID_REQUEST`.

use crate::service::{ApprovalData, SessionService, StartRequest};
use cartpilot_core::error::{CopilotError, ErrorKind};
use cartpilot_core::port::LlmPort;
use cartpilot_core::protocol::{ErrorCode, Message, MessageAction, MessageResponse};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// The control-plane router.
pub struct MessageRouter {
    service: Arc<dyn SessionService>,
    llm: Arc<dyn LlmPort>,
}

#[derive(Deserialize)]
struct SessionRef {
    session_id: String,
}

#[derive(Deserialize)]
struct ApprovePayload {
    session_id: String,
    #[serde(default)]
    approval: ApprovalData,
}

#[derive(Deserialize)]
struct ApiKeyPayload {
    key: String,
}

fn error_code_for(error: &CopilotError) -> ErrorCode {
    match error.kind {
        ErrorKind::Timeout => ErrorCode::Timeout,
        ErrorKind::InvalidTransition => ErrorCode::InvalidState,
        ErrorKind::Corruption | ErrorKind::SyncFailed => ErrorCode::StateMismatch,
        ErrorKind::ElementNotFound | ErrorKind::SelectorFailed => ErrorCode::ElementNotFound,
        ErrorKind::PageChanged => ErrorCode::WrongPage,
        ErrorKind::ExtractionFailed => ErrorCode::PageNotReady,
        ErrorKind::Offline | ErrorKind::ServerError => ErrorCode::NetworkError,
        ErrorKind::NotLoggedIn | ErrorKind::SessionExpired | ErrorKind::LoginRequired => {
            ErrorCode::NotLoggedIn
        },
        ErrorKind::ApiKeyMissing => ErrorCode::ApiKeyMissing,
        ErrorKind::ApiKeyInvalid => ErrorCode::ApiKeyInvalid,
        ErrorKind::RateLimited => ErrorCode::RateLimited,
        ErrorKind::LlmServerError | ErrorKind::ContextTooLong => ErrorCode::ApiError,
        _ => ErrorCode::Unknown,
    }
}

impl MessageRouter {
    /// Build a router.
    #[must_use]
    pub fn new(service: Arc<dyn SessionService>, llm: Arc<dyn LlmPort>) -> Self {
        Self { service, llm }
    }

    /// Handle one message, always producing a response with timing.
    pub async fn handle(&self, message: Message) -> MessageResponse {
        let started = Instant::now();
        let id = message.id.clone();
        let response = self.dispatch(message).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match response {
            Ok(data) => MessageResponse::ok(id, data).with_timing(duration_ms),
            Err((code, text)) => MessageResponse::fail(id, code, text).with_timing(duration_ms),
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(
        payload: Option<serde_json::Value>,
    ) -> Result<T, (ErrorCode, String)> {
        let payload = payload.ok_or((ErrorCode::InvalidRequest, "missing payload".to_string()))?;
        serde_json::from_value(payload)
            .map_err(|e| (ErrorCode::InvalidRequest, format!("bad payload: {e}")))
    }

    fn service_err(error: CopilotError) -> (ErrorCode, String) {
        (error_code_for(&error), error.to_string())
    }

    async fn dispatch(
        &self,
        message: Message,
    ) -> Result<serde_json::Value, (ErrorCode, String)> {
        match message.action {
            MessageAction::StartRun => {
                let request: StartRequest = Self::parse(message.payload)?;
                let view = self.service.start(request).await.map_err(Self::service_err)?;
                serde_json::to_value(view)
                    .map_err(|e| (ErrorCode::Unknown, e.to_string()))
            },
            MessageAction::GetRunState => {
                let payload: SessionRef = Self::parse(message.payload)?;
                let view = self
                    .service
                    .get(&payload.session_id)
                    .await
                    .map_err(Self::service_err)?;
                serde_json::to_value(view)
                    .map_err(|e| (ErrorCode::Unknown, e.to_string()))
            },
            MessageAction::ApproveReview => {
                let payload: ApprovePayload = Self::parse(message.payload)?;
                let view = self
                    .service
                    .approve(&payload.session_id, payload.approval)
                    .await
                    .map_err(Self::service_err)?;
                serde_json::to_value(view)
                    .map_err(|e| (ErrorCode::Unknown, e.to_string()))
            },
            MessageAction::CancelRun | MessageAction::PauseRun => {
                let payload: SessionRef = Self::parse(message.payload)?;
                let view = self
                    .service
                    .cancel(&payload.session_id)
                    .await
                    .map_err(Self::service_err)?;
                serde_json::to_value(view)
                    .map_err(|e| (ErrorCode::Unknown, e.to_string()))
            },
            MessageAction::ResumeRun => {
                let payload: SessionRef = Self::parse(message.payload)?;
                let view = self
                    .service
                    .resume(&payload.session_id)
                    .await
                    .map_err(Self::service_err)?;
                serde_json::to_value(view)
                    .map_err(|e| (ErrorCode::Unknown, e.to_string()))
            },
            MessageAction::SetApiKey => {
                let payload: ApiKeyPayload = Self::parse(message.payload)?;
                self.llm.set_api_key(payload.key).await;
                Ok(json!({ "stored": true }))
            },
            MessageAction::ClearApiKey => {
                self.llm.clear_api_key().await;
                Ok(json!({ "cleared": true }))
            },
            MessageAction::GetLlmStatus => {
                let available = self.llm.is_available().await;
                let last_error = self.llm.last_error().await.map(|e| e.to_string());
                Ok(json!({ "available": available, "last_error": last_error }))
            },
            MessageAction::Ping => Ok(json!({ "pong": true })),
            MessageAction::Heartbeat | MessageAction::RunStateChanged => {
                Ok(json!({ "acknowledged": true }))
            },
            MessageAction::GetCartState
            | MessageAction::ExtractCart
            | MessageAction::GetOrderHistory
            | MessageAction::GetOrderDetail
            | MessageAction::SearchProducts
            | MessageAction::GetDeliverySlots
            | MessageAction::CheckPage
            | MessageAction::CheckLogin => Err((
                ErrorCode::InvalidRequest,
                format!("{:?} is page-scoped and not routable on the control plane", message.action),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{SessionView, SessionStatus};
    use async_trait::async_trait;
    use cartpilot_core::state::RunProgress;
    use cartpilot_testing::ScriptedLlm;

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
            assert_eq!(request.household_id, "h-1");
            Ok(view("sess-1", SessionStatus::Running))
        }

        async fn get(&self, session_id: &str) -> Result<SessionView, CopilotError> {
            if session_id == "sess-1" {
                Ok(view(session_id, SessionStatus::Review))
            } else {
                Err(CopilotError::new(ErrorKind::TabNotFound, "unknown session"))
            }
        }

        async fn approve(
            &self,
            session_id: &str,
            _approval: ApprovalData,
        ) -> Result<SessionView, CopilotError> {
            Ok(view(session_id, SessionStatus::Complete))
        }

        async fn cancel(&self, session_id: &str) -> Result<SessionView, CopilotError> {
            Ok(view(session_id, SessionStatus::Cancelled))
        }

        async fn resume(&self, session_id: &str) -> Result<SessionView, CopilotError> {
            Ok(view(session_id, SessionStatus::Running))
        }
    }

    fn router() -> MessageRouter {
        MessageRouter::new(Arc::new(StubService), Arc::new(ScriptedLlm::unavailable()))
    }

    #[tokio::test]
    async fn start_run_round_trips() {
        let response = router()
            .handle(Message::new(
                "m-1",
                MessageAction::StartRun,
                Some(json!({ "household_id": "h-1" })),
            ))
            .await;
        assert!(response.success);
        assert_eq!(response.id, "m-1");
        assert!(response.timing.is_some());
        let status = response
            .data
            .and_then(|d| d.get("status").cloned());
        assert_eq!(status, Some(json!("running")));
    }

    #[tokio::test]
    async fn missing_payload_is_invalid_request() {
        let response = router()
            .handle(Message::new("m-2", MessageAction::StartRun, None))
            .await;
        assert!(!response.success);
        let code = response.error.map(|e| e.code);
        assert_eq!(code, Some(ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn page_scoped_actions_are_rejected() {
        let response = router()
            .handle(Message::new("m-3", MessageAction::ExtractCart, None))
            .await;
        assert!(!response.success);
        let code = response.error.map(|e| e.code);
        assert_eq!(code, Some(ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn llm_status_reports_availability() {
        let response = router()
            .handle(Message::new("m-4", MessageAction::GetLlmStatus, None))
            .await;
        assert!(response.success);
        let available = response
            .data
            .and_then(|d| d.get("available").cloned());
        assert_eq!(available, Some(json!(false)));
    }

    #[tokio::test]
    async fn ping_pongs() {
        let response = router()
            .handle(Message::new("m-5", MessageAction::Ping, None))
            .await;
        assert!(response.success);
    }
}
