//! Session registry: one orchestrator per session id.

use crate::orchestrator::{Orchestrator, OrchestratorDeps};
use crate::service::{ApprovalData, SessionService, SessionView, StartRequest};
use async_trait::async_trait;
use cartpilot_core::config::CopilotConfig;
use cartpilot_core::error::{CopilotError, ErrorKind};
use cartpilot_core::port::{CacheStore, Clock, EphemeralStore, Interactor, PreferenceStore, SessionStore};
use cartpilot_enhancer::Enhancer;
use cartpilot_registry::Registry;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Dependencies shared by every session.
#[derive(Clone)]
pub struct SharedDeps {
    /// Selector registry.
    pub registry: Arc<Registry>,
    /// Base configuration; a start request may override it per session.
    pub config: CopilotConfig,
    /// The enhancement layer.
    pub enhancer: Arc<Enhancer>,
    /// Session persistence.
    pub session_store: Arc<dyn SessionStore>,
    /// Ephemeral store.
    pub ephemeral: Arc<dyn EphemeralStore>,
    /// Synchronized preferences.
    pub preferences: Arc<dyn PreferenceStore>,
    /// Order-history cache.
    pub cache: Arc<dyn CacheStore>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Builds a fresh page adapter for each session.
pub type InteractorFactory<I> =
    dyn Fn() -> BoxFuture<'static, Result<Arc<I>, CopilotError>> + Send + Sync;

/// The session registry behind the control plane. Enforces at most one run
/// per session id; each `start` opens a new session.
pub struct SessionManager<I: Interactor + 'static> {
    shared: SharedDeps,
    interactor_factory: Arc<InteractorFactory<I>>,
    sessions: Mutex<HashMap<String, Arc<Orchestrator<I>>>>,
}

impl<I: Interactor + 'static> SessionManager<I> {
    /// Build a manager.
    #[must_use]
    pub fn new(shared: SharedDeps, interactor_factory: Arc<InteractorFactory<I>>) -> Self {
        Self {
            shared,
            interactor_factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn deps_for(&self, interactor: Arc<I>, config: CopilotConfig) -> OrchestratorDeps<I> {
        OrchestratorDeps {
            interactor,
            registry: Arc::clone(&self.shared.registry),
            config,
            enhancer: Arc::clone(&self.shared.enhancer),
            session_store: Arc::clone(&self.shared.session_store),
            ephemeral: Arc::clone(&self.shared.ephemeral),
            preferences: Arc::clone(&self.shared.preferences),
            cache: Arc::clone(&self.shared.cache),
            clock: Arc::clone(&self.shared.clock),
        }
    }

    async fn lookup(&self, session_id: &str) -> Result<Arc<Orchestrator<I>>, CopilotError> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                CopilotError::new(ErrorKind::TabNotFound, format!("unknown session {session_id}"))
            })
    }

    async fn view_of(&self, orchestrator: &Arc<Orchestrator<I>>) -> SessionView {
        let state = orchestrator.state().await;
        let pack = orchestrator.review_pack().await;
        SessionView::from_state(orchestrator.session_id(), &state, pack)
    }

    /// Adopt a persisted session on process wake. When the persisted run
    /// is stale the orchestrator resumes from its checkpoint in the
    /// background.
    ///
    /// # Errors
    ///
    /// Corrupted persisted state or interactor construction failure.
    pub async fn adopt(&self, session_id: &str) -> Result<SessionView, CopilotError> {
        let interactor = (self.interactor_factory)().await?;
        let deps = self.deps_for(interactor, self.shared.config.clone());
        let orchestrator = Arc::new(Orchestrator::recover(session_id, deps).await?);
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), Arc::clone(&orchestrator));

        if orchestrator.recovery_needed().await {
            tracing::info!(session_id, "resuming recovered session");
            tokio::spawn(Arc::clone(&orchestrator).run());
        }
        Ok(self.view_of(&orchestrator).await)
    }
}

#[async_trait]
impl<I: Interactor + 'static> SessionService for SessionManager<I> {
    async fn start(&self, request: StartRequest) -> Result<SessionView, CopilotError> {
        let session_id = format!("sess-{}", Uuid::new_v4());
        let config = request.config.unwrap_or_else(|| self.shared.config.clone());
        let interactor = (self.interactor_factory)().await?;
        let deps = self.deps_for(interactor, config);
        let orchestrator = Arc::new(Orchestrator::new(session_id.clone(), deps));

        orchestrator.start(request.household_id).await?;
        self.sessions
            .lock()
            .await
            .insert(session_id, Arc::clone(&orchestrator));

        tokio::spawn(Arc::clone(&orchestrator).run());
        Ok(self.view_of(&orchestrator).await)
    }

    async fn get(&self, session_id: &str) -> Result<SessionView, CopilotError> {
        let orchestrator = self.lookup(session_id).await?;
        Ok(self.view_of(&orchestrator).await)
    }

    async fn approve(
        &self,
        session_id: &str,
        approval: ApprovalData,
    ) -> Result<SessionView, CopilotError> {
        let orchestrator = self.lookup(session_id).await?;
        orchestrator.approve(approval).await?;
        Ok(self.view_of(&orchestrator).await)
    }

    async fn cancel(&self, session_id: &str) -> Result<SessionView, CopilotError> {
        let orchestrator = self.lookup(session_id).await?;
        orchestrator.cancel_run().await;
        Ok(self.view_of(&orchestrator).await)
    }

    async fn resume(&self, session_id: &str) -> Result<SessionView, CopilotError> {
        let orchestrator = self.lookup(session_id).await?;
        orchestrator.resume().await?;
        tokio::spawn(Arc::clone(&orchestrator).run());
        Ok(self.view_of(&orchestrator).await)
    }
}
