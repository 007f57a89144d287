//! The run orchestrator.
//!
//! One orchestrator owns one run: the persisted status machine, the phase
//! pipeline, checkpointing, recovery and cancellation. Status transitions
//! go through [`Orchestrator::transition`], the single place that consults
//! the allowed-transition table; everything else is phase plumbing.

use crate::cancel::CancelToken;
use crate::retry::retry_per_kind;
use crate::service::ApprovalData;
use cartpilot_arbiter::patterns::{default_patterns, PatternSet};
use cartpilot_core::config::CopilotConfig;
use cartpilot_core::error::{CopilotError, ErrorKind, StateError};
use cartpilot_core::port::{
    CacheStore, Clock, EphemeralStore, Interactor, PersistedSession, PreferenceStore, SessionStore,
};
use cartpilot_core::state::{
    CheckpointRecord, PartialResults, RunPhase, RunState, RunStatus, RunStep,
};
use cartpilot_core::types::{
    CartItem, CartSnapshot, DebugLogEntry, DeliverySlot, OrderToMerge, PruneDecision, ReviewPack,
    SubstitutionProposal,
};
use cartpilot_enhancer::Enhancer;
use cartpilot_flow::cart::extract_cart;
use cartpilot_flow::login::probe_login;
use cartpilot_flow::merge::{CartMergeFlowResult, MergeFlow, MergeOptions};
use cartpilot_flow::orders::{load_order_history, pick_orders_to_merge};
use cartpilot_flow::review::{build_review_pack, finalization_gate, ReviewInputs};
use cartpilot_flow::slots::{extract_slots, rank_slots};
use cartpilot_flow::substitution::search_candidates;
use cartpilot_flow::verify::MergeMode;
use cartpilot_registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Everything an orchestrator needs injected.
pub struct OrchestratorDeps<I: Interactor + 'static> {
    /// The page adapter.
    pub interactor: Arc<I>,
    /// Selector registry.
    pub registry: Arc<Registry>,
    /// Run configuration.
    pub config: CopilotConfig,
    /// The enhancement layer (already breaker-guarded).
    pub enhancer: Arc<Enhancer>,
    /// Session persistence.
    pub session_store: Arc<dyn SessionStore>,
    /// Ephemeral session store.
    pub ephemeral: Arc<dyn EphemeralStore>,
    /// Synchronized preferences.
    pub preferences: Arc<dyn PreferenceStore>,
    /// Local order-history cache.
    pub cache: Arc<dyn CacheStore>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Mutable data flowing through the phase pipeline. Recovery seeds it from
/// the checkpoint; each phase fills its slice.
#[derive(Default)]
struct PhaseData {
    orders: Vec<OrderToMerge>,
    sparse_history: bool,
    merge: Option<CartMergeFlowResult>,
    merged_order_ids: Vec<String>,
    before: Option<CartSnapshot>,
    after: Option<CartSnapshot>,
    unavailable: Vec<CartItem>,
    substitutions: Vec<SubstitutionProposal>,
    pruning: Vec<PruneDecision>,
    slots: Vec<DeliverySlot>,
    resume_after_item: Option<String>,
    resume_past_orders: bool,
    degenerate_empty: bool,
}

/// One run's orchestrator.
pub struct Orchestrator<I: Interactor + 'static> {
    session_id: String,
    household_id: Mutex<String>,
    deps: OrchestratorDeps<I>,
    patterns: PatternSet,
    state: Mutex<RunState>,
    checkpoint: Mutex<Option<CheckpointRecord>>,
    review_pack: Mutex<Option<ReviewPack>>,
    approval: Mutex<Option<ApprovalData>>,
    cancel: CancelToken,
}

impl<I: Interactor + 'static> Orchestrator<I> {
    /// A fresh idle orchestrator for a session.
    #[must_use]
    pub fn new(session_id: impl Into<String>, deps: OrchestratorDeps<I>) -> Self {
        let session_id = session_id.into();
        let now = deps.clock.now();
        Self {
            state: Mutex::new(RunState::idle(format!("run-{session_id}"), now)),
            household_id: Mutex::new(String::new()),
            session_id,
            deps,
            patterns: default_patterns(),
            checkpoint: Mutex::new(None),
            review_pack: Mutex::new(None),
            approval: Mutex::new(None),
            cancel: CancelToken::new(),
        }
    }

    /// Rebuild an orchestrator from persisted state, flagging recovery
    /// when a `running` run went stale (no state change for longer than
    /// the configured threshold).
    ///
    /// # Errors
    ///
    /// Corrupted persisted state.
    pub async fn recover(
        session_id: impl Into<String>,
        deps: OrchestratorDeps<I>,
    ) -> Result<Self, CopilotError> {
        let session_id = session_id.into();
        let persisted = deps
            .session_store
            .load(&session_id)
            .await
            .map_err(|e| CopilotError::new(ErrorKind::Corruption, e.to_string()))?;

        let orchestrator = Self::new(session_id, deps);
        if let Some(PersistedSession {
            mut state,
            checkpoint,
            household_id,
        }) = persisted
        {
            let now = orchestrator.deps.clock.now();
            let stale_after = chrono::Duration::milliseconds(
                i64::try_from(orchestrator.deps.config.recovery_stale_after_ms).unwrap_or(30_000),
            );
            if state.status == RunStatus::Running && now - state.updated_at > stale_after {
                state.recovery_needed = true;
                tracing::info!(
                    phase = ?state.phase,
                    step = ?state.step,
                    "stale running session; recovery scheduled"
                );
            }
            *orchestrator.state.lock().await = state;
            *orchestrator.checkpoint.lock().await = checkpoint;
            if let Some(household_id) = household_id {
                *orchestrator.household_id.lock().await = household_id;
            }
        }
        Ok(orchestrator)
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Value copy of the current run state.
    pub async fn state(&self) -> RunState {
        self.state.lock().await.clone()
    }

    /// The review pack, once generated.
    pub async fn review_pack(&self) -> Option<ReviewPack> {
        self.review_pack.lock().await.clone()
    }

    /// Whether the persisted run needs resumption.
    pub async fn recovery_needed(&self) -> bool {
        self.state.lock().await.recovery_needed
    }

    /// The recorded approval, for the audit trail. Present only after
    /// `review → complete`.
    pub async fn approval(&self) -> Option<ApprovalData> {
        self.approval.lock().await.clone()
    }

    // ---- status machine -------------------------------------------------

    /// Apply a status transition through the allowed table.
    async fn transition(&self, to: RunStatus) -> Result<RunState, CopilotError> {
        let snapshot = {
            let mut state = self.state.lock().await;
            if !state.status.can_transition_to(to) {
                return Err(StateError::InvalidTransition {
                    from: state.status,
                    to,
                }
                .into());
            }
            tracing::info!(from = ?state.status, ?to, "run status transition");
            state.status = to;
            self.touch(&mut state);
            state.clone()
        };
        self.persist(&snapshot).await;
        Ok(snapshot)
    }

    fn touch(&self, state: &mut RunState) {
        let now = self.deps.clock.now();
        if now > state.updated_at {
            state.updated_at = now;
        }
    }

    async fn update_state<F: FnOnce(&mut RunState)>(&self, mutate: F) -> RunState {
        let snapshot = {
            let mut state = self.state.lock().await;
            mutate(&mut state);
            self.touch(&mut state);
            state.clone()
        };
        self.persist(&snapshot).await;
        snapshot
    }

    /// Persist state plus the latest checkpoint. Write failures are logged
    /// and never fail the run; the orchestrator continues on memory.
    async fn persist(&self, state: &RunState) {
        let household = self.household_id.lock().await.clone();
        let session = PersistedSession {
            state: state.clone(),
            checkpoint: self.checkpoint.lock().await.clone(),
            household_id: (!household.is_empty()).then_some(household),
        };
        if let Err(err) = self.deps.session_store.save(&self.session_id, &session).await {
            tracing::warn!(error = %err, "checkpoint write failed; continuing in memory");
        }
    }

    async fn write_checkpoint(&self, record: CheckpointRecord) {
        *self.checkpoint.lock().await = Some(record);
        let snapshot = self.state.lock().await.clone();
        self.persist(&snapshot).await;
    }

    async fn debug(&self, message: impl Into<String>) {
        self.deps
            .ephemeral
            .push_debug(DebugLogEntry {
                at: self.deps.clock.now(),
                component: "orchestrator".to_string(),
                message: message.into(),
            })
            .await;
    }

    // ---- control operations --------------------------------------------

    /// Start guard and transition. The caller spawns [`Orchestrator::run`]
    /// after a successful start.
    ///
    /// # Errors
    ///
    /// `InvalidState` when not idle; `NotLoggedIn` when no household
    /// session is active on the page.
    pub async fn start(&self, household_id: impl Into<String>) -> Result<RunState, CopilotError> {
        {
            let state = self.state.lock().await;
            if state.status != RunStatus::Idle {
                return Err(CopilotError::new(
                    ErrorKind::InvalidTransition,
                    format!("start rejected in status {:?}", state.status),
                ));
            }
        }

        let login = probe_login(self.deps.interactor.as_ref(), &self.deps.registry).await?;
        if !login.is_logged_in {
            return Err(CopilotError::new(
                ErrorKind::NotLoggedIn,
                "no household session on the retailer site",
            ));
        }

        *self.household_id.lock().await = household_id.into();
        self.cancel.reset();
        let now = self.deps.clock.now();
        self.update_state(|state| {
            state.started_at = Some(now);
            state.phase = RunPhase::Initializing;
            state.step = None;
            state.error = None;
            state.recovery_needed = false;
        })
        .await;
        self.transition(RunStatus::Running).await
    }

    /// Approve the review pack: `review → complete`. Records intent only;
    /// no order is placed, here or anywhere else.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside review.
    pub async fn approve(&self, approval: ApprovalData) -> Result<RunState, CopilotError> {
        {
            let state = self.state.lock().await;
            if state.status != RunStatus::Review {
                return Err(CopilotError::new(
                    ErrorKind::InvalidTransition,
                    format!("approve rejected in status {:?}", state.status),
                ));
            }
        }
        *self.approval.lock().await = Some(approval);
        self.debug("review pack approved by user").await;
        self.transition(RunStatus::Complete).await
    }

    /// Cancel the run. Idempotent; a running run pauses with a
    /// user-cancelled error at its next suspension point (and immediately
    /// in the persisted state).
    pub async fn cancel_run(&self) -> RunState {
        self.cancel.cancel();
        let status = self.state.lock().await.status;
        match status {
            RunStatus::Running => {
                let _ = self
                    .pause_with(CopilotError::new(ErrorKind::Cancelled, "USER_CANCELLED"))
                    .await;
            },
            RunStatus::Review => {
                // Discarding an unapproved review pack returns to idle.
                let _ = self.transition(RunStatus::Idle).await;
            },
            RunStatus::Idle | RunStatus::Paused | RunStatus::Complete => {},
        }
        self.state().await
    }

    /// Resume a paused run. The retry guard requires the recorded error to
    /// be recoverable and fewer than three consecutive failures; a
    /// user-cancelled pause always resumes.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside paused; guard rejection otherwise.
    pub async fn resume(&self) -> Result<RunState, CopilotError> {
        {
            let state = self.state.lock().await;
            if state.status != RunStatus::Paused {
                return Err(CopilotError::new(
                    ErrorKind::InvalidTransition,
                    format!("resume rejected in status {:?}", state.status),
                ));
            }
            if let Some(error) = &state.error {
                let user_cancelled = error.kind == ErrorKind::Cancelled;
                if !user_cancelled && (!error.recoverable() || state.error_count >= 3) {
                    return Err(StateError::GuardRejected(format!(
                        "error {:?} with {} consecutive failures",
                        error.kind, state.error_count
                    ))
                    .into());
                }
            }
        }
        self.cancel.reset();
        self.update_state(|state| {
            state.error = None;
            state.recovery_needed = true;
        })
        .await;
        self.transition(RunStatus::Running).await
    }

    async fn pause_with(&self, error: CopilotError) -> Result<RunState, CopilotError> {
        tracing::warn!(kind = ?error.kind, message = %error.message, "run paused");
        self.debug(format!("paused: {error}")).await;
        // Best-effort diagnostics; a failed screenshot never fails a run.
        match self.deps.interactor.screenshot("run-paused").await {
            Ok(id) => tracing::debug!(screenshot = %id, "diagnostic screenshot captured"),
            Err(err) => tracing::debug!(error = %err, "diagnostic screenshot failed"),
        }
        {
            let mut state = self.state.lock().await;
            state.error = Some(error);
            state.error_count += 1;
        }
        self.transition(RunStatus::Paused).await
    }

    // ---- the run task ---------------------------------------------------

    /// Execute the phase pipeline to its terminal status. Spawned by the
    /// session manager after `start` (or after recovery).
    pub async fn run(self: Arc<Self>) {
        let heartbeat = self.spawn_heartbeat();

        let outcome = tokio::select! {
            result = self.try_run() => result,
            () = self.cancel.cancelled() => {
                Err(CopilotError::new(ErrorKind::Cancelled, "USER_CANCELLED"))
            },
        };

        let _ = heartbeat.send(true);

        match outcome {
            Ok(()) => {},
            Err(error) => {
                // The cancel path may already have paused the run.
                let already_paused = self.state.lock().await.status == RunStatus::Paused;
                if !already_paused {
                    let _ = self.pause_with(error).await;
                }
            },
        }
    }

    fn spawn_heartbeat(self: &Arc<Self>) -> watch::Sender<bool> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let orchestrator = Arc::clone(self);
        let period = Duration::from_millis(orchestrator.deps.config.timeouts.heartbeat_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    },
                    () = tokio::time::sleep(period) => {
                        let snapshot = orchestrator.update_state(|_| {}).await;
                        tracing::debug!(run_id = %snapshot.run_id, "keep-alive tick");
                    },
                }
            }
        });
        stop_tx
    }

    async fn try_run(&self) -> Result<(), CopilotError> {
        let (start_phase, mut data) = self.resume_point().await;
        if start_phase != RunPhase::Initializing {
            tracing::info!(?start_phase, "resuming from checkpoint");
        }

        for phase in RunPhase::SEQUENCE {
            if phase.index() < start_phase.index() {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(CopilotError::new(ErrorKind::Cancelled, "USER_CANCELLED"));
            }
            self.run_phase(phase, &mut data).await?;
            // Phase success resets the consecutive-failure counter.
            self.update_state(|state| state.error_count = 0).await;
            if data.degenerate_empty {
                break;
            }
        }

        if data.degenerate_empty {
            // Nothing to do at all: the one direct running -> complete path.
            self.transition(RunStatus::Complete).await?;
            return Ok(());
        }

        self.transition(RunStatus::Review).await?;
        Ok(())
    }

    /// Where to resume, and with what seed data, per the recovery table.
    async fn resume_point(&self) -> (RunPhase, PhaseData) {
        let state = self.state.lock().await.clone();
        let mut data = PhaseData::default();
        if !state.recovery_needed {
            return (RunPhase::Initializing, data);
        }

        let Some(checkpoint) = self.checkpoint.lock().await.clone() else {
            return (RunPhase::Initializing, data);
        };

        let partial = checkpoint.partial_results;
        if let Some(orders) = partial.orders_loaded {
            data.orders = orders;
        }
        if let Some(items) = partial.cart_items {
            data.after = Some(CartSnapshot::new(self.deps.clock.now(), items));
        }
        if let Some(unavailable) = partial.unavailable_items {
            data.unavailable = unavailable;
        }
        if let Some(substitutes) = partial.substitutes {
            data.substitutions = substitutes;
        }
        if let Some(slots) = partial.slots {
            data.slots = slots;
        }
        data.resume_after_item = checkpoint.last_successful_item;

        let phase = match checkpoint.phase {
            RunPhase::Initializing => RunPhase::Initializing,
            RunPhase::Cart => {
                if data.orders.is_empty() {
                    RunPhase::Initializing
                } else {
                    data.resume_past_orders = data.resume_after_item.is_some();
                    RunPhase::Cart
                }
            },
            RunPhase::Substitution => {
                if data.after.is_none() {
                    RunPhase::Cart
                } else {
                    RunPhase::Substitution
                }
            },
            RunPhase::Slots | RunPhase::Finalizing if data.after.is_none() => RunPhase::Cart,
            other => other,
        };
        (phase, data)
    }

    async fn enter_phase(&self, phase: RunPhase, step: Option<RunStep>) {
        self.update_state(|state| {
            state.phase = phase;
            state.step = step;
        })
        .await;
        metrics::counter!("cartpilot_phase_entered_total", "phase" => format!("{phase:?}"))
            .increment(1);
    }

    async fn run_phase(&self, phase: RunPhase, data: &mut PhaseData) -> Result<(), CopilotError> {
        match phase {
            RunPhase::Initializing => self.phase_initializing(data).await,
            RunPhase::Cart => self.phase_cart(data).await,
            RunPhase::Substitution => self.phase_substitution(data).await,
            RunPhase::Slots => self.phase_slots(data).await,
            RunPhase::Finalizing => self.phase_finalizing(data).await,
        }
    }

    // ---- phases ---------------------------------------------------------

    async fn phase_initializing(&self, data: &mut PhaseData) -> Result<(), CopilotError> {
        self.enter_phase(RunPhase::Initializing, Some(RunStep::LoadingOrders))
            .await;

        let login = probe_login(self.deps.interactor.as_ref(), &self.deps.registry).await?;
        if !login.is_logged_in {
            return Err(CopilotError::new(
                ErrorKind::SessionExpired,
                "household session disappeared mid-run",
            ));
        }

        let household_id = self.household_id.lock().await.clone();
        let now = self.deps.clock.now();
        let orders = retry_per_kind("load-order-history", || {
            load_order_history(
                self.deps.interactor.as_ref(),
                &self.deps.registry,
                &self.deps.config,
                self.deps.cache.as_ref(),
                &household_id,
                now,
            )
        })
        .await?;

        let picked = pick_orders_to_merge(&orders, self.deps.config.max_orders_to_merge);
        data.sparse_history = picked.len() < self.deps.config.max_orders_to_merge;
        data.orders = picked;

        let orders_total = u32::try_from(data.orders.len()).unwrap_or(u32::MAX);
        self.update_state(|state| {
            state.progress.orders_loaded = orders_total;
            state.progress.orders_total = orders_total;
        })
        .await;

        self.write_checkpoint(CheckpointRecord {
            phase: RunPhase::Cart,
            step: None,
            last_successful_item: None,
            partial_results: PartialResults {
                orders_loaded: Some(data.orders.clone()),
                ..PartialResults::default()
            },
            timestamp: self.deps.clock.now(),
        })
        .await;

        if data.orders.is_empty() {
            tracing::info!("no orders to merge; degenerate empty pipeline");
            data.degenerate_empty = true;
        }
        Ok(())
    }

    async fn phase_cart(&self, data: &mut PhaseData) -> Result<(), CopilotError> {
        self.enter_phase(RunPhase::Cart, Some(RunStep::MergingOrders))
            .await;

        let now = self.deps.clock.now();
        if data.before.is_none() {
            let before = retry_per_kind("extract-cart-before", || {
                extract_cart(
                    self.deps.interactor.as_ref(),
                    &self.deps.registry,
                    &self.deps.config,
                    now,
                )
            })
            .await?;
            data.before = Some(before);
        }

        // On resume, skip orders already merged and keep merge mode for
        // the remainder: the first order's replace must not repeat.
        let mut orders: Vec<OrderToMerge> = data.orders.clone();
        orders.sort_by_key(|o| o.date);
        let mut first_mode = MergeMode::Replace;
        if data.resume_past_orders {
            if let Some(last) = &data.resume_after_item {
                if let Some(pos) = orders.iter().position(|o| &o.order_id == last) {
                    orders.drain(..=pos);
                    first_mode = MergeMode::Merge;
                }
            }
        }

        let (progress_tx, mut progress_rx) =
            tokio::sync::mpsc::unbounded_channel::<cartpilot_flow::merge::OrderMergeResult>();
        let checkpoint_task = {
            let session_store = Arc::clone(&self.deps.session_store);
            let session_id = self.session_id.clone();
            let checkpoint = self.checkpoint.lock().await.clone();
            let state = self.state.lock().await.clone();
            let household = self.household_id.lock().await.clone();
            let clock_now = self.deps.clock.now();
            tokio::spawn(async move {
                let mut merged = Vec::new();
                while let Some(result) = progress_rx.recv().await {
                    if result.success {
                        merged.push(result.order_id.clone());
                    }
                    let record = CheckpointRecord {
                        phase: RunPhase::Cart,
                        step: Some(RunStep::MergingOrders),
                        last_successful_item: merged.last().cloned(),
                        partial_results: checkpoint
                            .as_ref()
                            .map(|c| c.partial_results.clone())
                            .unwrap_or_default(),
                        timestamp: clock_now,
                    };
                    let session = PersistedSession {
                        state: state.clone(),
                        checkpoint: Some(record),
                        household_id: (!household.is_empty()).then(|| household.clone()),
                    };
                    if let Err(err) = session_store.save(&session_id, &session).await {
                        tracing::warn!(error = %err, "mid-merge checkpoint write failed");
                    }
                }
                merged
            })
        };

        let flow = MergeFlow::new(
            Arc::clone(&self.deps.interactor),
            Arc::clone(&self.deps.registry),
            self.patterns.clone(),
            self.deps.config.clone(),
        );
        let merge_result = flow
            .run_with(
                orders,
                MergeOptions {
                    first_mode,
                    progress: Some(progress_tx),
                },
            )
            .await;

        let merged_ids = checkpoint_task.await.unwrap_or_default();
        data.merged_order_ids = merged_ids;

        let after = retry_per_kind("extract-cart-after", || {
            extract_cart(
                self.deps.interactor.as_ref(),
                &self.deps.registry,
                &self.deps.config,
                self.deps.clock.now(),
            )
        })
        .await?;

        data.unavailable = after.items.iter().filter(|i| !i.available).cloned().collect();

        let items_total = after.item_count;
        let unavailable_count = u32::try_from(data.unavailable.len()).unwrap_or(u32::MAX);
        self.update_state(|state| {
            state.progress.items_processed = items_total;
            state.progress.items_total = items_total;
            state.progress.unavailable_items = unavailable_count;
        })
        .await;

        self.write_checkpoint(CheckpointRecord {
            phase: RunPhase::Substitution,
            step: None,
            last_successful_item: None,
            partial_results: PartialResults {
                orders_loaded: Some(data.orders.clone()),
                cart_items: Some(after.items.clone()),
                unavailable_items: Some(data.unavailable.clone()),
                ..PartialResults::default()
            },
            timestamp: self.deps.clock.now(),
        })
        .await;

        data.after = Some(after);
        data.merge = Some(merge_result);
        Ok(())
    }

    async fn phase_substitution(&self, data: &mut PhaseData) -> Result<(), CopilotError> {
        self.enter_phase(RunPhase::Substitution, Some(RunStep::ProposingSubstitutes))
            .await;

        // Resume over the tail after the last fully-processed item.
        let mut pending: Vec<CartItem> = data.unavailable.clone();
        if let Some(last) = &data.resume_after_item {
            if let Some(pos) = pending.iter().position(|i| i.diff_key() == last) {
                pending.drain(..=pos);
            }
        }

        for item in pending {
            if self.cancel.is_cancelled() {
                return Err(CopilotError::new(ErrorKind::Cancelled, "USER_CANCELLED"));
            }

            let queries = self.deps.enhancer.substitution_queries(&item.name).await;
            let mut candidates = Vec::new();
            for query in &queries {
                match search_candidates(
                    self.deps.interactor.as_ref(),
                    &self.deps.registry,
                    &self.deps.config,
                    query,
                )
                .await
                {
                    Ok(mut found) => candidates.append(&mut found),
                    Err(err) => {
                        tracing::debug!(query, error = %err, "substitute search failed");
                    },
                }
                if candidates.len() >= self.deps.config.max_substitutes_per_item * 2 {
                    break;
                }
            }
            let mut seen = std::collections::HashSet::new();
            candidates.retain(|c| seen.insert(c.name.clone()));

            let mut ranked = self.deps.enhancer.rank_candidates(&item, candidates).await;
            ranked.truncate(self.deps.config.max_substitutes_per_item);

            data.substitutions.push(SubstitutionProposal {
                original: item.clone(),
                candidates: ranked,
                queries_used: queries,
            });

            let proposed = u32::try_from(data.substitutions.len()).unwrap_or(u32::MAX);
            self.update_state(|state| state.progress.substitutes_proposed = proposed)
                .await;
            self.write_checkpoint(CheckpointRecord {
                phase: RunPhase::Substitution,
                step: Some(RunStep::ProposingSubstitutes),
                last_successful_item: Some(item.diff_key().to_string()),
                partial_results: PartialResults {
                    orders_loaded: Some(data.orders.clone()),
                    cart_items: data.after.as_ref().map(|a| a.items.clone()),
                    unavailable_items: Some(data.unavailable.clone()),
                    substitutes: Some(data.substitutions.clone()),
                    ..PartialResults::default()
                },
                timestamp: self.deps.clock.now(),
            })
            .await;
        }

        data.resume_after_item = None;
        Ok(())
    }

    async fn phase_slots(&self, data: &mut PhaseData) -> Result<(), CopilotError> {
        self.enter_phase(RunPhase::Slots, Some(RunStep::ExtractingSlots))
            .await;

        // Extraction is idempotent; a recovery simply re-reads the grid.
        let slots = retry_per_kind("extract-slots", || {
            extract_slots(
                self.deps.interactor.as_ref(),
                &self.deps.registry,
                &self.deps.config,
            )
        })
        .await?;

        let preferences = self.deps.preferences.slot_preferences().await.unwrap_or_default();
        data.slots = rank_slots(slots, &preferences, self.deps.clock.now());

        let found = u32::try_from(data.slots.len()).unwrap_or(u32::MAX);
        self.update_state(|state| state.progress.slots_found = found)
            .await;

        self.write_checkpoint(CheckpointRecord {
            phase: RunPhase::Finalizing,
            step: None,
            last_successful_item: None,
            partial_results: PartialResults {
                orders_loaded: Some(data.orders.clone()),
                cart_items: data.after.as_ref().map(|a| a.items.clone()),
                unavailable_items: Some(data.unavailable.clone()),
                substitutes: Some(data.substitutions.clone()),
                slots: Some(data.slots.clone()),
            },
            timestamp: self.deps.clock.now(),
        })
        .await;
        Ok(())
    }

    async fn phase_finalizing(&self, data: &mut PhaseData) -> Result<(), CopilotError> {
        self.enter_phase(RunPhase::Finalizing, Some(RunStep::GeneratingReview))
            .await;

        let now = self.deps.clock.now();
        if !data.merged_order_ids.is_empty() {
            self.debug(format!("orders merged: {}", data.merged_order_ids.join(", ")))
                .await;
        }
        let after = data
            .after
            .clone()
            .unwrap_or_else(|| CartSnapshot::empty(now));
        let before = data
            .before
            .clone()
            .unwrap_or_else(|| CartSnapshot::empty(now));
        let merge_results = data
            .merge
            .as_ref()
            .map(|m| m.orders.clone())
            .unwrap_or_default();

        finalization_gate(after.item_count, &merge_results)?;

        // Pantry pruning: recency is approximated by the newest source
        // order; the heuristic keeps anything it is unsure about.
        let newest_order = data.orders.iter().map(|o| o.date).max();
        let days_since_last = newest_order.map(|d| (now - d).num_days());
        for item in &after.items {
            let decision = self.deps.enhancer.prune_decision(item, days_since_last).await;
            data.pruning.push(decision);
        }

        let degraded_pages: Vec<String> = self
            .deps
            .registry
            .page_ids()
            .filter(|page_id| {
                self.deps.registry.page(page_id).is_ok_and(|entry| {
                    entry.last_validation.as_ref().is_some_and(|v| {
                        v.status != cartpilot_core::selector::ValidationStatus::Valid
                    })
                })
            })
            .map(str::to_string)
            .collect();

        let pack = build_review_pack(
            now,
            ReviewInputs {
                session_id: self.session_id.clone(),
                household_id: self.household_id.lock().await.clone(),
                before,
                after,
                merge_results,
                substitutions: (!data.substitutions.is_empty())
                    .then(|| data.substitutions.clone()),
                pruning: (!data.pruning.is_empty()).then(|| data.pruning.clone()),
                slots: (!data.slots.is_empty()).then(|| data.slots.clone()),
                degraded_pages,
                sparse_history: data.sparse_history,
            },
        );

        *self.review_pack.lock().await = Some(pack);
        self.update_state(|state| state.recovery_needed = false).await;
        self.debug("review pack generated").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartpilot_enhancer::EnhancerOptions;
    use cartpilot_core::port::SystemClock;
    use cartpilot_registry::Registry;
    use cartpilot_testing::mocks::MockInteractor;
    use cartpilot_testing::stores::{
        MemoryCacheStore, MemoryEphemeralStore, MemoryPreferenceStore, MemorySessionStore,
    };
    use cartpilot_testing::ScriptedLlm;

    #[allow(clippy::expect_used)] // Test code
    fn orchestrator_with(page: Arc<MockInteractor>) -> Orchestrator<MockInteractor> {
        Orchestrator::new(
            "sess-unit",
            OrchestratorDeps {
                interactor: page,
                registry: Arc::new(Registry::bundled().expect("bundled registry parses")),
                config: CopilotConfig::default(),
                enhancer: Arc::new(cartpilot_enhancer::Enhancer::new(
                    Arc::new(ScriptedLlm::unavailable()),
                    EnhancerOptions::default(),
                )),
                session_store: Arc::new(MemorySessionStore::new()),
                ephemeral: Arc::new(MemoryEphemeralStore::new()),
                preferences: Arc::new(MemoryPreferenceStore::new()),
                cache: Arc::new(MemoryCacheStore::new()),
                clock: Arc::new(SystemClock),
            },
        )
    }

    fn logged_in_page() -> Arc<MockInteractor> {
        let page = Arc::new(MockInteractor::new());
        page.add_element("[data-testid='account-menu']", "A minha conta");
        page
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Test code
    async fn error_count_reaches_three_then_resume_is_refused() {
        let orchestrator = orchestrator_with(logged_in_page());
        orchestrator.start("h-1").await.expect("start");

        for expected_count in 1..=3u32 {
            let state = orchestrator
                .pause_with(CopilotError::new(ErrorKind::Timeout, "slow store"))
                .await
                .expect("pause");
            assert_eq!(state.error_count, expected_count);
            if expected_count < 3 {
                orchestrator.resume().await.expect("resume within budget");
            }
        }

        // Recoverable error, but the third consecutive failure exhausts
        // the retry guard.
        let refused = orchestrator.resume().await;
        assert!(refused.is_err_and(|e| e.kind == ErrorKind::InvalidTransition));
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Test code
    async fn non_recoverable_pauses_cannot_resume() {
        let orchestrator = orchestrator_with(logged_in_page());
        orchestrator.start("h-1").await.expect("start");
        orchestrator
            .pause_with(CopilotError::new(ErrorKind::PageChanged, "layout moved"))
            .await
            .expect("pause");

        let refused = orchestrator.resume().await;
        assert!(refused.is_err());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Test code
    async fn user_cancelled_pause_always_resumes() {
        let orchestrator = orchestrator_with(logged_in_page());
        orchestrator.start("h-1").await.expect("start");
        let state = orchestrator.cancel_run().await;
        assert_eq!(state.status, RunStatus::Paused);

        let resumed = orchestrator.resume().await;
        assert!(resumed.is_ok_and(|s| s.status == RunStatus::Running));
    }

    #[tokio::test]
    async fn transitions_outside_the_table_are_invalid() {
        let orchestrator = orchestrator_with(logged_in_page());
        // idle -> review is not in the table.
        let result = orchestrator.transition(RunStatus::Review).await;
        assert!(result.is_err_and(|e| e.kind == ErrorKind::InvalidTransition));
        // idle -> complete is not in the table either.
        let result = orchestrator.transition(RunStatus::Complete).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Test code
    async fn updated_at_is_monotone_across_state_writes() {
        let orchestrator = orchestrator_with(logged_in_page());
        orchestrator.start("h-1").await.expect("start");
        let first = orchestrator.state().await.updated_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = orchestrator.update_state(|_| {}).await.updated_at;
        assert!(second >= first);
    }
}
