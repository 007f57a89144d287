//! Run state machine types and checkpoints.
//!
//! [`RunStatus`] and [`RunPhase`] are tagged enums so every consumer is
//! forced into exhaustive handling. The allowed transition table lives on
//! [`RunStatus::allowed_transitions`] and is the single authority; the
//! orchestrator rejects anything else with `STATE_INVALID_TRANSITION`.

use crate::error::CopilotError;
use crate::types::{CartItem, DeliverySlot, OrderToMerge, SubstitutionProposal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level run status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run in progress.
    #[default]
    Idle,
    /// A run is executing phases.
    Running,
    /// A run stopped on an error or user cancellation; resumable.
    Paused,
    /// The review pack is ready and awaiting explicit approval.
    Review,
    /// The run finished after approval.
    Complete,
}

impl RunStatus {
    /// The authoritative transition table.
    ///
    /// `running → complete` is permitted only for the degenerate empty
    /// pipeline; the normal path goes through `review`.
    #[must_use]
    pub const fn allowed_transitions(self) -> &'static [RunStatus] {
        match self {
            Self::Idle => &[RunStatus::Running],
            Self::Running => &[RunStatus::Paused, RunStatus::Review, RunStatus::Complete],
            Self::Paused => &[RunStatus::Running, RunStatus::Idle],
            Self::Review => &[RunStatus::Complete, RunStatus::Idle],
            Self::Complete => &[RunStatus::Idle],
        }
    }

    /// Whether `self → next` is an allowed transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

/// Sub-phase within a running run, in execution order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Login check, registry load, order-history fetch.
    #[default]
    Initializing,
    /// Cart-merge flow over the selected orders.
    Cart,
    /// Substitute search for unavailable items.
    Substitution,
    /// Delivery-slot extraction and ranking.
    Slots,
    /// Diff, confidence, warnings, review pack assembly.
    Finalizing,
}

impl RunPhase {
    /// All phases in execution order.
    pub const SEQUENCE: [Self; 5] = [
        Self::Initializing,
        Self::Cart,
        Self::Substitution,
        Self::Slots,
        Self::Finalizing,
    ];

    /// Position in the execution order.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Initializing => 0,
            Self::Cart => 1,
            Self::Substitution => 2,
            Self::Slots => 3,
            Self::Finalizing => 4,
        }
    }

    /// The phase that follows this one, or `None` after finalizing.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Initializing => Some(Self::Cart),
            Self::Cart => Some(Self::Substitution),
            Self::Substitution => Some(Self::Slots),
            Self::Slots => Some(Self::Finalizing),
            Self::Finalizing => None,
        }
    }
}

/// Finer-grained step inside a phase, recorded for recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStep {
    /// Scraping the order history list.
    LoadingOrders,
    /// Driving the reorder-and-merge loop.
    MergingOrders,
    /// Searching and ranking substitutes.
    ProposingSubstitutes,
    /// Reading the slot grid.
    ExtractingSlots,
    /// Assembling the review pack.
    GeneratingReview,
}

/// Progress counters shown to the polling client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Orders fetched so far.
    pub orders_loaded: u32,
    /// Orders selected for the run.
    pub orders_total: u32,
    /// Items processed across phases.
    pub items_processed: u32,
    /// Items expected.
    pub items_total: u32,
    /// Unavailable items found during the cart phase.
    pub unavailable_items: u32,
    /// Substitute proposals produced.
    pub substitutes_proposed: u32,
    /// Delivery slots found.
    pub slots_found: u32,
}

/// The full run state owned by the orchestrator.
///
/// Readers receive value copies; all writes go through the orchestrator's
/// single serializer. `updated_at` is monotone non-decreasing within a run,
/// and `error_count` resets on phase success.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Run identifier, unique per started run.
    pub run_id: String,
    /// Top-level status.
    pub status: RunStatus,
    /// Current (or last) sub-phase.
    pub phase: RunPhase,
    /// Finer step, when meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<RunStep>,
    /// Progress counters.
    pub progress: RunProgress,
    /// Last error, if the run is paused on one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CopilotError>,
    /// Consecutive failures in the current phase.
    pub error_count: u32,
    /// When the run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Last state-change instant.
    pub updated_at: DateTime<Utc>,
    /// Driving tab/page identifier, when attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    /// Set on wake when the persisted run looks abandoned.
    pub recovery_needed: bool,
}

impl RunState {
    /// A fresh idle state for a new session.
    #[must_use]
    pub fn idle(run_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Idle,
            phase: RunPhase::Initializing,
            step: None,
            progress: RunProgress::default(),
            error: None,
            error_count: 0,
            started_at: None,
            updated_at: now,
            tab_id: None,
            recovery_needed: false,
        }
    }
}

/// Partial results carried by a checkpoint so an interrupted phase can
/// resume mid-stream instead of restarting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialResults {
    /// Orders fetched before the interruption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders_loaded: Option<Vec<OrderToMerge>>,
    /// Cart items extracted so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_items: Option<Vec<CartItem>>,
    /// Unavailable items pending substitution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_items: Option<Vec<CartItem>>,
    /// Substitution proposals produced so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitutes: Option<Vec<SubstitutionProposal>>,
    /// Slots extracted so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<DeliverySlot>>,
}

/// Persisted on every state change alongside the run state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Phase at checkpoint time.
    pub phase: RunPhase,
    /// Step at checkpoint time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<RunStep>,
    /// Key of the last item fully processed, for tail resumption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_item: Option<String>,
    /// Partial phase output.
    #[serde(default)]
    pub partial_results: PartialResults,
    /// Checkpoint instant.
    pub timestamp: DateTime<Utc>,
}

impl CheckpointRecord {
    /// A bare checkpoint for a phase boundary.
    #[must_use]
    pub fn at_phase(phase: RunPhase, timestamp: DateTime<Utc>) -> Self {
        Self {
            phase,
            step: None,
            last_successful_item: None,
            partial_results: PartialResults::default(),
            timestamp,
        }
    }
}
