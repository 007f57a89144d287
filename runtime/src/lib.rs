//! # Cartpilot Runtime
//!
//! The orchestration substrate: a persisted phase state machine with
//! recovery across restarts, table-driven retry, a circuit breaker on the
//! LLM port, session-scoped storage with atomic writes, and the protocol
//! router behind the control plane.
//!
//! One [`orchestrator::Orchestrator`] owns one run. All state writes go
//! through its single serializer; readers get value copies. The
//! [`sessions::SessionManager`] enforces one run per session id and backs
//! the [`service::SessionService`] consumed by `cartpilot-web`.
//!
//! There is no checkout state anywhere in this machine: the terminal
//! automated state is `review`, and `review → complete` happens only on an
//! explicit approval message.

pub mod breaker;
pub mod cancel;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod router;
pub mod service;
pub mod sessions;
pub mod store;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, GuardedLlm};
pub use cancel::CancelToken;
pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use service::{ApprovalData, SessionService, SessionView, StartRequest};
pub use sessions::SessionManager;
pub use store::FileSessionStore;
