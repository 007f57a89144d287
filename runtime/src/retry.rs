//! Table-driven retry around orchestrator operations.
//!
//! The retry tables live on the error taxonomy itself
//! ([`cartpilot_core::error::ErrorKind::retry_strategy`]); this module
//! executes them. Delays get ±20% jitter so several recovering sessions do
//! not hammer the retailer in lockstep.

use cartpilot_core::error::CopilotError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

const JITTER_FRACTION: f64 = 0.2;

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn with_jitter(delay_ms: u64) -> Duration {
    let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let jittered = (delay_ms as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(jittered)
}

/// Run an operation under its error-kind's retry table.
///
/// Recoverable errors retry per their strategy; non-recoverable errors and
/// exhausted strategies surface immediately to the orchestrator, which
/// pauses the run.
///
/// # Errors
///
/// The final error once retries are exhausted or the error is not
/// retryable.
pub async fn retry_per_kind<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, CopilotError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CopilotError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(op = op_name, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            },
            Err(error) => {
                let delay = error
                    .recoverable()
                    .then(|| error.retry_strategy().delay_ms(attempt))
                    .flatten();
                match delay {
                    Some(delay_ms) => {
                        tracing::warn!(
                            op = op_name,
                            attempt,
                            delay_ms,
                            error = %error,
                            "operation failed, retrying"
                        );
                        metrics::counter!("cartpilot_retries_total").increment(1);
                        tokio::time::sleep(with_jitter(delay_ms)).await;
                        attempt += 1;
                    },
                    None => {
                        tracing::error!(
                            op = op_name,
                            attempt,
                            error = %error,
                            "operation failed terminally"
                        );
                        return Err(error);
                    },
                }
            },
        }
    }
}
