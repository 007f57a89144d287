//! Scripted LLM port for tests.

use async_trait::async_trait;
use cartpilot_core::error::LlmError;
use cartpilot_core::port::{ChatMessage, Completion, CompletionOptions, LlmPort, TokenUsage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An [`LlmPort`] that replays canned results.
///
/// Defaults to unavailable, which exercises the heuristic-only paths the
/// enhancer must always support. Tests that want LLM answers push
/// responses and flip availability on.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    available: AtomicBool,
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
    last_error: Mutex<Option<LlmError>>,
}

impl ScriptedLlm {
    /// An unavailable port; every caller must fall back to heuristics.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// An available port that answers with the given texts in order.
    #[must_use]
    pub fn with_responses(responses: Vec<&str>) -> Self {
        let llm = Self::default();
        llm.available.store(true, Ordering::SeqCst);
        *Self::lock(&llm.responses) = responses
            .into_iter()
            .map(|s| Ok(s.to_string()))
            .collect();
        llm
    }

    /// An available port that fails every call with the given error.
    #[must_use]
    pub fn failing_with(error: LlmError) -> Self {
        let llm = Self::default();
        llm.available.store(true, Ordering::SeqCst);
        *Self::lock(&llm.responses) = std::iter::repeat_with(|| Err(error.clone()))
            .take(16)
            .collect();
        llm
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How many completions were attempted.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            let err = LlmError::ApiKeyMissing;
            *Self::lock(&self.last_error) = Some(err.clone());
            return Err(err);
        }
        let next = Self::lock(&self.responses).pop_front();
        match next {
            Some(Ok(content)) => Ok(Completion {
                content,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 10,
                },
                model: opts.model.clone(),
                stop_reason: Some("end_turn".to_string()),
            }),
            Some(Err(err)) => {
                *Self::lock(&self.last_error) = Some(err.clone());
                Err(err)
            },
            None => {
                let err = LlmError::InvalidResponse("script exhausted".to_string());
                *Self::lock(&self.last_error) = Some(err.clone());
                Err(err)
            },
        }
    }

    async fn set_api_key(&self, _key: String) {
        self.available.store(true, Ordering::SeqCst);
    }

    async fn clear_api_key(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    async fn last_error(&self) -> Option<LlmError> {
        Self::lock(&self.last_error).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_port_rejects_calls() {
        let llm = ScriptedLlm::unavailable();
        assert!(!llm.is_available().await);
        let result = llm
            .complete(&[ChatMessage::user("hi")], &CompletionOptions::default())
            .await;
        assert!(matches!(result, Err(LlmError::ApiKeyMissing)));
    }

    #[tokio::test]
    async fn scripted_responses_replay_in_order() {
        let llm = ScriptedLlm::with_responses(vec!["first", "second"]);
        let opts = CompletionOptions::default();
        let first = llm.complete(&[ChatMessage::user("a")], &opts).await;
        assert!(first.is_ok_and(|c| c.content == "first"));
        let second = llm.complete(&[ChatMessage::user("b")], &opts).await;
        assert!(second.is_ok_and(|c| c.content == "second"));
        assert_eq!(llm.call_count(), 2);
    }
}
