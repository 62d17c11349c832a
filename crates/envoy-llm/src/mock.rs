use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use envoy_core::completion::CompletionService;
use envoy_core::errors::CompletionError;

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Text(String),
    Error(CompletionError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Completion service that returns scripted responses in order and records
/// every `(system_prompt, user_text)` pair it was called with.
#[derive(Default)]
pub struct MockCompletion {
    responses: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<(String, String)>>,
    call_count: AtomicUsize,
}

impl MockCompletion {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Convenience: every response is plain text.
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(MockResponse::text).collect())
    }

    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<String, CompletionError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls
            .lock()
            .push((system_prompt.to_string(), user_text.to_string()));

        let Some(mut current) = self.responses.lock().pop_front() else {
            return Err(CompletionError::InvalidRequest(format!(
                "MockCompletion: no response configured for call {idx}"
            )));
        };

        // Nested delays are unrolled iteratively
        loop {
            match current {
                MockResponse::Text(text) => return Ok(text),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}
