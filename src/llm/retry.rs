use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ChatMessage, ChunkReceiver, LlmClient};
use crate::errors::LlmError;

/// Bounded backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Delay before retry `n` (1-based). The last entry repeats.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_secs(max_attempts: u32, backoff_secs: &[u64]) -> Self {
        Self::new(
            max_attempts,
            backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        )
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempt.saturating_sub(1) as usize).min(self.backoff.len() - 1);
        self.backoff[index]
    }
}

/// Retries transient provider failures; everything else propagates at once.
pub struct RetryingLlmClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: LlmClient> RetryingLlmClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, LlmError>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    debug!(
                        provider = self.inner.name(),
                        error = %e,
                        "LLM call failed, retry {}/{} after {:?}",
                        attempt,
                        self.policy.max_attempts - 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(
                            provider = self.inner.name(),
                            attempts = attempt,
                            error = %e,
                            "LLM retries exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingLlmClient<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, system: &str, history: &[ChatMessage]) -> Result<String, LlmError> {
        self.with_retry(|| self.inner.complete(system, history)).await
    }

    /// Retries only while opening the stream; a stream that breaks midway is
    /// not restarted.
    async fn stream(
        &self,
        system: &str,
        history: &[ChatMessage],
    ) -> Result<ChunkReceiver, LlmError> {
        self.with_retry(|| self.inner.stream(system, history)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _system: &str, _history: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("default".to_string()))
        }
    }

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, vec![Duration::ZERO])
    }

    fn history() -> Vec<ChatMessage> {
        vec![ChatMessage::new(Role::User, "hi")]
    }

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(5));
        assert_eq!(policy.delay_after(3), Duration::from_secs(10));
        assert_eq!(policy.delay_after(9), Duration::from_secs(10));
        assert_eq!(RetryPolicy::new(0, vec![]).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let client = RetryingLlmClient::new(
            Scripted::new(vec![
                Err(LlmError::RateLimited),
                Err(LlmError::Overloaded),
                Ok("done".to_string()),
            ]),
            instant(3),
        );
        assert_eq!(client.complete("", &history()).await.unwrap(), "done");
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let client = RetryingLlmClient::new(
            Scripted::new(vec![
                Err(LlmError::Timeout),
                Err(LlmError::Timeout),
                Err(LlmError::Network("reset".into())),
                Ok("too late".to_string()),
            ]),
            instant(3),
        );
        let err = client.complete("", &history()).await.unwrap_err();
        assert!(matches!(err, LlmError::Network(_)));
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let client = RetryingLlmClient::new(
            Scripted::new(vec![Err(LlmError::Auth("bad key".into())), Ok("x".into())]),
            instant(3),
        );
        let err = client.complete("", &history()).await.unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_open_is_retried() {
        let client = RetryingLlmClient::new(
            Scripted::new(vec![Err(LlmError::Timeout), Ok("streamed".into())]),
            instant(2),
        );
        let rx = client.stream("", &history()).await.unwrap();
        assert_eq!(crate::llm::collect_stream(rx).await.unwrap(), "streamed");
    }
}
