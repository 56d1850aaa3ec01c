//! Bounded retry around a single classification call.

use crate::client::Classifier;
use crate::models::{Annotation, ClassifyError, PromptContext, SamplingParams, ServiceConfig, WorkerConfig};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently a document is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per document (or per self-consistency sample)
    pub max_retries: u32,
    /// First backoff delay; zero disables sleeping between attempts
    pub base_delay: Duration,
    /// Cap on a single backoff delay
    pub max_delay: Duration,
    /// Bound on one classifier call
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(workers: &WorkerConfig, service: &ServiceConfig) -> Self {
        Self {
            max_retries: workers.max_retries,
            base_delay: Duration::from_millis(workers.backoff_base_ms),
            max_delay: Duration::from_millis(workers.backoff_max_ms),
            call_timeout: service.timeout(),
        }
    }

    /// Policy without backoff, for callers that want immediate retries.
    pub fn immediate(max_retries: u32, call_timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            call_timeout,
        }
    }

    /// Upper bound of the delay after failed attempt `attempt` (0-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered delay after failed attempt `attempt`: a uniform draw from
    /// the upper half of the ceiling.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let jitter: f64 = rand::rng().random_range(0.5..=1.0);
        ceiling.mul_f64(jitter)
    }
}

/// Calls the classifier until it yields an annotation or attempts run out.
pub struct RetryExecutor {
    classifier: Arc<dyn Classifier>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(classifier: Arc<dyn Classifier>, policy: RetryPolicy) -> Self {
        Self { classifier, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Classify one document.
    ///
    /// Returns `None` once `max_retries` attempts have failed. That is a
    /// normal outcome recorded as "failed to annotate", not an error.
    pub async fn attempt(
        &self,
        doc_id: &str,
        prompt: PromptContext<'_>,
        params: SamplingParams,
    ) -> Option<Annotation> {
        let max = self.policy.max_retries;

        for attempt in 1..=max {
            let result = match tokio::time::timeout(
                self.policy.call_timeout,
                self.classifier.classify(prompt, params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ClassifyError::Transient(format!(
                    "no reply within {:?}",
                    self.policy.call_timeout
                ))),
            };

            match result {
                Ok(annotation) => {
                    if attempt > 1 {
                        debug!(doc_id = %doc_id, attempts = attempt, "Classified after retries");
                    }
                    return Some(annotation);
                }
                Err(e) => {
                    warn!(
                        doc_id = %doc_id,
                        attempt = attempt,
                        max_retries = max,
                        kind = e.kind(),
                        error = %e,
                        "Classification attempt failed"
                    );
                    if attempt < max {
                        let delay = self.policy.backoff(attempt - 1);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        warn!(doc_id = %doc_id, attempts = max, "Retries exhausted, recording as failed");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StagePrompt;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn stage() -> StagePrompt {
        StagePrompt {
            system_prompt: "s".to_string(),
            head_prompt: String::new(),
            question: "q".to_string(),
        }
    }

    fn annotation(label: &str) -> Annotation {
        Annotation {
            label: label.to_string(),
            reasoning: "r".to_string(),
            target: "t".to_string(),
            score: None,
        }
    }

    /// Replays a fixed list of outcomes, then keeps failing.
    struct Scripted {
        outcomes: Mutex<Vec<Result<Annotation, ClassifyError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<Result<Annotation, ClassifyError>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Classifier for Scripted {
        async fn classify(
            &self,
            _prompt: PromptContext<'_>,
            _params: SamplingParams,
        ) -> Result<Annotation, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ClassifyError::InvalidResponse("exhausted".to_string())))
        }
    }

    /// Never answers.
    struct Hanging;

    #[async_trait]
    impl Classifier for Hanging {
        async fn classify(
            &self,
            _prompt: PromptContext<'_>,
            _params: SamplingParams,
        ) -> Result<Annotation, ClassifyError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_always_invalid_is_attempted_exactly_max_retries() {
        let classifier = Arc::new(Scripted::new(vec![]));
        let executor = RetryExecutor::new(
            classifier.clone(),
            RetryPolicy::immediate(4, Duration::from_secs(1)),
        );
        let stage = stage();

        let result = executor
            .attempt("doc", stage.context("text"), SamplingParams::new(1, 0.0))
            .await;

        assert!(result.is_none());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_recovers_after_mixed_failures() {
        let classifier = Arc::new(Scripted::new(vec![
            Err(ClassifyError::Transient("connection reset".to_string())),
            Err(ClassifyError::InvalidResponse("missing target".to_string())),
            Ok(annotation("hate")),
        ]));
        let executor = RetryExecutor::new(
            classifier.clone(),
            RetryPolicy::immediate(5, Duration::from_secs(1)),
        );
        let stage = stage();

        let result = executor
            .attempt("doc", stage.context("text"), SamplingParams::new(1, 0.0))
            .await;

        assert_eq!(result.unwrap().label, "hate");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out_as_transient() {
        let executor = RetryExecutor::new(
            Arc::new(Hanging),
            RetryPolicy::immediate(2, Duration::from_secs(30)),
        );
        let stage = stage();

        let result = executor
            .attempt("doc", stage.context("text"), SamplingParams::new(1, 0.0))
            .await;
        assert!(result.is_none());
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff_ceiling(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_ceiling(8), Duration::from_millis(1000));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_millis(1000));

        for attempt in 0..5 {
            let delay = policy.backoff(attempt);
            let ceiling = policy.backoff_ceiling(attempt);
            assert!(delay <= ceiling);
            assert!(delay >= ceiling / 2);
        }
    }

    #[test]
    fn test_zero_base_disables_backoff() {
        let policy = RetryPolicy::immediate(3, Duration::from_secs(1));
        assert!(policy.backoff(2).is_zero());
    }
}
