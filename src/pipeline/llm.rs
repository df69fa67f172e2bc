//! Vision model interaction: the inference seam and the retry loop around it.
//!
//! [`VisionModel`] is the boundary to the external multimodal service:
//! `(image, instruction) → free-form text`. [`ProviderVision`] implements it
//! on top of any edgequake-llm provider; tests and embedding hosts can supply
//! their own implementation through
//! [`crate::config::ExtractionConfig::vision`].
//!
//! ## Retry Strategy
//!
//! Transport errors and timeouts are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`). Every attempt is bounded by
//! `api_timeout_secs`; a timeout is just another failed attempt. When all
//! attempts fail the caller gets a [`DetectionFailure`] and falls back to
//! geometric detection, so nothing here can abort a run.

use crate::config::ExtractionConfig;
use crate::error::DetectionFailure;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Raw reply from a vision model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisionReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A failed inference call.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct VisionError(pub String);

/// External multimodal inference service.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn analyze(&self, image: ImageData, instruction: &str)
        -> Result<VisionReply, VisionError>;
}

/// [`VisionModel`] backed by an edgequake-llm provider.
pub struct ProviderVision {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl ProviderVision {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

#[async_trait]
impl VisionModel for ProviderVision {
    async fn analyze(
        &self,
        image: ImageData,
        instruction: &str,
    ) -> Result<VisionReply, VisionError> {
        let messages = vec![ChatMessage::user_with_images(instruction, vec![image])];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| VisionError(e.to_string()))?;

        Ok(VisionReply {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Attempt budget for one page's inference call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

/// Upper bound for a single retry delay.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Delay before retry `attempt` (1-based): doubles each time, capped at
/// [`MAX_BACKOFF_MS`].
fn backoff_ms(policy: &RetryPolicy, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    policy.backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Call the vision model for one page, retrying failed and timed-out
/// attempts.
///
/// Returns the first successful reply together with the number of retries it
/// took.
pub async fn call_with_retry(
    model: &dyn VisionModel,
    page_num: usize,
    image: ImageData,
    instruction: &str,
    policy: &RetryPolicy,
) -> Result<(VisionReply, u32), DetectionFailure> {
    let mut last_err: Option<String> = None;
    let mut all_timed_out = true;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(policy, attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(policy.timeout, model.analyze(image.clone(), instruction)).await {
            Ok(Ok(reply)) => {
                debug!(
                    "Page {}: {} input tokens, {} output tokens",
                    page_num, reply.input_tokens, reply.output_tokens
                );
                return Ok((reply, attempt));
            }
            Ok(Err(e)) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                all_timed_out = false;
                last_err = Some(e.to_string());
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {:?}",
                    page_num,
                    attempt + 1,
                    policy.timeout
                );
                last_err = Some(format!("timed out after {:?}", policy.timeout));
            }
        }
    }

    if all_timed_out {
        return Err(DetectionFailure::Timeout {
            secs: policy.timeout.as_secs(),
        });
    }

    Err(DetectionFailure::Inference {
        attempts: policy.max_retries + 1,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers `{"questions": []}`.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl VisionModel for Flaky {
        async fn analyze(
            &self,
            _image: ImageData,
            _instruction: &str,
        ) -> Result<VisionReply, VisionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(VisionError("503 overloaded".into()))
            } else {
                Ok(VisionReply {
                    content: r#"{"questions": []}"#.into(),
                    input_tokens: 10,
                    output_tokens: 5,
                })
            }
        }
    }

    struct Stalled;

    #[async_trait]
    impl VisionModel for Stalled {
        async fn analyze(
            &self,
            _image: ImageData,
            _instruction: &str,
        ) -> Result<VisionReply, VisionError> {
            sleep(Duration::from_secs(30)).await;
            Ok(VisionReply::default())
        }
    }

    fn image() -> ImageData {
        ImageData::new("AAAA", "image/png")
    }

    fn policy(max_retries: u32, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms: 1,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn build_options_defaults() {
        let config = ExtractionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = RetryPolicy {
            max_retries: u32::MAX,
            backoff_ms: 500,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(backoff_ms(&p, 1), 500);
        assert_eq!(backoff_ms(&p, 2), 1000);
        assert_eq!(backoff_ms(&p, 3), 2000);
        assert_eq!(backoff_ms(&p, 64), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(&p, u32::MAX), MAX_BACKOFF_MS);

        let huge = RetryPolicy {
            backoff_ms: u64::MAX,
            ..p
        };
        assert_eq!(backoff_ms(&huge, 5), MAX_BACKOFF_MS);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let model = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let (reply, retries) = call_with_retry(&model, 1, image(), "find", &policy(2, 1000))
            .await
            .expect("third attempt succeeds");
        assert_eq!(retries, 2);
        assert_eq!(reply.input_tokens, 10);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let model = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let err = call_with_retry(&model, 1, image(), "find", &policy(1, 1000))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DetectionFailure::Inference {
                attempts: 2,
                detail: "503 overloaded".into()
            }
        );
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_is_a_detection_failure() {
        let err = call_with_retry(&Stalled, 4, image(), "find", &policy(0, 20))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectionFailure::Timeout { .. }));
    }
}
