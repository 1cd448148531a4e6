use std::time::Duration;

use async_trait::async_trait;
use log::warn;

use super::{InvokeError, ModelInvoker, ModelRequest};

/// Capped exponential backoff. The default budget is 5 attempts in total.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 20_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Retries transient failures of the wrapped invoker. Fatal errors are returned at once.
pub struct Retrying<M> {
    inner: M,
    config: RetryConfig,
}

impl<M: ModelInvoker> Retrying<M> {
    pub fn new(inner: M, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

/// Adds [with_retry](WithRetry::with_retry) to every invoker.
pub trait WithRetry: ModelInvoker + Sized {
    fn with_retry(self, config: RetryConfig) -> Retrying<Self> {
        Retrying::new(self, config)
    }
}

impl<M: ModelInvoker> WithRetry for M {}

#[async_trait]
impl<M: ModelInvoker> ModelInvoker for Retrying<M> {
    async fn invoke(&self, request: ModelRequest) -> Result<String, InvokeError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.invoke(request.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.delay_for(attempt);
                    warn!("model call attempt {}/{} failed ({}), retrying after {}ms", attempt, max_attempts, e, delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(InvokeError::Exhausted { attempts: attempt, last: Box::new(e) });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
