//! Deterministic stand-in for a model endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{InvokeError, ModelInvoker, ModelRequest};

/// Answers every request with a closure and records what it was asked.
///
/// # Example
/// ```
/// use calprompt::utils::llm::mock::FnInvoker;
/// let invoker = FnInvoker::new(|request| Ok(request.last_user_content().to_uppercase()));
/// assert_eq!(invoker.calls(), 0);
/// ```
pub struct FnInvoker<F> {
    respond: F,
    calls: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl<F> FnInvoker<F>
    where F: Fn(&ModelRequest) -> Result<String, InvokeError> + Send + Sync {
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of requests seen so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in arrival order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl<F> ModelInvoker for FnInvoker<F>
    where F: Fn(&ModelRequest) -> Result<String, InvokeError> + Send + Sync {
    async fn invoke(&self, request: ModelRequest) -> Result<String, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = (self.respond)(&request);
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(request);
        reply
    }
}
