//! Abstract model invocation.
//!
//! Everything in this crate talks to a generative model through [ModelInvoker]: a conversation goes in, generated
//! text comes out. Backends live in submodules ([openai]), the retry policy is a wrapper ([retry::Retrying]) so it
//! composes with any backend, and [mock::FnInvoker] stands in for a model in tests.

use std::error::Error;
use std::fmt;
use std::fmt::Formatter;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;

pub mod mock;
pub mod openai;
pub mod retry;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Decoding settings for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Model identifier. `None` uses the invoker's default model.
    pub model: Option<String>,
    pub max_tokens: u16,
    pub temperature: f32,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::deterministic()
    }
}

impl GenerationParams {
    /// Near-zero temperature, for classification and extraction.
    pub fn deterministic() -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            temperature: 0.0,
            top_k: None,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }

    /// Higher temperature, for rewriting prompts.
    pub fn creative() -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            temperature: 0.8,
            top_k: Some(50),
            top_p: Some(1.0),
            stop_sequences: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u16) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A request to a generative endpoint: ordered conversation turns plus decoding settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub params: GenerationParams,
}

impl ModelRequest {
    /// A single user turn.
    pub fn from_prompt(prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            params,
        }
    }

    pub fn from_messages(messages: Vec<Message>, params: GenerationParams) -> Self {
        Self { messages, params }
    }

    /// Content of the last user turn, or "" if there is none.
    pub fn last_user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map_or("", |m| m.content.as_str())
    }
}

/// Sends a conversation to a generative model and returns the generated text.
///
/// Implementations make one network round trip per call and keep no state between calls.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, request: ModelRequest) -> Result<String, InvokeError>;
}

#[async_trait]
impl<T: ModelInvoker + ?Sized> ModelInvoker for Arc<T> {
    async fn invoke(&self, request: ModelRequest) -> Result<String, InvokeError> {
        (**self).invoke(request).await
    }
}

#[async_trait]
impl<'a, T: ModelInvoker + ?Sized> ModelInvoker for &'a T {
    async fn invoke(&self, request: ModelRequest) -> Result<String, InvokeError> {
        (**self).invoke(request).await
    }
}

#[async_trait]
impl<T: ModelInvoker + ?Sized> ModelInvoker for Box<T> {
    async fn invoke(&self, request: ModelRequest) -> Result<String, InvokeError> {
        (**self).invoke(request).await
    }
}

/// Error of a model call.
#[derive(Debug)]
pub enum InvokeError {
    /// Transport or availability failure worth retrying (timeouts, 429, 5xx, dropped connections).
    Transient { message: String },
    /// Failure that will not go away by retrying (bad credentials, invalid request).
    Fatal { message: String },
    /// The retry budget ran out; `last` is the final attempt's error.
    Exhausted { attempts: u32, last: Box<InvokeError> },
}

impl InvokeError {
    pub fn transient(message: impl Into<String>) -> Self {
        InvokeError::Transient { message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        InvokeError::Fatal { message: message.into() }
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, InvokeError::Transient { .. })
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Transient { message } => write!(f, "InvokeError: transient failure: {}", message),
            InvokeError::Fatal { message } => write!(f, "InvokeError: {}", message),
            InvokeError::Exhausted { attempts, last } => write!(f, "InvokeError: gave up after {} attempts, last error: {}", attempts, last),
        }
    }
}

impl Error for InvokeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InvokeError::Exhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

/// Verify that the endpoint answers before starting a long run.
pub async fn preflight(invoker: &dyn ModelInvoker, params: &GenerationParams) -> Result<(), InvokeError> {
    let params = params.clone().with_max_tokens(16);
    let reply = invoker.invoke(ModelRequest::from_prompt("Hello, world!", params)).await?;
    if reply.trim().is_empty() {
        return Err(InvokeError::fatal("preflight got an empty reply"));
    }
    info!("model endpoint is reachable");
    Ok(())
}

#[cfg(test)]
mod test_llm {
    use super::mock::FnInvoker;
    use super::{preflight, GenerationParams, InvokeError, Message, ModelRequest};

    #[test]
    fn test_last_user_content() {
        let request = ModelRequest::from_messages(vec![
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
            Message::assistant("prefill"),
        ], GenerationParams::default());
        assert_eq!(request.last_user_content(), "second");
    }

    #[tokio::test]
    async fn test_preflight() {
        let ok = FnInvoker::new(|_| Ok("Hi!".to_string()));
        preflight(&ok, &GenerationParams::default()).await.unwrap();
        assert_eq!(ok.requests()[0].params.max_tokens, 16);

        let empty = FnInvoker::new(|_| Ok("  ".to_string()));
        assert!(matches!(preflight(&empty, &GenerationParams::default()).await, Err(InvokeError::Fatal { .. })));
    }
}
