//! [ModelInvoker] over the OpenAI chat completions API, or any endpoint that speaks it.

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, Stop,
};
use async_openai::Client;
use async_trait::async_trait;
use log::debug;
use url::Url;

use super::{InvokeError, ModelInvoker, ModelRequest, Role};

/// Chat-completion backed invoker. Holds one client and a default model; no per-call state.
#[derive(Clone, Debug)]
pub struct OpenAIInvoker {
    pub client: Client<OpenAIConfig>,
    pub default_model: String,
}

impl OpenAIInvoker {
    pub const DEFAULT_MODEL: &'static str = "gpt-3.5-turbo";

    pub fn new(client: Client<OpenAIConfig>, default_model: impl Into<String>) -> Self {
        Self {
            client,
            default_model: default_model.into(),
        }
    }

    /// Credentials come from `OPENAI_API_KEY` (and `OPENAI_ORG_ID`, if set).
    pub fn from_env(default_model: impl Into<String>) -> Self {
        Self::new(Client::new(), default_model)
    }

    /// Talk to a compatible endpoint at `api_base`, e.g. a local gateway.
    pub fn with_api_base(api_key: impl Into<String>, api_base: &Url, default_model: impl Into<String>) -> Self {
        let base = api_base.as_str().trim_end_matches('/').to_string();
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base);
        Self::new(Client::with_config(config), default_model)
    }

    fn build_request(&self, request: &ModelRequest) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let messages = request.messages
            .iter()
            .map(|message| match message.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map(ChatCompletionRequestMessage::User),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map(ChatCompletionRequestMessage::Assistant),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let params = &request.params;
        let model = params.model.clone().unwrap_or_else(|| self.default_model.clone());
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(model)
            .messages(messages)
            .max_tokens(params.max_tokens)
            .temperature(params.temperature);
        if let Some(top_p) = params.top_p {
            builder.top_p(top_p);
        }
        if params.top_k.is_some() {
            debug!("top_k is not part of the chat completions API, ignored");
        }
        if !params.stop_sequences.is_empty() {
            builder.stop(Stop::StringArray(params.stop_sequences.clone()));
        }
        builder.build()
    }
}

#[async_trait]
impl ModelInvoker for OpenAIInvoker {
    async fn invoke(&self, request: ModelRequest) -> Result<String, InvokeError> {
        let request = self.build_request(&request).map_err(classify)?;
        debug!("sending {} message(s) to {}", request.messages.len(), request.model);
        let response = self.client.chat().create(request).await.map_err(classify)?;
        response.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| InvokeError::transient("response has no text content"))
    }
}

/// Network hiccups, throttling and server-side failures are worth another attempt; the rest is not.
fn classify(error: OpenAIError) -> InvokeError {
    match error {
        OpenAIError::Reqwest(e) => InvokeError::transient(e.to_string()),
        OpenAIError::JSONDeserialize(e) => InvokeError::transient(format!("malformed response body: {}", e)),
        OpenAIError::ApiError(api_error) => {
            if is_transient_message(&api_error.message) {
                InvokeError::transient(api_error.message)
            } else {
                InvokeError::fatal(api_error.message)
            }
        }
        other => InvokeError::fatal(other.to_string()),
    }
}

fn is_transient_message(message: &str) -> bool {
    let message = message.to_lowercase();
    ["rate limit", "overloaded", "server error", "timeout", "timed out", "temporarily", "try again"]
        .iter()
        .any(|marker| message.contains(marker))
}

#[cfg(test)]
mod test_openai {
    use async_openai::types::{ChatCompletionRequestMessage, Stop};

    use super::{is_transient_message, OpenAIInvoker};
    use crate::utils::llm::{GenerationParams, Message, ModelRequest};

    #[test]
    fn test_build_request() {
        let invoker = OpenAIInvoker::new(async_openai::Client::new(), "gpt-4");
        let mut params = GenerationParams::creative();
        params.stop_sequences = vec!["\n\nHuman:".to_string()];
        let request = ModelRequest::from_messages(vec![Message::user("hi"), Message::assistant("<answer>")], params);
        let built = invoker.build_request(&request).unwrap();
        assert_eq!(built.model, "gpt-4");
        assert_eq!(built.max_tokens, Some(4096));
        assert_eq!(built.temperature, Some(0.8));
        assert!(matches!(built.messages[0], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(built.messages[1], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(built.stop, Some(Stop::StringArray(ref s)) if s.len() == 1));

        let override_model = ModelRequest::from_prompt("hi", GenerationParams::deterministic().with_model("gpt-4-32k"));
        assert_eq!(invoker.build_request(&override_model).unwrap().model, "gpt-4-32k");
    }

    #[test]
    fn test_transient_messages() {
        assert!(is_transient_message("Rate limit reached for requests"));
        assert!(is_transient_message("The server is overloaded"));
        assert!(!is_transient_message("Incorrect API key provided"));
    }
}
