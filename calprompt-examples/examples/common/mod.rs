use std::sync::Arc;

use anyhow::{Context, Result};
use calprompt::utils::llm::openai::OpenAIInvoker;
use calprompt::utils::llm::retry::{RetryConfig, WithRetry};
use calprompt::utils::llm::ModelInvoker;
use calprompt::utils::postprocess::{lowercase, trimmed, JsonField, Postprocess, TaggedLabel};
use clap::{Args, ValueEnum};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Reads `.env` if there is one and logs to stderr, `info` unless `RUST_LOG` says otherwise.
pub fn init() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Model used for every request
    #[arg(long, env = "CALPROMPT_MODEL", default_value = OpenAIInvoker::DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of an OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_API_BASE")]
    pub api_base: Option<Url>,

    /// Maximum attempts per model call
    #[arg(long, default_value_t = 5)]
    pub max_attempts: u32,
}

impl ModelArgs {
    pub fn invoker(&self) -> Result<Arc<dyn ModelInvoker>> {
        let invoker = match &self.api_base {
            Some(api_base) => {
                let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
                OpenAIInvoker::with_api_base(api_key, api_base, &self.model)
            }
            None => OpenAIInvoker::from_env(&self.model),
        };
        let retry = RetryConfig {
            max_attempts: self.max_attempts,
            ..RetryConfig::default()
        };
        Ok(Arc::new(invoker.with_retry(retry)))
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum PostprocessKind {
    #[default]
    Trimmed,
    Lowercase,
    /// Content of the first `<tag>` pair
    Tagged,
    /// A string field of the JSON object in the reply
    Json,
}

#[derive(Args, Debug)]
pub struct PostprocessArgs {
    /// How a reply becomes a label
    #[arg(long, value_enum, default_value = "trimmed")]
    pub postprocess: PostprocessKind,

    /// Tag for `--postprocess tagged`
    #[arg(long, default_value = "label")]
    pub tag: String,

    /// Key for `--postprocess json`
    #[arg(long, default_value = "label")]
    pub key: String,
}

impl PostprocessArgs {
    pub fn hook(&self) -> Box<dyn Postprocess> {
        match self.postprocess {
            PostprocessKind::Trimmed => Box::new(trimmed),
            PostprocessKind::Lowercase => Box::new(lowercase),
            PostprocessKind::Tagged => Box::new(TaggedLabel::new(self.tag.as_str())),
            PostprocessKind::Json => Box::new(JsonField::new(self.key.as_str())),
        }
    }
}
