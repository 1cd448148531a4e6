//! Model-written revision of a prompt.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};

use crate::calibration::templates::PROMPT_REVISION_TEMPLATE_STR;
use crate::calibration::HistoryEntry;
use crate::prompt::PromptTemplate;
use crate::utils::llm::{GenerationParams, ModelInvoker, ModelRequest};
use crate::utils::postprocess::tagged::extract_tagged;

pub const NEW_PROMPT_TAG: &str = "new_prompt";

pub struct RevisionInput<'a> {
    pub task_description: &'a str,
    pub prior_prompt: &'a str,
    pub analysis: &'a str,
    pub failure_report: &'a str,
    pub labels: &'a [String],
    /// Earlier attempts to learn from. Only the `history_window` best are shown.
    pub history: &'a [HistoryEntry],
}

pub struct PromptReviser {
    invoker: Arc<dyn ModelInvoker>,
    params: GenerationParams,
    template: PromptTemplate,
    history_window: usize,
}

impl PromptReviser {
    pub fn new(invoker: Arc<dyn ModelInvoker>, params: GenerationParams, history_window: usize) -> Self {
        Self {
            invoker,
            params,
            template: PromptTemplate::new(PROMPT_REVISION_TEMPLATE_STR),
            history_window,
        }
    }

    /// The `history_window` best-scoring entries, worst first, as `<example>` blocks.
    pub fn render_history(&self, history: &[HistoryEntry]) -> String {
        let mut ranked: Vec<&HistoryEntry> = history.iter().collect();
        ranked.sort_by(|a, b| a.score.total_cmp(&b.score));
        let skip = ranked.len().saturating_sub(self.history_window);
        ranked[skip..]
            .iter()
            .map(|entry| format!("<example>\n<prompt_score>\n{:.2}\n</prompt_score>\n<prompt>\n{}\n</prompt>\n</example>",
                                 entry.score, entry.prompt.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn render_request(&self, input: &RevisionInput<'_>) -> Result<String> {
        let labels = serde_json::to_string(input.labels)?;
        let mut partial = self.template.construct_prompt();
        partial
            .try_fill("task_description", input.task_description)?
            .try_fill("original_instruction", input.prior_prompt.trim())?
            .try_fill("prompt_history", self.render_history(input.history))?
            .try_fill("error_analysis", input.analysis)?
            .try_fill("failure_cases", input.failure_report)?
            .try_fill("labels", labels)?;
        Ok(partial.complete()?)
    }

    /// Ask the model for a better prompt and return the trimmed text between `<new_prompt>` tags.
    ///
    /// A missing tag is always an [ExtractionError](crate::utils::postprocess::tagged::ExtractionError): there is no
    /// sensible prompt to fall back to.
    pub async fn revise(&self, input: RevisionInput<'_>) -> Result<String> {
        let request = ModelRequest::from_prompt(self.render_request(&input)?, self.params.clone());
        let reply = self.invoker.invoke(request).await?;
        let new_prompt = extract_tagged(&reply, NEW_PROMPT_TAG)?.trim().to_string();

        let before = PromptTemplate::new_unchecked(input.prior_prompt);
        let after = PromptTemplate::new_unchecked(new_prompt.as_str());
        let dropped: Vec<_> = before.sorted_placeholders().into_iter().filter(|p| !after.placeholders.contains(p)).collect();
        if !dropped.is_empty() {
            warn!("revised prompt no longer contains placeholders {:?}", dropped);
        }
        debug!("revised prompt:\n{}", new_prompt);
        Ok(new_prompt)
    }
}
