//! Model-written diagnosis of why a prompt fails.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};

use crate::calibration::templates::ERROR_ANALYSIS_TEMPLATE_STR;
use crate::calibration::MissingTagPolicy;
use crate::prompt::PromptTemplate;
use crate::utils::llm::{GenerationParams, ModelInvoker, ModelRequest};
use crate::utils::postprocess::tagged::extract_tagged;

pub const ANALYSIS_TAG: &str = "analysis";

/// Everything the diagnosis is based on.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub task_description: &'a str,
    pub prompt: &'a str,
    pub accuracy: f64,
    pub failure_report: &'a str,
    pub confusion_matrix: &'a str,
}

pub struct ErrorAnalyzer {
    invoker: Arc<dyn ModelInvoker>,
    params: GenerationParams,
    template: PromptTemplate,
    missing_tag_policy: MissingTagPolicy,
}

impl ErrorAnalyzer {
    pub fn new(invoker: Arc<dyn ModelInvoker>, params: GenerationParams, missing_tag_policy: MissingTagPolicy) -> Self {
        Self {
            invoker,
            params,
            template: PromptTemplate::new(ERROR_ANALYSIS_TEMPLATE_STR),
            missing_tag_policy,
        }
    }

    pub fn render_request(&self, input: &AnalysisInput<'_>) -> Result<String> {
        let mut partial = self.template.construct_prompt();
        partial
            .try_fill("task_description", input.task_description)?
            .try_fill("prompt", input.prompt.trim())?
            .try_fill("accuracy", format!("{:.2}", input.accuracy))?
            .try_fill("failure_cases", input.failure_report)?
            .try_fill("confusion_matrix", input.confusion_matrix)?;
        Ok(partial.complete()?)
    }

    /// Ask the model for a diagnosis and return the trimmed text between `<analysis>` tags.
    ///
    /// Without the tags this is an [ExtractionError](crate::utils::postprocess::tagged::ExtractionError) under
    /// [MissingTagPolicy::Strict], or the whole reply under [MissingTagPolicy::WholeResponse].
    pub async fn analyze(&self, input: AnalysisInput<'_>) -> Result<String> {
        let request = ModelRequest::from_prompt(self.render_request(&input)?, self.params.clone());
        let reply = self.invoker.invoke(request).await?;
        let analysis = match extract_tagged(&reply, ANALYSIS_TAG) {
            Ok(analysis) => analysis,
            Err(e) if self.missing_tag_policy == MissingTagPolicy::WholeResponse => {
                warn!("no <{}> section in reply, using the whole reply", e.tag);
                reply
            }
            Err(e) => return Err(e.into()),
        };
        let analysis = analysis.trim().to_string();
        debug!("error analysis:\n{}", analysis);
        Ok(analysis)
    }
}

#[cfg(test)]
mod test_analyzer {
    use std::sync::Arc;

    use super::{AnalysisInput, ErrorAnalyzer};
    use crate::calibration::MissingTagPolicy;
    use crate::utils::llm::mock::FnInvoker;
    use crate::utils::llm::GenerationParams;
    use crate::utils::postprocess::tagged::ExtractionError;

    fn input() -> AnalysisInput<'static> {
        AnalysisInput {
            task_description: "sentiment of movie reviews",
            prompt: "Classify {text}\n",
            accuracy: 0.5,
            failure_report: "<Sample>\ntext: meh\n</Sample>",
            confusion_matrix: "Confusion matrix columns: [\"negative\", \"positive\"]",
        }
    }

    #[tokio::test]
    async fn test_analyze() {
        let model = Arc::new(FnInvoker::new(|_| Ok("Let me look.\n<analysis>\n Sarcasm is missed.\n</analysis>".to_string())));
        let analyzer = ErrorAnalyzer::new(model.clone(), GenerationParams::deterministic(), MissingTagPolicy::Strict);
        assert_eq!(analyzer.analyze(input()).await.unwrap(), "Sarcasm is missed.");

        let sent = model.requests()[0].last_user_content().to_string();
        assert!(sent.contains("accuracy of 0.50"));
        assert!(sent.contains("Classify {text}\n</prompt>"));
        assert!(sent.contains("text: meh"));
        assert_eq!(model.requests()[0].params.temperature, 0.0);
    }

    #[tokio::test]
    async fn test_missing_tag() {
        let model = Arc::new(FnInvoker::new(|_| Ok("Sarcasm is missed.".to_string())));
        let strict = ErrorAnalyzer::new(model.clone(), GenerationParams::deterministic(), MissingTagPolicy::Strict);
        let err = strict.analyze(input()).await.expect_err("no tags");
        assert_eq!(err.downcast_ref::<ExtractionError>().unwrap().tag, "analysis");

        let lenient = ErrorAnalyzer::new(model, GenerationParams::deterministic(), MissingTagPolicy::WholeResponse);
        assert_eq!(lenient.analyze(input()).await.unwrap(), "Sarcasm is missed.");
    }
}
