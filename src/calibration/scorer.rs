//! Runs a prompt over every record of a dataset and scores the predictions.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, warn};

use crate::calibration::schema;
use crate::dataset::Dataset;
use crate::filler::{Fill, RowFiller};
use crate::prompt::PromptTemplate;
use crate::utils::llm::{GenerationParams, ModelInvoker, ModelRequest};
use crate::utils::postprocess::Postprocess;

pub struct DatasetScorer {
    invoker: Arc<dyn ModelInvoker>,
    params: GenerationParams,
    concurrency: usize,
}

impl DatasetScorer {
    /// A sequential scorer: one model call at a time, in record order.
    pub fn new(invoker: Arc<dyn ModelInvoker>, params: GenerationParams) -> Self {
        Self {
            invoker,
            params,
            concurrency: 1,
        }
    }

    /// Allow up to `concurrency` model calls in flight. Results are still written back in record order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fill `template` with every record. Fails on the first placeholder without a column, before any model call.
    pub fn render_prompts(template: &PromptTemplate, dataset: &Dataset) -> Result<Vec<String>> {
        schema::validate(template, dataset)?;
        dataset
            .records()
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                let mut partial = template.construct_prompt();
                RowFiller::new(dataset.columns(), record).fill(&mut partial)?;
                partial.complete().with_context(|| format!("cannot fill prompt for record {}", idx))
            })
            .collect()
    }

    /// Predict every record with `template`, postprocess the replies and score them against the labels.
    ///
    /// Overwrites `predict` and `score` of every record and returns the mean accuracy. A postprocess failure only
    /// marks its own record as wrong; a model call that still fails after retries aborts the pass and leaves `dataset`
    /// as it was.
    pub async fn score<P: Postprocess + ?Sized>(&self,
                                                template: &PromptTemplate,
                                                dataset: &mut Dataset,
                                                postprocess: &P) -> Result<f64> {
        let prompts = Self::render_prompts(template, dataset)?;
        debug!("scoring {} records with up to {} concurrent calls", prompts.len(), self.concurrency);

        // stops polling at the first failed call; no record is touched unless every call succeeded
        let replies: Vec<String> = stream::iter(prompts.into_iter().enumerate())
            .map(|(idx, prompt)| {
                let invoker = Arc::clone(&self.invoker);
                let request = ModelRequest::from_prompt(prompt, self.params.clone());
                async move {
                    invoker.invoke(request).await.with_context(|| format!("model call failed for record {}", idx))
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        for (idx, (record, reply)) in dataset.records_mut().iter_mut().zip(replies).enumerate() {
            record.clear_prediction();
            match postprocess.postprocess(&reply) {
                Ok(predict) => record.predict = Some(predict),
                Err(e) => {
                    warn!("postprocess failed for record {}: {:#}", idx, e);
                    record.failure = Some(format!("{:#}", e));
                }
            }
        }
        apply_scores(dataset);
        Ok(dataset.mean_score())
    }
}

/// `score = 1` where the prediction equals the label, else `0`. Records without a prediction score `0`.
pub fn apply_scores(dataset: &mut Dataset) {
    for record in dataset.records_mut() {
        let correct = record.predict.as_deref() == Some(record.label.as_str());
        record.score = Some(correct as u8);
    }
}

#[cfg(test)]
mod test_scorer {
    use std::sync::Arc;

    use super::DatasetScorer;
    use crate::calibration::schema::SchemaError;
    use crate::dataset::{Dataset, Record};
    use crate::prompt::PromptTemplate;
    use crate::utils::llm::mock::FnInvoker;
    use crate::utils::llm::{GenerationParams, InvokeError};
    use crate::utils::postprocess::{lowercase, trimmed};

    fn reviews() -> Dataset {
        let mut dataset = Dataset::new(vec!["text".to_string()]).unwrap();
        for (text, label) in [("I loved it", "positive"), ("awful", "negative"), ("lovely cast", "positive"), ("meh", "negative")] {
            dataset.push(Record::new(label, vec![text.to_string()])).unwrap();
        }
        dataset
    }

    /// Says "positive" when the review contains "l", which gets exactly one negative review wrong.
    fn keyword_model() -> Arc<FnInvoker<impl Fn(&crate::utils::llm::ModelRequest) -> Result<String, InvokeError> + Send + Sync>> {
        Arc::new(FnInvoker::new(|request| {
            let prompt = request.last_user_content();
            Ok(if prompt.contains('l') { " Positive\n".to_string() } else { "Negative".to_string() })
        }))
    }

    #[tokio::test]
    async fn test_score_is_deterministic() {
        let model = keyword_model();
        let scorer = DatasetScorer::new(model.clone(), GenerationParams::deterministic());
        let template = PromptTemplate::new("Review: {text}\nSentiment:");

        let mut first = reviews();
        let accuracy = scorer.score(&template, &mut first, &lowercase).await.unwrap();
        let mut second = reviews();
        scorer.score(&template, &mut second, &lowercase).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(accuracy, 0.75);
        let scores: Vec<_> = first.records().iter().map(|r| r.score.unwrap()).collect();
        assert_eq!(scores, vec![1, 0, 1, 1]);
        assert_eq!(model.calls(), 8);
    }

    #[tokio::test]
    async fn test_missing_placeholder_fails_before_any_call() {
        let model = keyword_model();
        let scorer = DatasetScorer::new(model.clone(), GenerationParams::deterministic());
        let mut dataset = reviews();
        let err = scorer
            .score(&PromptTemplate::new("Review of {topic}: {text}"), &mut dataset, &trimmed)
            .await
            .expect_err("topic is not a column");
        assert!(matches!(err.downcast_ref::<SchemaError>(), Some(SchemaError::MissingVariables { missing, .. }) if missing == &vec!["topic".to_string()]));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_postprocess_failure_is_contained() {
        let model = keyword_model();
        let scorer = DatasetScorer::new(model, GenerationParams::deterministic());
        let strict = |raw: &str| -> anyhow::Result<String> {
            if raw.trim() == "Negative" {
                anyhow::bail!("unexpected casing")
            }
            Ok(raw.trim().to_lowercase())
        };
        let mut dataset = reviews();
        let accuracy = scorer.score(&PromptTemplate::new("{text}"), &mut dataset, &strict).await.unwrap();
        assert_eq!(accuracy, 0.5);
        let meh = &dataset.records()[3];
        assert_eq!(meh.predict, None);
        assert_eq!(meh.score, Some(0));
        assert!(meh.failure.as_deref().unwrap().contains("unexpected casing"));
    }

    #[tokio::test]
    async fn test_concurrent_scoring_keeps_order() {
        let model = Arc::new(FnInvoker::new(|request| Ok(request.last_user_content().to_string())));
        let scorer = DatasetScorer::new(model, GenerationParams::deterministic()).with_concurrency(3);
        let mut dataset = reviews();
        scorer.score(&PromptTemplate::new("{text}"), &mut dataset, &trimmed).await.unwrap();
        let predictions: Vec<_> = dataset.records().iter().map(|r| r.predict.clone().unwrap()).collect();
        assert_eq!(predictions, vec!["I loved it", "awful", "lovely cast", "meh"]);
    }

    #[tokio::test]
    async fn test_exhausted_call_aborts_pass() {
        let model = Arc::new(FnInvoker::new(|_| Err(InvokeError::fatal("bad key"))));
        let scorer = DatasetScorer::new(model.clone(), GenerationParams::deterministic());
        let mut dataset = reviews();
        let err = scorer.score(&PromptTemplate::new("{text}"), &mut dataset, &trimmed).await.expect_err("model is down");
        assert!(err.downcast_ref::<InvokeError>().is_some());
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_pass_leaves_dataset_unchanged() {
        let scorer = DatasetScorer::new(keyword_model(), GenerationParams::deterministic());
        let template = PromptTemplate::new("{text}");
        let mut dataset = reviews();
        scorer.score(&template, &mut dataset, &lowercase).await.unwrap();
        let before = dataset.clone();

        let flaky = Arc::new(FnInvoker::new(|request| {
            if request.last_user_content() == "lovely cast" {
                Err(InvokeError::fatal("connection reset"))
            } else {
                Ok("negative".to_string())
            }
        }));
        let scorer = DatasetScorer::new(flaky.clone(), GenerationParams::deterministic());
        let err = scorer.score(&template, &mut dataset, &lowercase).await.expect_err("record 2 fails");
        assert!(format!("{:#}", err).contains("record 2"));
        assert_eq!(dataset, before);
        assert_eq!(flaky.calls(), 3);
    }
}
