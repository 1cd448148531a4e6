//! # Calibration
//! Iteratively improve a classification prompt against a labeled dataset.
//!
//! A run starts by scoring the initial prompt on the dataset. Every epoch then
//! 1. collects the records the current prompt got wrong into a failure report and a confusion matrix ([report]),
//! 2. asks a model to diagnose the failures ([analyzer::ErrorAnalyzer]),
//! 3. asks a model to rewrite the prompt given that diagnosis ([reviser::PromptReviser]),
//! 4. scores the rewritten prompt ([scorer::DatasetScorer]) and appends it to the history.
//!
//! The loop always runs the configured number of epochs. By default the prompt of the last epoch is returned, even if
//! an earlier one scored higher; see [ReturnMode].

use std::error::Error;
use std::fmt;
use std::fmt::{Formatter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use serde_json::{json, Value};

use crate::calibration::analyzer::{AnalysisInput, ErrorAnalyzer};
use crate::calibration::report::{extract_errors, ConfusionMatrix, FailureSample, DEFAULT_SAMPLE_SEED};
use crate::calibration::reviser::{PromptReviser, RevisionInput};
use crate::calibration::scorer::DatasetScorer;
use crate::dataset::Dataset;
use crate::prompt::PromptTemplate;
use crate::utils::llm::{GenerationParams, ModelInvoker};
use crate::utils::postprocess::Postprocess;

pub mod analyzer;
pub mod report;
pub mod reviser;
pub mod schema;
pub mod scorer;
pub mod templates;

/// Which prompt [Calibrator::optimize] hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnMode {
    /// The prompt of the last epoch.
    #[default]
    Last,
    /// The highest-scoring prompt in the history, the earliest one on ties.
    BestScoring,
}

/// What to do when the diagnosis reply lacks its `<analysis>` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingTagPolicy {
    /// Fail with an [ExtractionError](crate::utils::postprocess::tagged::ExtractionError).
    #[default]
    Strict,
    /// Use the whole reply as the diagnosis.
    WholeResponse,
}

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Number of analyze/revise/score rounds after the seed scoring.
    pub epochs: usize,
    /// Upper bound of failure cases per true label shown to the model.
    pub max_errors_per_label: usize,
    pub sample_seed: u64,
    /// Model calls in flight while scoring a dataset.
    pub scoring_concurrency: usize,
    pub return_mode: ReturnMode,
    pub missing_tag_policy: MissingTagPolicy,
    /// How many of the best earlier prompts are shown in a revision request.
    pub history_window: usize,
    pub prediction_params: GenerationParams,
    pub analysis_params: GenerationParams,
    pub revision_params: GenerationParams,
    /// When set, every scored dataset is written there as a timestamped CSV.
    pub output_dir: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            max_errors_per_label: 5,
            sample_seed: DEFAULT_SAMPLE_SEED,
            scoring_concurrency: 1,
            return_mode: ReturnMode::Last,
            missing_tag_policy: MissingTagPolicy::Strict,
            history_window: 3,
            prediction_params: GenerationParams::deterministic(),
            analysis_params: GenerationParams::deterministic(),
            revision_params: GenerationParams::creative(),
            output_dir: None,
        }
    }
}

/// State of one iteration, fixed once appended to the history.
#[derive(Debug, Clone)]
#[readonly::make]
pub struct HistoryEntry {
    pub prompt: String,
    /// Mean accuracy of `prompt` on the dataset.
    pub score: f64,
    /// Records `prompt` got wrong, with their predictions.
    pub errors: Dataset,
    pub confusion_matrix: ConfusionMatrix,
    /// The diagnosis of the previous entry's failures that led to `prompt`. `None` for the initial prompt.
    ///
    /// `errors` and `confusion_matrix` belong to `prompt` itself, so they are what the next entry's analysis reads.
    pub analysis: Option<String>,
}

impl HistoryEntry {
    fn new(prompt: String, score: f64, scored: &Dataset, analysis: Option<String>) -> Self {
        Self {
            prompt,
            score,
            errors: extract_errors(scored),
            confusion_matrix: ConfusionMatrix::from_dataset(scored),
            analysis,
        }
    }
}

/// Step of the loop an error escaped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Scoring,
    Aggregating,
    Analyzing,
    Revising,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::Scoring => "scoring",
            Stage::Aggregating => "aggregating",
            Stage::Analyzing => "analyzing",
            Stage::Revising => "revising",
            Stage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// Error that aborted [Calibrator::optimize]. Iteration 0 is the initial prompt.
#[derive(Debug)]
pub struct CalibrationError {
    pub iteration: usize,
    pub stage: Stage,
    pub source: anyhow::Error,
}

impl CalibrationError {
    pub fn new(iteration: usize, stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            iteration,
            stage,
            source: source.into(),
        }
    }

    /// The underlying error as `E`, e.g. [InvokeError](crate::utils::llm::InvokeError) or
    /// [ExtractionError](crate::utils::postprocess::tagged::ExtractionError).
    pub fn downcast_ref<E>(&self) -> Option<&E>
        where E: fmt::Display + fmt::Debug + Send + Sync + 'static {
        self.source.downcast_ref::<E>()
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CalibrationError: iteration {} failed while {}: {:#}", self.iteration, self.stage, self.source)
    }
}

impl Error for CalibrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.source)
    }
}

fn at<E: Into<anyhow::Error>>(iteration: usize, stage: Stage) -> impl FnOnce(E) -> CalibrationError {
    move |source| CalibrationError::new(iteration, stage, source)
}

/// Result of a calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    /// The returned prompt, trimmed.
    pub prompt: String,
    /// Every iteration in order, starting with the initial prompt.
    pub history: Vec<HistoryEntry>,
    /// The dataset as scored by the last iteration.
    pub dataset: Dataset,
}

impl CalibrationOutcome {
    /// The highest-scoring entry, the earliest one on ties.
    pub fn best(&self) -> Option<&HistoryEntry> {
        best_entry(&self.history)
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::from("# Calibration report\n\n| iteration | accuracy | errors |\n|---|---|---|\n");
        for (iteration, entry) in self.history.iter().enumerate() {
            let _ = writeln!(md, "| {} | {:.3} | {} |", iteration, entry.score, entry.errors.len());
        }
        let _ = write!(md, "\n## Final prompt\n\n```text\n{}\n```\n", self.prompt);
        if let Some(analysis) = self.history.last().and_then(|entry| entry.analysis.as_deref()) {
            let _ = write!(md, "\n## Last analysis\n\n{}\n", analysis);
        }
        md
    }

    pub fn to_json(&self) -> Value {
        let history: Vec<Value> = self.history
            .iter()
            .enumerate()
            .map(|(iteration, entry)| json!({
                "iteration": iteration,
                "prompt": entry.prompt,
                "score": entry.score,
                "errors": entry.errors.len(),
                "confusion_matrix": entry.confusion_matrix,
                "analysis": entry.analysis,
            }))
            .collect();
        json!({
            "prompt": self.prompt,
            "history": history,
        })
    }
}

fn best_entry(history: &[HistoryEntry]) -> Option<&HistoryEntry> {
    history.iter().fold(None, |best: Option<&HistoryEntry>, entry| match best {
        Some(best) if best.score >= entry.score => Some(best),
        _ => Some(entry),
    })
}

/// Drives the calibration loop with one model endpoint for prediction, analysis and revision.
pub struct Calibrator {
    invoker: Arc<dyn ModelInvoker>,
    pub config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(invoker: Arc<dyn ModelInvoker>, config: CalibrationConfig) -> Self {
        Self { invoker, config }
    }

    fn scorer(&self) -> DatasetScorer {
        DatasetScorer::new(Arc::clone(&self.invoker), self.config.prediction_params.clone())
            .with_concurrency(self.config.scoring_concurrency)
    }

    /// Run `epochs` rounds of analyze, revise and score, starting from `initial_prompt`.
    ///
    /// The placeholders of `initial_prompt` are checked against the dataset columns before any model call. Failures
    /// of single records' postprocessing are scored as wrong; any other failure aborts the run with the iteration and
    /// stage it happened in.
    pub async fn optimize<P: Postprocess + ?Sized>(&self,
                                                   task_description: &str,
                                                   initial_prompt: &str,
                                                   mut dataset: Dataset,
                                                   postprocess: &P) -> Result<CalibrationOutcome, CalibrationError> {
        let config = &self.config;
        let template = PromptTemplate::new(initial_prompt);
        schema::validate(&template, &dataset).map_err(at(0, Stage::Validating))?;
        let labels = dataset.distinct_labels();

        let scorer = self.scorer();
        let analyzer = ErrorAnalyzer::new(Arc::clone(&self.invoker), config.analysis_params.clone(), config.missing_tag_policy);
        let reviser = PromptReviser::new(Arc::clone(&self.invoker), config.revision_params.clone(), config.history_window);

        let score = scorer.score(&template, &mut dataset, postprocess).await.map_err(at(0, Stage::Scoring))?;
        info!("initial prompt accuracy: {:.3}", score);
        self.persist(&dataset, "iteration_0").map_err(at(0, Stage::Persisting))?;
        let mut history = vec![HistoryEntry::new(initial_prompt.to_string(), score, &dataset, None)];

        for iteration in 1..=config.epochs {
            let current = &history[history.len() - 1];
            let sample = FailureSample::draw(&current.errors, config.max_errors_per_label, config.sample_seed);
            let failure_report = sample.render();
            let confusion_matrix = current.confusion_matrix.to_prompt_text();
            info!("iteration {}: {} errors, {} sampled for analysis from labels {:?}",
                  iteration, current.errors.len(), sample.len(), sample.labels());

            let analysis = analyzer
                .analyze(AnalysisInput {
                    task_description,
                    prompt: &current.prompt,
                    accuracy: current.score,
                    failure_report: &failure_report,
                    confusion_matrix: &confusion_matrix,
                })
                .await
                .map_err(at(iteration, Stage::Analyzing))?;

            let candidate = reviser
                .revise(RevisionInput {
                    task_description,
                    prior_prompt: &current.prompt,
                    analysis: &analysis,
                    failure_report: &failure_report,
                    labels: &labels,
                    history: &history,
                })
                .await
                .map_err(at(iteration, Stage::Revising))?;

            let template = PromptTemplate::new(candidate.as_str());
            let score = scorer.score(&template, &mut dataset, postprocess).await.map_err(at(iteration, Stage::Scoring))?;
            info!("iteration {}/{}: accuracy {:.3}", iteration, config.epochs, score);
            self.persist(&dataset, &format!("iteration_{}", iteration)).map_err(at(iteration, Stage::Persisting))?;
            history.push(HistoryEntry::new(candidate, score, &dataset, Some(analysis)));
        }

        let chosen = match config.return_mode {
            ReturnMode::Last => history.last(),
            ReturnMode::BestScoring => best_entry(&history),
        };
        let prompt = chosen.map(|entry| entry.prompt.trim().to_string()).unwrap_or_default();
        info!("calibration finished after {} epochs", config.epochs);
        Ok(CalibrationOutcome { prompt, history, dataset })
    }

    /// Score a single prompt on `dataset` and return its accuracy, persisting the predictions when `output_dir` is set.
    pub async fn evaluate<P: Postprocess + ?Sized>(&self,
                                                   prompt: &str,
                                                   dataset: &mut Dataset,
                                                   postprocess: &P) -> anyhow::Result<f64> {
        let score = self.scorer().score(&PromptTemplate::new(prompt), dataset, postprocess).await?;
        info!("prompt accuracy: {:.3}", score);
        self.persist(dataset, "predict")?;
        Ok(score)
    }

    fn persist(&self, dataset: &Dataset, prefix: &str) -> anyhow::Result<()> {
        if let Some(dir) = &self.config.output_dir {
            dataset.save_timestamped(dir, prefix)?;
        }
        Ok(())
    }
}
