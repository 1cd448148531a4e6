//! Calibrate a classification prompt on a labeled CSV.
//!
//! ```text
//! cargo run --example calibrate -- --dataset reviews.csv --prompt prompt.txt \
//!     --task "Classify the sentiment of movie reviews" --epochs 3 --output-dir runs
//! ```

#[path = "../common/mod.rs"]
mod common;

use std::path::PathBuf;

use anyhow::{Context, Result};
use calprompt::calibration::{CalibrationConfig, Calibrator, ReturnMode};
use calprompt::dataset::Dataset;
use calprompt::utils::llm::preflight;
use calprompt::utils::printing::MarkdownPrinter;
use clap::Parser;
use common::{ModelArgs, PostprocessArgs};

#[derive(Parser, Debug)]
#[command(about = "Iteratively improve a prompt against a labeled dataset")]
struct Cli {
    /// CSV with a `label` column and one column per prompt variable
    #[arg(long)]
    dataset: PathBuf,

    /// File holding the initial prompt, with `{column}` placeholders
    #[arg(long)]
    prompt: PathBuf,

    /// What the prompt is supposed to do
    #[arg(long)]
    task: String,

    #[arg(long, default_value_t = 3)]
    epochs: usize,

    /// Failure cases per label shown to the model
    #[arg(long, default_value_t = 5)]
    max_errors_per_label: usize,

    /// Model calls in flight while scoring
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Return the best-scoring prompt instead of the last one
    #[arg(long)]
    best: bool,

    /// Where scored datasets are written
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Also write the run as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,

    #[command(flatten)]
    model_args: ModelArgs,

    #[command(flatten)]
    hook_args: PostprocessArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    common::init();
    let cli = Cli::parse();

    let dataset = Dataset::from_csv_path(&cli.dataset)
        .with_context(|| format!("cannot load {}", cli.dataset.display()))?;
    let initial_prompt = std::fs::read_to_string(&cli.prompt)
        .with_context(|| format!("cannot read {}", cli.prompt.display()))?;

    let invoker = cli.model_args.invoker()?;
    let config = CalibrationConfig {
        epochs: cli.epochs,
        max_errors_per_label: cli.max_errors_per_label,
        scoring_concurrency: cli.concurrency,
        return_mode: if cli.best { ReturnMode::BestScoring } else { ReturnMode::Last },
        output_dir: cli.output_dir,
        ..CalibrationConfig::default()
    };
    preflight(invoker.as_ref(), &config.prediction_params).await?;

    let calibrator = Calibrator::new(invoker, config);
    let hook = cli.hook_args.hook();
    let outcome = calibrator.optimize(&cli.task, &initial_prompt, dataset, hook.as_ref()).await?;

    MarkdownPrinter::default().print_outcome(&outcome)?;
    if let Some(path) = cli.report_json {
        std::fs::write(&path, serde_json::to_string_pretty(&outcome.to_json())?)?;
    }
    println!("{}", outcome.prompt);
    Ok(())
}
