//! Score one prompt on a labeled CSV and keep the predictions.
//!
//! ```text
//! cargo run --example evaluate -- --dataset reviews.csv --prompt prompt.txt --output-dir runs
//! ```

#[path = "../common/mod.rs"]
mod common;

use std::path::PathBuf;

use anyhow::{Context, Result};
use calprompt::calibration::report::{extract_errors, summarize, ConfusionMatrix};
use calprompt::calibration::{CalibrationConfig, Calibrator};
use calprompt::dataset::Dataset;
use clap::Parser;
use common::{ModelArgs, PostprocessArgs};

#[derive(Parser, Debug)]
#[command(about = "Score a prompt against a labeled dataset")]
struct Cli {
    /// CSV with a `label` column and one column per prompt variable
    #[arg(long)]
    dataset: PathBuf,

    /// File holding the prompt, with `{column}` placeholders
    #[arg(long)]
    prompt: PathBuf,

    /// Where the scored dataset is written
    #[arg(long, default_value = "predictions")]
    output_dir: PathBuf,

    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Failure cases per label to print
    #[arg(long, default_value_t = 3)]
    show_errors: usize,

    #[command(flatten)]
    model_args: ModelArgs,

    #[command(flatten)]
    hook_args: PostprocessArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    common::init();
    let cli = Cli::parse();

    let mut dataset = Dataset::from_csv_path(&cli.dataset)
        .with_context(|| format!("cannot load {}", cli.dataset.display()))?;
    let prompt = std::fs::read_to_string(&cli.prompt)
        .with_context(|| format!("cannot read {}", cli.prompt.display()))?;

    let calibrator = Calibrator::new(cli.model_args.invoker()?, CalibrationConfig {
        scoring_concurrency: cli.concurrency,
        output_dir: Some(cli.output_dir),
        ..CalibrationConfig::default()
    });
    let hook = cli.hook_args.hook();
    let accuracy = calibrator.evaluate(&prompt, &mut dataset, hook.as_ref()).await?;

    println!("accuracy: {:.3}", accuracy);
    println!("{}", ConfusionMatrix::from_dataset(&dataset).to_prompt_text());
    let failures = summarize(&extract_errors(&dataset), cli.show_errors);
    if !failures.is_empty() {
        println!("{}", failures);
    }
    Ok(())
}
