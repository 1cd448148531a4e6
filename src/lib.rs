//! # calprompt
//!
//! Dataset-driven prompt calibration with LLMs in Rust
//!
//! **Note: `calprompt` is now a WIP, so the APIs are subject to change.**
//!
//! ## Usage
//! `calprompt` is not released on crates.io yet. To use it, add a dependency in `Cargo.toml`
//! ```toml
//! calprompt = { git = "https://github.com/ifsheldon/calprompt.git", branch = "main"}
//! ```
//!
//! ## Why `calprompt`
//!
//! A classification prompt that reads well is not necessarily a prompt that labels well. The only honest judge is a
//! labeled dataset, so `calprompt` keeps the dataset in the loop: score the prompt, look at what it got wrong, let a
//! model explain and fix it, score again.
//!
//! ## Concepts and Design
//! Like any prompt-centric pipeline, everything starts with prompt templates. The APIs are designed to be explicit, so
//! users can track every request that is sent to a model. Cycle speed is NOT a top priority since LLM can take
//! trillions of cycles to respond to a request.
//!
//! ### Prompt Template and Placeholder
//!
//! A template looks like
//!
//! ```text
//! Is the following review positive or negative? Review: {text}
//! ```
//!
//! Now, `{text}` is a placeholder, a slot to be filled, which has a name `"text"`. Names are identifiers, so
//! `{"label": "positive"}` in an instruction is plain text.
//!
//! ### Partial Prompt and Filler
//!
//! A [`PartialPrompt`](crate::prompt::PartialPrompt) comes only from
//! [`PromptTemplate::construct_prompt`](crate::prompt::PromptTemplate::construct_prompt) and records which placeholder
//! gets filled by what value. When all placeholders are filled, [`PartialPrompt::complete`](crate::prompt::PartialPrompt::complete)
//! turns it into a concrete prompt.
//!
//! A filler is anything that fills placeholders. [`RowFiller`](crate::filler::RowFiller) fills a template from one row
//! of a [`Dataset`](crate::dataset::Dataset), where every column other than `label` is a template variable.
//!
//! ### Endpoint or LLM
//!
//! Models sit behind [`ModelInvoker`](crate::utils::llm::ModelInvoker). A reply is turned into a label by a
//! [`Postprocess`](crate::utils::postprocess::Postprocess) hook, which is a plain function supplied by the application.
//!
//! ### Calibration
//!
//! [`Calibrator::optimize`](crate::calibration::Calibrator::optimize) runs the loop: score, collect failures, analyze,
//! revise, score again, for a fixed number of epochs. Every iteration is kept in the returned history.
//!
//! ## License
//!
//! `calprompt` will always remain free under Apache license.
//!
//! ## Attribution
//! * `async_openai`: [crate::utils::llm::openai] is built on this crate.


pub mod prompt;
pub mod filler;
pub mod dataset;
pub mod calibration;
pub mod utils;
