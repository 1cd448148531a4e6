//! The contract between a prompt template and a dataset: every placeholder must name a variable column.

use std::error::Error;
use std::fmt;
use std::fmt::Formatter;

use log::warn;

use crate::dataset::Dataset;
use crate::prompt::PromptTemplate;

/// Checks `template` against `dataset` before any model call.
///
/// Placeholders without a column are an error naming every offending key. Columns the template never references are
/// allowed and only logged.
pub fn validate(template: &PromptTemplate, dataset: &Dataset) -> Result<(), SchemaError> {
    if dataset.is_empty() {
        return Err(SchemaError::EmptyDataset);
    }
    let columns = dataset.columns();
    let missing: Vec<String> = template
        .sorted_placeholders()
        .into_iter()
        .filter(|p| !columns.contains(p))
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingVariables {
            missing,
            available: columns.clone(),
        });
    }
    let unused: Vec<&String> = columns.iter().filter(|c| !template.placeholders.contains(*c)).collect();
    if !unused.is_empty() {
        warn!("dataset columns {:?} are not referenced by the prompt", unused);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The prompt references variables the dataset does not have.
    MissingVariables { missing: Vec<String>, available: Vec<String> },
    EmptyDataset,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::MissingVariables { missing, available } =>
                write!(f, "SchemaError: prompt placeholders {:?} have no matching dataset column, available columns are {:?}",
                       missing, available),
            SchemaError::EmptyDataset => write!(f, "SchemaError: dataset has no records"),
        }
    }
}

impl Error for SchemaError {}
