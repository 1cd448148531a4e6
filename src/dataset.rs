//! # Dataset
//! A labeled table of records. The reserved column `label` holds the ground truth, every other column is a template
//! variable keyed by its header. Scoring adds `predict` and `score`, which are overwritten on every pass.
//!
//! Datasets come in and go out as CSV (header row, UTF-8). A scored dataset is written with its variable columns first,
//! then `label`, `predict` and `score`.

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::fmt::Formatter;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;

use crate::utils::timing::filename_timestamp;

pub const LABEL_COLUMN: &str = "label";
pub const PREDICT_COLUMN: &str = "predict";
pub const SCORE_COLUMN: &str = "score";

/// One row of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Ground truth.
    pub label: String,
    /// Variable values, aligned with [Dataset::columns].
    pub values: Vec<String>,
    /// Postprocessed model output. `None` before scoring or when the postprocess hook failed.
    pub predict: Option<String>,
    /// 1 if `predict == label`, else 0. `None` before scoring.
    pub score: Option<u8>,
    /// Why postprocessing failed for this record, if it did.
    pub failure: Option<String>,
}

impl Record {
    pub fn new(label: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            label: label.into(),
            values,
            predict: None,
            score: None,
            failure: None,
        }
    }

    /// Whether this record was scored and got it wrong. Scores are binary, so `< 0.5` means `0`.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self.score, Some(s) if (s as f64) < 0.5)
    }

    #[inline]
    pub fn is_correct(&self) -> bool {
        matches!(self.score, Some(s) if (s as f64) >= 0.5)
    }

    /// Drops any previous prediction, keeping the inputs and the label.
    pub(crate) fn clear_prediction(&mut self) {
        self.predict = None;
        self.score = None;
        self.failure = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    records: Vec<Record>,
}

impl Dataset {
    /// Create an empty dataset with the given variable columns.
    pub fn new(columns: Vec<String>) -> Result<Self, DatasetError> {
        if let Some(reserved) = columns.iter().find(|c| is_reserved(c)) {
            return Err(DatasetError::ReservedColumn { column: reserved.clone() });
        }
        Ok(Self { columns, records: Vec::new() })
    }

    /// Append a record. The number of values must match the number of variable columns.
    pub fn push(&mut self, record: Record) -> Result<(), DatasetError> {
        if record.values.len() != self.columns.len() {
            return Err(DatasetError::RowWidth {
                row: self.records.len(),
                expected: self.columns.len(),
                found: record.values.len(),
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Variable column names, in source order. Never contains the reserved columns.
    #[inline]
    pub fn columns(&self) -> &Vec<String> {
        &self.columns
    }

    #[inline]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[inline]
    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A dataset with the same columns holding the records that satisfy `predicate`, in order.
    pub fn filter(&self, predicate: impl Fn(&Record) -> bool) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            records: self.records.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    /// Sorted distinct ground-truth labels.
    pub fn distinct_labels(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| r.label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// `count(score == 1) / count(rows)`. Unscored records count as wrong; an empty dataset scores 0.
    pub fn mean_score(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let correct = self.records.iter().filter(|r| r.is_correct()).count();
        correct as f64 / self.records.len() as f64
    }

    /// Read a dataset from CSV. `predict` and `score` columns from an earlier run are dropped.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(idx, h)| if idx == 0 { h.trim_start_matches('\u{feff}').to_string() } else { h.to_string() })
            .collect();
        let label_idx = headers
            .iter()
            .position(|h| h == LABEL_COLUMN)
            .ok_or_else(|| DatasetError::MissingLabelColumn { found: headers.clone() })?;
        let variable_idx: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !is_reserved(h))
            .map(|(idx, _)| idx)
            .collect();
        let mut dataset = Dataset::new(variable_idx.iter().map(|&idx| headers[idx].clone()).collect())?;
        for row in reader.records() {
            let row = row?;
            let label = row.get(label_idx).unwrap_or_default();
            let values = variable_idx
                .iter()
                .map(|&idx| row.get(idx).unwrap_or_default().to_string())
                .collect();
            dataset.push(Record::new(label, values))?;
        }
        Ok(dataset)
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        Self::from_csv_reader(File::open(path)?)
    }

    /// Write the dataset as CSV: variable columns, then `label`, `predict`, `score`.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), DatasetError> {
        let mut writer = csv::Writer::from_writer(writer);
        let mut header: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        header.extend([LABEL_COLUMN, PREDICT_COLUMN, SCORE_COLUMN]);
        writer.write_record(&header)?;
        for record in &self.records {
            let score = record.score.map(|s| s.to_string()).unwrap_or_default();
            let mut row: Vec<&str> = record.values.iter().map(String::as_str).collect();
            row.push(record.label.as_str());
            row.push(record.predict.as_deref().unwrap_or_default());
            row.push(score.as_str());
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Persist as `<dir>/<prefix>_<YYYYmmdd-HHMMSS>.csv` and return the path.
    pub fn save_timestamped(&self, dir: impl AsRef<Path>, prefix: &str) -> Result<PathBuf, DatasetError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_{}.csv", prefix, filename_timestamp(&Local::now())));
        self.write_csv(File::create(&path)?)?;
        info!("scored dataset written to {}", path.display());
        Ok(path)
    }
}

#[inline]
fn is_reserved(column: &str) -> bool {
    column == LABEL_COLUMN || column == PREDICT_COLUMN || column == SCORE_COLUMN
}

/// Errors when loading, building or persisting a dataset.
#[derive(Debug)]
pub enum DatasetError {
    Io(std::io::Error),
    Csv(csv::Error),
    /// The table has no `label` column.
    MissingLabelColumn { found: Vec<String> },
    /// A variable column uses a reserved name.
    ReservedColumn { column: String },
    RowWidth { row: usize, expected: usize, found: usize },
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::Io(e) => write!(f, "DatasetError: io: {}", e),
            DatasetError::Csv(e) => write!(f, "DatasetError: csv: {}", e),
            DatasetError::MissingLabelColumn { found } =>
                write!(f, "DatasetError: dataset must have a `{}` column, found columns {:?}", LABEL_COLUMN, found),
            DatasetError::ReservedColumn { column } =>
                write!(f, "DatasetError: `{}` is reserved and cannot be a variable column", column),
            DatasetError::RowWidth { row, expected, found } =>
                write!(f, "DatasetError: row {} has {} values, expected {}", row, found, expected),
        }
    }
}

impl Error for DatasetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DatasetError::Io(e) => Some(e),
            DatasetError::Csv(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DatasetError {
    fn from(e: std::io::Error) -> Self {
        DatasetError::Io(e)
    }
}

impl From<csv::Error> for DatasetError {
    fn from(e: csv::Error) -> Self {
        DatasetError::Csv(e)
    }
}

#[cfg(test)]
mod test_dataset {
    use super::{Dataset, DatasetError, Record};

    const CSV: &str = "text,label,source\ngreat film,positive,imdb\nboring,negative,rt\n";

    #[test]
    fn test_from_csv() {
        let dataset = Dataset::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(dataset.columns(), &vec!["text".to_string(), "source".to_string()]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records()[1].label, "negative");
        assert_eq!(dataset.records()[1].values, vec!["boring".to_string(), "rt".to_string()]);
        assert_eq!(dataset.distinct_labels(), vec!["negative".to_string(), "positive".to_string()]);
    }

    #[test]
    fn test_missing_label_column() {
        let err = Dataset::from_csv_reader("text,topic\na,b\n".as_bytes()).expect_err("no label column");
        assert!(matches!(err, DatasetError::MissingLabelColumn { .. }));
    }

    #[test]
    fn test_write_and_reload_drops_scoring_columns() {
        let mut dataset = Dataset::from_csv_reader(CSV.as_bytes()).unwrap();
        for record in dataset.records_mut() {
            record.predict = Some("positive".to_string());
            record.score = Some((record.label == "positive") as u8);
        }
        let mut buffer = Vec::new();
        dataset.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("text,source,label,predict,score\n"));
        assert!(text.contains("boring,rt,negative,positive,0"));

        let reloaded = Dataset::from_csv_reader(buffer.as_slice()).unwrap();
        assert_eq!(reloaded.columns(), dataset.columns());
        assert!(reloaded.records().iter().all(|r| r.predict.is_none() && r.score.is_none()));
    }

    #[test]
    fn test_mean_score_and_partition() {
        let mut dataset = Dataset::new(vec!["text".to_string()]).unwrap();
        for (idx, score) in [1u8, 0, 1, 1].into_iter().enumerate() {
            let mut record = Record::new("positive", vec![format!("row {}", idx)]);
            record.score = Some(score);
            dataset.push(record).unwrap();
        }
        assert_eq!(dataset.mean_score(), 0.75);
        let errors = dataset.filter(|r| r.is_error());
        let correct = dataset.filter(|r| r.is_correct());
        assert_eq!(errors.len() + correct.len(), dataset.len());
        assert_eq!(Dataset::default().mean_score(), 0.0);
    }

    #[test]
    fn test_row_width_and_reserved() {
        let mut dataset = Dataset::new(vec!["text".to_string()]).unwrap();
        let err = dataset.push(Record::new("x", vec![])).expect_err("too few values");
        assert!(matches!(err, DatasetError::RowWidth { row: 0, expected: 1, found: 0 }));
        assert!(matches!(Dataset::new(vec!["score".to_string()]), Err(DatasetError::ReservedColumn { .. })));
    }

    #[test]
    fn test_save_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::from_csv_reader(CSV.as_bytes()).unwrap();
        let path = dataset.save_timestamped(dir.path(), "predict").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("predict_") && name.ends_with(".csv"));
        assert_eq!(Dataset::from_csv_path(&path).unwrap().len(), 2);
    }
}
