//! Failure aggregation: which records a prompt got wrong, a reproducible sample of them rendered for the model, and
//! the confusion matrix of the whole pass.

use std::fmt::Write;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::dataset::{Dataset, Record};

/// Seed of the failure sampling. A fixed seed makes the same error set always render the same report.
pub const DEFAULT_SAMPLE_SEED: u64 = 42;

/// Records with `score < 0.5`, i.e. wrong predictions, in dataset order.
pub fn extract_errors(dataset: &Dataset) -> Dataset {
    dataset.filter(Record::is_error)
}

/// Render at most `max_per_label` failures per true label, sampled with [DEFAULT_SAMPLE_SEED].
pub fn summarize(errors: &Dataset, max_per_label: usize) -> String {
    FailureSample::draw(errors, max_per_label, DEFAULT_SAMPLE_SEED).render()
}

/// A label-grouped, deterministically subsampled selection of error records.
///
/// The error set is shuffled once with the seed; labels keep the order in which they first show up in the shuffled
/// sequence and each label keeps its first `max_per_label` records.
#[derive(Debug, Clone)]
pub struct FailureSample<'a> {
    columns: &'a [String],
    groups: Vec<(&'a str, Vec<&'a Record>)>,
}

impl<'a> FailureSample<'a> {
    pub fn draw(errors: &'a Dataset, max_per_label: usize, seed: u64) -> Self {
        let mut order: Vec<usize> = (0..errors.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut groups: Vec<(&'a str, Vec<&'a Record>)> = Vec::new();
        if max_per_label > 0 {
            for idx in order {
                let record = &errors.records()[idx];
                match groups.iter_mut().find(|(label, _)| *label == record.label) {
                    Some((_, group)) if group.len() < max_per_label => group.push(record),
                    Some(_) => {}
                    None => groups.push((record.label.as_str(), vec![record])),
                }
            }
        }
        Self {
            columns: errors.columns().as_slice(),
            groups,
        }
    }

    /// Sampled records, grouped by label.
    pub fn records(&self) -> impl Iterator<Item=&'a Record> + '_ {
        self.groups.iter().flat_map(|(_, group)| group.iter().copied())
    }

    /// Labels in sample order.
    pub fn labels(&self) -> Vec<&'a str> {
        self.groups.iter().map(|(label, _)| *label).collect()
    }

    pub fn count_for(&self, label: &str) -> usize {
        self.groups
            .iter()
            .find(|(l, _)| *l == label)
            .map_or(0, |(_, group)| group.len())
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, group)| group.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// One `<Sample>`/`<Prediction>`/`<GT>` block per record. Empty when there is nothing to report.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for record in self.records() {
            let sample = self.columns
                .iter()
                .zip(record.values.iter())
                .map(|(column, value)| format!("{}: {}", column, value))
                .collect::<Vec<_>>()
                .join("\n");
            let prediction = match (&record.predict, &record.failure) {
                (Some(predict), _) => predict.clone(),
                (None, Some(failure)) => format!("(no valid prediction: {})", failure),
                (None, None) => "(no prediction)".to_string(),
            };
            // writing to a String cannot fail
            let _ = write!(text, "<Sample>\n{}\n</Sample>\n<Prediction>\n{}\n</Prediction>\n<GT>\n{}\n</GT>\n",
                           sample.trim(), prediction, record.label);
        }
        text.trim().to_string()
    }
}

/// Counts of (true label, predicted label) pairs over the sorted distinct true labels.
///
/// Predictions outside the label set, including failed postprocessing, are counted per true label in `unmatched`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    labels: Vec<String>,
    counts: Vec<Vec<usize>>,
    unmatched: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let labels = dataset.distinct_labels();
        let n = labels.len();
        let mut counts = vec![vec![0; n]; n];
        let mut unmatched = vec![0; n];
        let position = |label: &str| labels.binary_search_by(|l| l.as_str().cmp(label)).ok();
        for record in dataset.records() {
            let Some(row) = position(record.label.as_str()) else { continue };
            match record.predict.as_deref().and_then(position) {
                Some(col) => counts[row][col] += 1,
                None => unmatched[row] += 1,
            }
        }
        Self { labels, counts, unmatched }
    }

    #[inline]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// How often `actual` was predicted as `predicted`. Unknown labels count 0.
    pub fn count(&self, actual: &str, predicted: &str) -> usize {
        let row = self.labels.iter().position(|l| l == actual);
        let col = self.labels.iter().position(|l| l == predicted);
        match (row, col) {
            (Some(row), Some(col)) => self.counts[row][col],
            _ => 0,
        }
    }

    pub fn unmatched(&self, actual: &str) -> usize {
        self.labels.iter().position(|l| l == actual).map_or(0, |row| self.unmatched[row])
    }

    /// Whether every matched prediction is correct.
    pub fn is_diagonal(&self) -> bool {
        self.counts
            .iter()
            .enumerate()
            .all(|(row, counts)| counts.iter().enumerate().all(|(col, &c)| row == col || c == 0))
    }

    /// Text form embedded in analysis requests.
    pub fn to_prompt_text(&self) -> String {
        let mut text = format!("Confusion matrix columns: {:?} the matrix data:", self.labels);
        for ((label, counts), unmatched) in self.labels.iter().zip(&self.counts).zip(&self.unmatched) {
            let cells = counts.iter().map(usize::to_string).collect::<Vec<_>>().join(" ");
            let _ = write!(text, "\n{}: [{}]", label, cells);
            if *unmatched > 0 {
                let _ = write!(text, " (+{} predictions outside the label set)", unmatched);
            }
        }
        text
    }
}

#[cfg(test)]
mod test_report {
    use super::{extract_errors, summarize, ConfusionMatrix, FailureSample};
    use crate::dataset::{Dataset, Record};

    fn scored(rows: &[(&str, &str, &str)]) -> Dataset {
        let mut dataset = Dataset::new(vec!["text".to_string()]).unwrap();
        for (text, label, predict) in rows {
            let mut record = Record::new(*label, vec![text.to_string()]);
            record.predict = Some(predict.to_string());
            record.score = Some((label == predict) as u8);
            dataset.push(record).unwrap();
        }
        dataset
    }

    fn many_errors() -> Dataset {
        let rows: Vec<(String, &str, &str)> = (0..12)
            .map(|i| (format!("row {}", i), if i % 3 == 0 { "a" } else { "b" }, "c"))
            .collect();
        let rows: Vec<(&str, &str, &str)> = rows.iter().map(|(t, l, p)| (t.as_str(), *l, *p)).collect();
        scored(&rows)
    }

    #[test]
    fn test_extract_errors_partitions() {
        let dataset = scored(&[("x", "a", "a"), ("y", "a", "b"), ("z", "b", "b"), ("w", "b", "a")]);
        let errors = extract_errors(&dataset);
        assert_eq!(errors.records().iter().map(|r| r.values[0].as_str()).collect::<Vec<_>>(), vec!["y", "w"]);
        assert_eq!(errors.len() + dataset.filter(|r| r.is_correct()).len(), dataset.len());
    }

    #[test]
    fn test_sample_is_bounded_and_deterministic() {
        let errors = extract_errors(&many_errors());
        let sample = FailureSample::draw(&errors, 3, 42);
        assert_eq!(sample.count_for("a"), 3);
        assert_eq!(sample.count_for("b"), 3);
        assert_eq!(sample.len(), 6);
        let mut labels = sample.labels();
        labels.sort();
        assert_eq!(labels, vec!["a", "b"]);
        assert_eq!(summarize(&errors, 3), summarize(&errors, 3));

        let all = FailureSample::draw(&errors, 100, 42);
        assert_eq!(all.count_for("a"), 4);
        assert_eq!(all.count_for("b"), 8);
        assert!(FailureSample::draw(&errors, 0, 42).is_empty());
    }

    #[test]
    fn test_render() {
        let errors = extract_errors(&scored(&[("fine", "positive", "negative")]));
        assert_eq!(summarize(&errors, 5),
                   "<Sample>\ntext: fine\n</Sample>\n<Prediction>\nnegative\n</Prediction>\n<GT>\npositive\n</GT>");
        assert_eq!(summarize(&Dataset::default(), 5), "");
    }

    #[test]
    fn test_render_failed_postprocess() {
        let mut dataset = Dataset::new(vec!["text".to_string()]).unwrap();
        let mut record = Record::new("positive", vec!["fine".to_string()]);
        record.failure = Some("unparseable".to_string());
        record.score = Some(0);
        dataset.push(record).unwrap();
        assert!(summarize(&extract_errors(&dataset), 5).contains("(no valid prediction: unparseable)"));
    }

    #[test]
    fn test_confusion_matrix() {
        let perfect = scored(&[("x", "pos", "pos"), ("y", "neg", "neg"), ("z", "pos", "pos")]);
        let matrix = ConfusionMatrix::from_dataset(&perfect);
        assert_eq!(matrix.labels(), &["neg".to_string(), "pos".to_string()]);
        assert!(matrix.is_diagonal());
        assert_eq!(matrix.count("pos", "pos"), 2);
        assert_eq!(matrix.count("neg", "pos"), 0);

        let mixed = scored(&[("x", "pos", "neg"), ("y", "neg", "neg"), ("z", "pos", "maybe")]);
        let matrix = ConfusionMatrix::from_dataset(&mixed);
        assert!(!matrix.is_diagonal());
        assert_eq!(matrix.unmatched("pos"), 1);
        assert_eq!(matrix.to_prompt_text(),
                   "Confusion matrix columns: [\"neg\", \"pos\"] the matrix data:\nneg: [1 0]\npos: [1 0] (+1 predictions outside the label set)");
    }
}
