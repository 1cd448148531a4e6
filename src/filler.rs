use crate::dataset::Record;
use crate::prompt::PartialPrompt;
use anyhow::Result;

pub trait FillPlaceholders {
    fn placeholders_to_fill(&self) -> &Vec<String>;
}

pub trait Fill: FillPlaceholders {
    fn fill(&self, partial_prompt: &mut PartialPrompt) -> Result<()>;
}

pub trait FillWith<CTX>: FillPlaceholders {
    fn fill_with(&self, partial_prompt: &mut PartialPrompt, context: CTX) -> Result<CTX>;
}

impl<T: FillWith<()>> Fill for T {
    fn fill(&self, partial_prompt: &mut PartialPrompt) -> Result<()> {
        self.fill_with(partial_prompt, ())
    }
}

/// Fills a template with the variable columns of one dataset record.
///
/// Columns the template does not reference are skipped; placeholders without a column stay unfilled and surface when
/// the partial prompt is completed.
pub struct RowFiller<'a> {
    columns: &'a Vec<String>,
    record: &'a Record,
}

impl<'a> RowFiller<'a> {
    pub fn new(columns: &'a Vec<String>, record: &'a Record) -> Self {
        Self { columns, record }
    }
}

impl FillPlaceholders for RowFiller<'_> {
    fn placeholders_to_fill(&self) -> &Vec<String> {
        self.columns
    }
}

impl FillWith<()> for RowFiller<'_> {
    fn fill_with(&self, partial_prompt: &mut PartialPrompt, context: ()) -> Result<()> {
        for (column, value) in self.columns.iter().zip(self.record.values.iter()) {
            if partial_prompt.has_placeholder(column) {
                partial_prompt.try_fill(column.as_str(), value.as_str())?;
            }
        }
        Ok(context)
    }
}
