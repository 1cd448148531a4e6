use std::io::{stdout, Write};

use termimad::{FmtText, MadSkin};

use crate::calibration::CalibrationOutcome;

/// Renders markdown to the terminal with a [MadSkin].
pub struct MarkdownPrinter {
    pub skin: MadSkin,
    pub wrap_width: Option<usize>,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self {
            skin: MadSkin::default(),
            wrap_width: None,
        }
    }
}

impl MarkdownPrinter {
    /// Render `markdown` as terminal text without printing it.
    pub fn render(&self, markdown: &str) -> String {
        FmtText::from(&self.skin, markdown, self.wrap_width).to_string()
    }

    pub fn print(&self, markdown: &str) -> std::io::Result<()> {
        let mut out = stdout().lock();
        write!(out, "{}", self.render(markdown))?;
        out.flush()
    }

    /// Print the report of a calibration run.
    pub fn print_outcome(&self, outcome: &CalibrationOutcome) -> std::io::Result<()> {
        self.print(&outcome.to_markdown())
    }
}
