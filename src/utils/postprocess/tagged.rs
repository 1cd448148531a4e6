//! Delimited-text extraction.
//!
//! Model-mediated steps ask the model to wrap its answer in a pair of markup tags, e.g. `<analysis>...</analysis>`.
//! Extraction takes the first such pair and reports a typed [ExtractionError] when there is none, so a caller can
//! decide between retrying the call and giving up.

use std::error::Error;
use std::fmt;
use std::fmt::Formatter;

use regex::Regex;

/// Returns the content between the first `<tag>` and the next `</tag>`, untrimmed. Spans lines.
///
/// # Example
/// ```
/// use calprompt::utils::postprocess::tagged::extract_tagged;
/// let reply = "Sure.\n<new_prompt>\nClassify {text}.\n</new_prompt>";
/// assert_eq!(extract_tagged(reply, "new_prompt").unwrap().trim(), "Classify {text}.");
/// assert!(extract_tagged("no tags here", "new_prompt").is_err());
/// ```
pub fn extract_tagged(text: &str, tag: &str) -> Result<String, ExtractionError> {
    let tag_re = tag_regex(tag);
    tag_re
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|content| content.as_str().to_string())
        .ok_or_else(|| ExtractionError {
            tag: tag.to_string(),
            response: text.to_string(),
        })
}

fn tag_regex(tag: &str) -> Regex {
    let tag = regex::escape(tag);
    // the escaped tag cannot break the pattern, so this always compiles
    Regex::new(&format!(r"(?s)<{tag}>(.*?)</{tag}>")).unwrap()
}

/// Error when the expected tag pair is absent from a model response.
#[derive(Debug, Clone)]
pub struct ExtractionError {
    pub tag: String,
    pub response: String,
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ExtractionError: no <{tag}>...</{tag}> section in response:\n{response}",
               tag = self.tag,
               response = self.response)
    }
}

impl Error for ExtractionError {}

#[cfg(test)]
mod test_tagged {
    use super::extract_tagged;

    #[test]
    fn test_first_match_wins() {
        let text = "<analysis>first</analysis> and <analysis>second</analysis>";
        assert_eq!(extract_tagged(text, "analysis").unwrap(), "first");
    }

    #[test]
    fn test_multiline() {
        let text = "Thinking...\n<analysis>\nline one\nline two\n</analysis>\nbye";
        assert_eq!(extract_tagged(text, "analysis").unwrap(), "\nline one\nline two\n");
    }

    #[test]
    fn test_missing_or_unclosed() {
        let err = extract_tagged("<analysis>never closed", "analysis").expect_err("unclosed tag");
        assert_eq!(err.tag, "analysis");
        assert_eq!(err.response, "<analysis>never closed");
        assert!(extract_tagged("<Analysis>x</Analysis>", "analysis").is_err());
    }

    #[test]
    fn test_tag_is_escaped() {
        assert_eq!(extract_tagged("<a.b>x</a.b><aXb>y</aXb>", "a.b").unwrap(), "x");
    }
}
