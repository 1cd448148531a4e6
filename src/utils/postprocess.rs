//! Post-processing of model replies.
//!
//! A [Postprocess] hook turns a raw reply into a label that can be compared with ground truth. The host application
//! passes it in as a plain function value; closures of type `Fn(&str) -> anyhow::Result<String>` are hooks already.

use anyhow::Result;

pub mod json;
pub mod tagged;

/// Maps raw model text to a normalized label. Returning an error marks that one record as a scoring failure.
pub trait Postprocess: Send + Sync {
    fn postprocess(&self, raw: &str) -> Result<String>;
}

/// Blanket impl of Postprocess for Fn(&str) -> Result<String>.
impl<F> Postprocess for F where F: Fn(&str) -> Result<String> + Send + Sync {
    fn postprocess(&self, raw: &str) -> Result<String> {
        self(raw)
    }
}

/// Surrounding whitespace removed.
pub fn trimmed(raw: &str) -> Result<String> {
    Ok(raw.trim().to_string())
}

/// Trimmed and lowercased, for case-insensitive labels.
pub fn lowercase(raw: &str) -> Result<String> {
    Ok(raw.trim().to_lowercase())
}

/// Takes the content of the first `<tag>...</tag>` pair, trimmed.
#[derive(Debug, Clone)]
pub struct TaggedLabel {
    pub tag: String,
}

impl TaggedLabel {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl Postprocess for TaggedLabel {
    fn postprocess(&self, raw: &str) -> Result<String> {
        Ok(tagged::extract_tagged(raw, &self.tag)?.trim().to_string())
    }
}

/// Takes a string field of the JSON object embedded in the reply.
#[derive(Debug, Clone)]
pub struct JsonField {
    pub key: String,
}

impl JsonField {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Postprocess for JsonField {
    fn postprocess(&self, raw: &str) -> Result<String> {
        json::extract_json_field(raw, &self.key)
    }
}

#[cfg(test)]
mod test_postprocess {
    use super::{lowercase, trimmed, JsonField, Postprocess, TaggedLabel};

    #[test]
    fn test_builtin_hooks() {
        assert_eq!(trimmed.postprocess("  Positive \n").unwrap(), "Positive");
        assert_eq!(lowercase.postprocess("  Positive \n").unwrap(), "positive");
        assert_eq!(TaggedLabel::new("answer").postprocess("so <answer> negative </answer>").unwrap(), "negative");
        assert!(TaggedLabel::new("answer").postprocess("negative").is_err());
        assert_eq!(JsonField::new("label").postprocess("Result: {\"label\": \"spam\"}").unwrap(), "spam");
    }

    #[test]
    fn test_closure_hook() {
        let hook = |raw: &str| -> anyhow::Result<String> {
            match raw.trim() {
                "yes" => Ok("positive".to_string()),
                "no" => Ok("negative".to_string()),
                other => anyhow::bail!("unexpected reply {}", other),
            }
        };
        assert_eq!(hook.postprocess("yes").unwrap(), "positive");
        assert!(hook.postprocess("maybe").is_err());
    }
}
