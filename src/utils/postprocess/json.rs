use serde_json::{from_str, Value};
use anyhow::{anyhow, Result};
use std::error::Error;
use std::fmt;
use std::fmt::Formatter;


/// Filters invalid content and tries to parse the valid json string.
///
/// Returns a [serde_json::Value] if the string is valid json else an [InvalidJSON] error.
///
/// # Example
/// ```
/// use calprompt::utils::postprocess::json::filter_to_json;
/// let valid_str = "partially valid: {\"a\":\"alice\"}";
/// let json_value = filter_to_json(valid_str).expect("Expect to be fine but failed");
/// assert_eq!(json_value["a"], "alice");
///
/// let invalid_str = "partially valid: \"a\":\"alice\"}";
/// assert_eq!(filter_to_json(invalid_str).is_err(), true)
/// ```
pub fn filter_to_json(string: impl Into<String>) -> Result<Value> {
    let string = string.into();
    let left_brace_idx = string.find('{');
    let right_brace_idx = string.rfind('}');
    match (left_brace_idx, right_brace_idx) {
        (Some(lbi), Some(rbi)) if lbi < rbi => {
            let valid_json = &string[lbi..rbi + 1];
            let value = from_str(valid_json)?;
            Ok(value)
        }
        _ => Err(InvalidJSON { invalid_string: string }.into())
    }
}

/// Reads `key` from the JSON object embedded in `string`. Strings are returned as-is, other scalars in their JSON form.
pub fn extract_json_field(string: &str, key: &str) -> Result<String> {
    let value = filter_to_json(string)?;
    match value.get(key) {
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(Value::Null) | None => Err(anyhow!("JSON reply has no `{}` field: {}", key, value)),
        Some(other) => Ok(other.to_string()),
    }
}

/// Error when the string is not a valid json.
#[derive(Debug, Clone)]
pub struct InvalidJSON {
    pub invalid_string: String,
}


impl fmt::Display for InvalidJSON {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid string to be parsed:\n{}", self.invalid_string)
    }
}

impl Error for InvalidJSON {}
