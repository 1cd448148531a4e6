use std::collections::{HashMap, HashSet};
use regex::{Captures, Regex};
use lazy_static::lazy_static;


lazy_static! {
    /// Matches `{name}` where `name` is an identifier. Braces followed by anything else (JSON, prose) are left alone.
    pub(crate) static ref PLACEHOLDER_MATCH_RE: Regex = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

#[inline]
pub(crate) fn strip_format(key: &str) -> &str {
    //! Strips "{" and "}" for a string, which is algorithmically unsafe.
    //! Ensure the string is properly formatted like "{a}".
    &key[1..key.len() - 1]
}

/// Replaces every placeholder found in `mapping` in a single pass, so filled values are never rescanned.
///
/// Placeholders without a value in `mapping` are kept verbatim.
pub(crate) fn replace_all_placeholders(original: &str, mapping: &HashMap<String, Option<String>>) -> String {
    PLACEHOLDER_MATCH_RE
        .replace_all(original, |captures: &Captures| {
            let match_text = &captures[0];
            match mapping.get(strip_format(match_text)) {
                Some(Some(value)) => value.clone(),
                _ => match_text.to_string(),
            }
        })
        .into_owned()
}

pub fn get_placeholders(string: &str) -> HashSet<String> {
    PLACEHOLDER_MATCH_RE.captures_iter(string)
        .map(|captures| strip_format(&captures[0]).to_string())
        .collect()
}

#[cfg(test)]
mod string_tests {
    use std::collections::{HashMap, HashSet};
    use super::{get_placeholders, replace_all_placeholders};

    #[test]
    fn test_get_keys() {
        let string = "{a}";
        let keys = get_placeholders(string);
        let expect_keys = HashSet::from(["a".to_string()]);
        assert_eq!(expect_keys, keys);

        let string = "{a\n}";
        let keys = get_placeholders(string);
        assert_eq!(0, keys.len());

        let string = "{a}    {b_2}";
        let keys = get_placeholders(string);
        let expect_keys = HashSet::from(["a".to_string(), "b_2".to_string()]);
        assert_eq!(expect_keys, keys);

        let string = r#"Answer as {"label": "positive"} or { text }"#;
        assert!(get_placeholders(string).is_empty());
    }

    #[test]
    fn test_replace() {
        let string = "{a} and {b} and {a}";
        let mapping = HashMap::from([
            ("a".to_string(), Some("alice".to_string())),
            ("b".to_string(), Some("bob {a}".to_string())),
        ]);

        assert_eq!("alice and bob {a} and alice", replace_all_placeholders(string, &mapping));
    }

    #[test]
    fn test_replace_keeps_unknown() {
        let mapping = HashMap::from([("a".to_string(), None)]);
        assert_eq!("{a} {c}", replace_all_placeholders("{a} {c}", &mapping));
    }
}
