//! Runtime variable type table
//!
//! `^vars key:value` arrives as text. Keys listed here are coerced to their
//! declared type before they are merged, so `image_download_interval:30`
//! is stored as the number `30`, not the string `"30"`.

use serde_json::Value;

/// Downloader wake interval (seconds)
pub const IMAGE_DOWNLOAD_INTERVAL: &str = "image_download_interval";
/// Seconds each slide stays on screen
pub const FLIP_FREQUENCY: &str = "flip_frequency";
/// Search results per page
pub const RESULTS_PER_PAGE: &str = "results_per_page";
/// Reap threshold (seconds)
pub const MAX_FILE_AGE: &str = "max_file_age";
/// Periodic reap interval (seconds)
pub const IMAGE_CLEAN_INTERVAL: &str = "image_clean_interval";
/// Failures before a URL is blacklisted
pub const URL_RETRY: &str = "url_retry";

/// Declared type of a runtime variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    /// Non-negative integer
    Integer,
    /// Free text
    Text,
}

/// Look up the declared type of a key
pub fn declared_type(key: &str) -> Option<VarType> {
    match key {
        IMAGE_DOWNLOAD_INTERVAL | FLIP_FREQUENCY | RESULTS_PER_PAGE | MAX_FILE_AGE
        | IMAGE_CLEAN_INTERVAL | URL_RETRY => Some(VarType::Integer),
        _ => None,
    }
}

impl VarType {
    /// Coerce raw text into a JSON value of this type
    pub fn coerce(self, raw: &str) -> Result<Value, String> {
        let raw = raw.trim();
        match self {
            VarType::Integer => raw
                .parse::<u64>()
                .map(Value::from)
                .map_err(|_| format!("expected a non-negative integer, got '{}'", raw)),
            VarType::Text => Ok(Value::String(raw.to_string())),
        }
    }
}

/// Split `^vars` arguments into `(key, value)` pairs.
///
/// Pairs are separated by whitespace or commas. Tokens without a `:` or
/// with an empty key are returned as errors.
pub fn parse_pairs(args: &str) -> (Vec<(String, String)>, Vec<String>) {
    let mut pairs = Vec::new();
    let mut errors = Vec::new();
    for token in args
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        match token.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                pairs.push((key.trim().to_string(), value.trim().to_string()));
            }
            _ => errors.push(format!("malformed pair '{}', expected key:value", token)),
        }
    }
    (pairs, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_types() {
        assert_eq!(declared_type("image_download_interval"), Some(VarType::Integer));
        assert_eq!(declared_type("flip_frequency"), Some(VarType::Integer));
        assert_eq!(declared_type("results_per_page"), Some(VarType::Integer));
        assert_eq!(declared_type("nonsense"), None);
    }

    #[test]
    fn test_coerce_integer() {
        assert_eq!(VarType::Integer.coerce("30").unwrap(), Value::from(30u64));
        assert!(VarType::Integer.coerce("-3").is_err());
        assert!(VarType::Integer.coerce("thirty").is_err());
    }

    #[test]
    fn test_coerce_text() {
        assert_eq!(VarType::Text.coerce(" hi ").unwrap(), Value::from("hi"));
    }

    #[test]
    fn test_parse_pairs() {
        let (pairs, errors) = parse_pairs("image_download_interval:30, flip_frequency:7 junk :x");
        assert_eq!(
            pairs,
            vec![
                ("image_download_interval".to_string(), "30".to_string()),
                ("flip_frequency".to_string(), "7".to_string()),
            ]
        );
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_parse_pairs_empty() {
        let (pairs, errors) = parse_pairs("   ");
        assert!(pairs.is_empty());
        assert!(errors.is_empty());
    }
}
