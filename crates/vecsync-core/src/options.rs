//! Options string parser
//!
//! Vector columns are described by flat option strings such as
//! `type=hnsw,dim=1536,online=Y,idcol=id`. An optional `|` acts as a start
//! marker: everything before the first `|` is ignored, which lets the catalog
//! store a prefix like `MYVECTOR(...)|type=hnsw,...`.

use std::collections::HashMap;

use crate::error::{Result, VecsyncError};

/// Parsed `key=value` options.
///
/// A malformed string still produces an `Options` value, but
/// [`Options::is_valid`] reports `false` and it carries no entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    values: HashMap<String, String>,
    valid: bool,
}

impl Options {
    /// Parse an options string.
    pub fn parse(input: &str) -> Self {
        match parse_pairs(input) {
            Ok(values) => Self {
                values,
                valid: true,
            },
            Err(_) => Self {
                values: HashMap::new(),
                valid: false,
            },
        }
    }

    /// Parse an options string, failing on malformed input.
    pub fn try_parse(input: &str) -> Result<Self> {
        parse_pairs(input).map(|values| Self {
            values,
            valid: true,
        })
    }

    /// Whether the input string was well formed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Look up an option.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Look up an option, returning `""` when absent.
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    /// Integer option. Missing yields `default`; a present non-integer is an error.
    pub fn get_int(&self, name: &str, default: i64) -> Result<i64> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| VecsyncError::InvalidOptionValue {
                    key: name.to_string(),
                    value: raw.to_string(),
                }),
        }
    }

    /// Flag option, true only for `y` or `Y`.
    pub fn get_bool(&self, name: &str) -> bool {
        matches!(self.get(name), Some("y" | "Y"))
    }

    /// Set or replace an option.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Number of options.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no options were parsed.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn parse_pairs(input: &str) -> Result<HashMap<String, String>> {
    let body = match input.find('|') {
        Some(marker) => &input[marker + 1..],
        None => input,
    };

    let mut values = HashMap::new();
    for segment in body.split(',') {
        if segment.is_empty() {
            continue;
        }
        let entry = normalize_spaces(segment);
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| VecsyncError::InvalidOptions(format!("missing '=' in '{entry}'")))?;
        let key = normalize_spaces(key);
        let value = normalize_spaces(value);
        if key.is_empty() || value.is_empty() {
            return Err(VecsyncError::InvalidOptions(format!(
                "empty key or value in '{entry}'"
            )));
        }
        values.insert(key, value);
    }
    Ok(values)
}

/// Trim leading/trailing spaces and collapse interior runs of spaces to one.
fn normalize_spaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for c in s.trim_matches(' ').chars() {
        if c == ' ' {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let opts = Options::parse("type=hnsw,dim=50,online=Y,idcol=bookid");
        assert!(opts.is_valid());
        assert_eq!(opts.len(), 4);
        assert_eq!(opts.get("type"), Some("hnsw"));
        assert_eq!(opts.get("idcol"), Some("bookid"));
        assert!(opts.get_bool("online"));
        assert_eq!(opts.get_int("dim", 0).unwrap(), 50);
    }

    #[test]
    fn test_start_marker_and_spaces() {
        let opts = Options::parse("MYVECTOR(type=hnsw)| type = hnsw ,  M  =  64 , note=a   b");
        assert!(opts.is_valid());
        assert_eq!(opts.get("type"), Some("hnsw"));
        assert_eq!(opts.get("M"), Some("64"));
        assert_eq!(opts.get("note"), Some("a b"));
    }

    #[test]
    fn test_empty_segments_are_skipped() {
        let opts = Options::parse("a=1,,b=2,");
        assert!(opts.is_valid());
        assert_eq!(opts.len(), 2);
    }

    #[test]
    fn test_malformed() {
        assert!(!Options::parse("a=1,b").is_valid());
        assert!(!Options::parse("=1").is_valid());
        assert!(!Options::parse("a=").is_valid());
        assert!(Options::try_parse("a=1,b").is_err());
        assert!(Options::parse("a=1,b").is_empty());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let opts = Options::parse("expr=a=b");
        assert_eq!(opts.get("expr"), Some("a=b"));
    }

    #[test]
    fn test_int_option() {
        let opts = Options::parse("dim=abc,size=10");
        assert_eq!(opts.get_int("missing", 7).unwrap(), 7);
        assert_eq!(opts.get_int("size", 0).unwrap(), 10);
        assert!(matches!(
            opts.get_int("dim", 0),
            Err(VecsyncError::InvalidOptionValue { .. })
        ));
    }

    #[test]
    fn test_flags() {
        let opts = Options::parse("online=n,track=y");
        assert!(!opts.get_bool("online"));
        assert!(opts.get_bool("track"));
        assert!(!opts.get_bool("absent"));
        assert_eq!(opts.get_or_empty("absent"), "");
    }

    #[test]
    fn test_flags_accept_only_y() {
        let opts = Options::parse("a=yes,b=true,c=1,d=Y,e=YES");
        assert!(!opts.get_bool("a"));
        assert!(!opts.get_bool("b"));
        assert!(!opts.get_bool("c"));
        assert!(opts.get_bool("d"));
        assert!(!opts.get_bool("e"));
    }
}
