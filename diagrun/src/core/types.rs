//! Loosely-typed scalar shapes that appear in settings and descriptor files.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A field that may be written as a single string or a list of strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// A scalar case-list value: years may be written as `1990` or `"1990"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Scalar {
    /// Empty strings count as unset, matching how case entries are merged.
    pub fn is_blank(&self) -> bool {
        matches!(self, Scalar::Str(value) if value.trim().is_empty())
    }

    /// Rendering used when exporting to a child environment; booleans become `1`/`0`.
    pub fn to_env_value(&self) -> String {
        match self {
            Scalar::Bool(true) => "1".to_string(),
            Scalar::Bool(false) => "0".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_or_many_accepts_both_shapes() {
        let one: OneOrMany = serde_json::from_str(r#""atmos""#).expect("one");
        let many: OneOrMany = serde_json::from_str(r#"["atmos", "ocean"]"#).expect("many");
        assert_eq!(one.into_vec(), vec!["atmos"]);
        assert_eq!(many.into_vec(), vec!["atmos", "ocean"]);
    }

    #[test]
    fn scalar_env_rendering() {
        assert_eq!(Scalar::Int(1990).to_env_value(), "1990");
        assert_eq!(Scalar::Bool(true).to_env_value(), "1");
        assert_eq!(Scalar::from("x").to_env_value(), "x");
        assert!(Scalar::from("  ").is_blank());
        assert!(!Scalar::Int(0).is_blank());
    }
}
