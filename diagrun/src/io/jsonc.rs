//! Reading JSON-with-comments files from disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::core::jsonc::strip_comments;

/// Read `path`, strip `//` comments, and parse the rest as JSON.
pub fn read_jsonc(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&strip_comments(&contents))
        .with_context(|| format!("parse {}", path.display()))
}
