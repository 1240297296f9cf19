//! Variable-name and unit translation between naming conventions.
//!
//! Tables come from `fieldlist_*.jsonc` files. `CF` is built in: it
//! translates every name to itself and carries a fixed axis table.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::multimap::BiMultiMap;
use crate::core::types::OneOrMany;
use crate::error::TranslationError;
use crate::io::jsonc::read_jsonc;

/// Name of the identity convention.
pub const CANONICAL: &str = "CF";

const FIELDLIST_PREFIX: &str = "fieldlist_";
const FIELDLIST_EXT: &str = "jsonc";

/// One coordinate axis of a convention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AxisSpec {
    pub axis: String,
    /// Environment variable that receives the axis name in POD processes.
    #[serde(default, alias = "MDTF_envvar", skip_serializing_if = "Option::is_none")]
    pub envvar: Option<String>,
}

/// Tables of one convention: canonical name -> convention name(s).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConventionTable {
    pub axes: BTreeMap<String, AxisSpec>,
    pub variables: BiMultiMap<String, String>,
    pub units: BiMultiMap<String, String>,
    /// File the convention was loaded from; `None` for the built-in one.
    pub source: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct FieldlistFile {
    convention_name: OneOrMany,
    #[serde(default)]
    axes: BTreeMap<String, AxisSpec>,
    #[serde(default)]
    var_names: BTreeMap<String, OneOrMany>,
    #[serde(default)]
    units: BTreeMap<String, OneOrMany>,
}

/// All known conventions, keyed by name (aliases share one table).
#[derive(Debug, Clone)]
pub struct VariableTranslator {
    conventions: BTreeMap<String, ConventionTable>,
}

impl Default for VariableTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableTranslator {
    /// Translator that knows only `CF`.
    pub fn new() -> Self {
        let mut conventions = BTreeMap::new();
        conventions.insert(CANONICAL.to_string(), canonical_table());
        Self { conventions }
    }

    /// Load every `fieldlist_*.jsonc` in `dir`, in file-name order.
    ///
    /// A missing directory leaves only `CF`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut translator = Self::new();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no conventions directory");
            return Ok(translator);
        }
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| is_fieldlist(path))
            .collect();
        files.sort();
        for file in &files {
            translator.register_file(file)?;
        }
        info!(
            count = translator.conventions.len(),
            "loaded naming conventions"
        );
        Ok(translator)
    }

    /// Parse one fieldlist file and register all of its convention names.
    pub fn register_file(&mut self, path: &Path) -> Result<()> {
        let value = read_jsonc(path)?;
        let file: FieldlistFile = serde_json::from_value(value)
            .with_context(|| format!("deserialize {}", path.display()))?;
        let names = file.convention_name.into_vec();
        let table = ConventionTable {
            axes: file.axes,
            variables: expand(file.var_names),
            units: expand(file.units),
            source: Some(path.to_path_buf()),
        };
        self.register(&names, table)?;
        Ok(())
    }

    /// Register `table` under every alias in `names`.
    ///
    /// Nothing is registered if any alias is already known.
    pub fn register(&mut self, names: &[String], table: ConventionTable) -> Result<(), TranslationError> {
        let source = table.source.clone().unwrap_or_default();
        if let Some(name) = names.iter().find(|name| self.conventions.contains_key(*name)) {
            return Err(TranslationError::DuplicateConvention {
                name: name.clone(),
                path: source,
            });
        }
        for name in names {
            debug!(convention = %name, source = %source.display(), "registered convention");
            self.conventions.insert(name.clone(), table.clone());
        }
        Ok(())
    }

    pub fn contains(&self, convention: &str) -> bool {
        self.conventions.contains_key(convention)
    }

    pub fn conventions(&self) -> impl Iterator<Item = &str> {
        self.conventions.keys().map(String::as_str)
    }

    pub fn axes(&self, convention: &str) -> Result<&BTreeMap<String, AxisSpec>, TranslationError> {
        Ok(&self.table(convention)?.axes)
    }

    /// Canonical name(s) whose `convention` spelling is `name`, sorted.
    pub fn to_canonical(&self, convention: &str, name: &str) -> Result<Vec<String>, TranslationError> {
        let table = self.table(convention)?;
        if convention == CANONICAL {
            return Ok(vec![name.to_string()]);
        }
        lookup(table.variables.get_inverse(&name.to_string()), name, convention)
    }

    /// `convention` spelling(s) of canonical `name`, sorted.
    pub fn from_canonical(&self, convention: &str, name: &str) -> Result<Vec<String>, TranslationError> {
        let table = self.table(convention)?;
        if convention == CANONICAL {
            return Ok(vec![name.to_string()]);
        }
        lookup(table.variables.get(&name.to_string()), name, convention)
    }

    pub fn units_to_canonical(&self, convention: &str, units: &str) -> Result<Vec<String>, TranslationError> {
        let table = self.table(convention)?;
        if convention == CANONICAL {
            return Ok(vec![units.to_string()]);
        }
        lookup(table.units.get_inverse(&units.to_string()), units, convention)
    }

    pub fn units_from_canonical(&self, convention: &str, units: &str) -> Result<Vec<String>, TranslationError> {
        let table = self.table(convention)?;
        if convention == CANONICAL {
            return Ok(vec![units.to_string()]);
        }
        lookup(table.units.get(&units.to_string()), units, convention)
    }

    fn table(&self, convention: &str) -> Result<&ConventionTable, TranslationError> {
        self.conventions
            .get(convention)
            .ok_or_else(|| TranslationError::UnknownConvention(convention.to_string()))
    }
}

fn lookup(
    found: Option<&std::collections::BTreeSet<String>>,
    name: &str,
    convention: &str,
) -> Result<Vec<String>, TranslationError> {
    found
        .map(|set| set.iter().cloned().collect())
        .ok_or_else(|| TranslationError::NameNotFound {
            name: name.to_string(),
            convention: convention.to_string(),
        })
}

fn expand(entries: BTreeMap<String, OneOrMany>) -> BiMultiMap<String, String> {
    entries
        .into_iter()
        .flat_map(|(key, values)| {
            values
                .into_vec()
                .into_iter()
                .map(move |value| (key.clone(), value))
        })
        .collect()
}

fn is_fieldlist(path: &Path) -> bool {
    let stem_ok = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FIELDLIST_PREFIX));
    stem_ok && path.extension().and_then(|ext| ext.to_str()) == Some(FIELDLIST_EXT)
}

fn canonical_table() -> ConventionTable {
    let axes = [
        ("lon", "X", "lon_coord"),
        ("lat", "Y", "lat_coord"),
        ("lev", "Z", "lev_coord"),
        ("time", "T", "time_coord"),
    ]
    .into_iter()
    .map(|(name, axis, envvar)| {
        (
            name.to_string(),
            AxisSpec {
                axis: axis.to_string(),
                envvar: Some(envvar.to_string()),
            },
        )
    })
    .collect();
    ConventionTable {
        axes,
        ..ConventionTable::default()
    }
}
