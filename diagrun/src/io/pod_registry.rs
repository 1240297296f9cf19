//! Discovery and indexing of POD descriptors.
//!
//! Each subdirectory of the diagnostics root holds one POD with a
//! `settings.jsonc` descriptor. Descriptors are schema-checked; invalid ones
//! are logged and left out of the registry rather than failing the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument};

use crate::core::selection::RealmKey;
use crate::core::types::OneOrMany;
use crate::error::ConfigError;
use crate::io::jsonc::read_jsonc;

/// Descriptor file name inside each POD directory.
pub const SETTINGS_FILE: &str = "settings.jsonc";

const POD_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/pod_settings.schema.json"
));

static POD_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(POD_SCHEMA).unwrap();
    jsonschema::validator_for(&schema).unwrap()
});

/// Interpreters picked from the driver's extension when `program` is unset.
const PROGRAMS: [(&str, &str); 3] = [("py", "python"), ("ncl", "ncl"), ("R", "Rscript")];

const OPTIONAL: &str = "optional";

fn default_requirement() -> String {
    "required".to_string()
}

/// One variable a POD asks for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VarRequest {
    pub var_name: String,
    pub freq: String,
    /// `required` unless the descriptor says otherwise.
    #[serde(default = "default_requirement")]
    pub requirement: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternates: Vec<String>,
}

impl VarRequest {
    pub fn is_optional(&self) -> bool {
        self.requirement.eq_ignore_ascii_case(OPTIONAL)
    }

    /// Name without the conventional `_var` suffix, as shown to users.
    pub fn short_name(&self) -> &str {
        self.var_name.strip_suffix("_var").unwrap_or(&self.var_name)
    }
}

/// A validated POD descriptor.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PodDescriptor {
    pub name: String,
    pub long_name: String,
    pub description: String,
    pub realms: Vec<String>,
    /// Script to run, relative to the POD's code directory.
    pub driver: String,
    /// Explicit interpreter; see [`PodDescriptor::program`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub varlist: Vec<VarRequest>,
    /// Remaining keys of the `settings` block.
    pub settings: Map<String, Value>,
}

impl PodDescriptor {
    /// Interpreter for the driver, or `None` to execute the driver directly.
    pub fn program(&self) -> Option<&str> {
        if let Some(program) = self.program.as_deref() {
            return Some(program);
        }
        let ext = Path::new(&self.driver).extension()?.to_str()?;
        PROGRAMS
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, program)| *program)
    }

    /// Parse a descriptor document that already passed schema validation.
    pub fn from_value(name: &str, value: Value) -> Result<Self> {
        let file: DescriptorFile = serde_json::from_value(value)
            .with_context(|| format!("deserialize descriptor for {name}"))?;
        let RawSettings {
            long_name,
            description,
            realm,
            driver,
            program,
            rest,
        } = file.settings;
        Ok(Self {
            name: name.to_string(),
            long_name,
            description,
            realms: realm.map(OneOrMany::into_vec).unwrap_or_default(),
            driver: driver.unwrap_or_else(|| format!("{name}.py")),
            program,
            varlist: file.varlist,
            settings: rest,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DescriptorFile {
    settings: RawSettings,
    #[serde(default)]
    varlist: Vec<VarRequest>,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    long_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    realm: Option<OneOrMany>,
    #[serde(default)]
    driver: Option<String>,
    #[serde(default)]
    program: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// A POD that was found on disk but could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPod {
    pub name: String,
    pub reason: String,
}

/// All valid PODs, indexed by name and by realm.
#[derive(Debug, Clone, Default)]
pub struct PodRegistry {
    order: Vec<String>,
    pods: BTreeMap<String, PodDescriptor>,
    realm_index: BTreeMap<RealmKey, Vec<String>>,
    realm_list: Vec<String>,
    invalid: Vec<InvalidPod>,
}

impl PodRegistry {
    /// Scan `dir` for POD subdirectories.
    ///
    /// Entries starting with `_` or `.` are skipped; the rest are visited in
    /// case-insensitive name order.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(ConfigError::MissingDirectory(dir.to_path_buf()).into());
        }
        let mut names: Vec<String> = fs::read_dir(dir)
            .with_context(|| format!("read {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with(['_', '.']))
            .collect();
        names.sort_by_key(|name| name.to_lowercase());

        let mut descriptors = Vec::with_capacity(names.len());
        let mut invalid = Vec::new();
        for name in names {
            let path = dir.join(&name).join(SETTINGS_FILE);
            match read_descriptor(&name, &path) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(err) => {
                    let reason = format!("{err:#}");
                    error!(pod = %name, path = %path.display(), %reason, "invalid POD settings file");
                    invalid.push(InvalidPod { name, reason });
                }
            }
        }

        let mut registry = Self::from_descriptors(descriptors);
        registry.invalid = invalid;
        info!(
            valid = registry.order.len(),
            invalid = registry.invalid.len(),
            "loaded POD descriptors"
        );
        Ok(registry)
    }

    /// Build the indexes over `descriptors`, keeping their order.
    pub fn from_descriptors(descriptors: Vec<PodDescriptor>) -> Self {
        let mut registry = Self::default();
        let mut realms: BTreeSet<String> = BTreeSet::new();
        for descriptor in descriptors {
            if registry.pods.contains_key(&descriptor.name) {
                debug!(pod = %descriptor.name, "duplicate POD name ignored");
                continue;
            }
            if let Some(key) = RealmKey::from_realms(&descriptor.realms) {
                realms.extend(key.realms().iter().cloned());
                registry
                    .realm_index
                    .entry(key)
                    .or_default()
                    .push(descriptor.name.clone());
            }
            registry.order.push(descriptor.name.clone());
            registry.pods.insert(descriptor.name.clone(), descriptor);
        }
        registry.realm_list = realms.into_iter().collect();
        registry.realm_list.sort_by_key(|realm| realm.to_lowercase());
        registry
    }

    /// Valid POD names in registry order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, name: &str) -> Option<&PodDescriptor> {
        self.pods.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PodDescriptor> {
        self.order.iter().filter_map(|name| self.pods.get(name))
    }

    pub fn realm_index(&self) -> &BTreeMap<RealmKey, Vec<String>> {
        &self.realm_index
    }

    /// Every realm mentioned by any POD, sorted case-insensitively.
    pub fn realm_list(&self) -> &[String] {
        &self.realm_list
    }

    /// PODs that were found but failed to load, in scan order.
    pub fn invalid(&self) -> &[InvalidPod] {
        &self.invalid
    }
}

fn read_descriptor(name: &str, path: &Path) -> Result<PodDescriptor> {
    let value = read_jsonc(path)?;
    let messages: Vec<String> = POD_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "schema validation failed: {}",
            messages.join("; ")
        ));
    }
    PodDescriptor::from_value(name, value)
}
