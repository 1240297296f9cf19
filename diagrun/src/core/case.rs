//! Case-list entry merging and validation.
//!
//! Each entry from the settings file is merged with the command-line model
//! overrides; entries that cannot identify a case or lack a year range or
//! naming convention are rejected (the caller logs and drops them).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::selection::{SelectorOrigin, case_pod_list};
use crate::core::types::Scalar;

/// Raw case-list entry, also used for the command-line model overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaseEntry {
    #[serde(rename = "CASENAME", skip_serializing_if = "Option::is_none")]
    pub casename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convention: Option<String>,
    #[serde(rename = "FIRSTYR", skip_serializing_if = "Option::is_none")]
    pub firstyr: Option<Scalar>,
    #[serde(rename = "LASTYR", skip_serializing_if = "Option::is_none")]
    pub lastyr: Option<Scalar>,
    #[serde(rename = "CASE_ROOT_DIR", skip_serializing_if = "Option::is_none")]
    pub case_root_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_list: Option<Vec<String>>,
    /// Any other keys; exported verbatim to the PODs' environment.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Scalar>,
}

/// A validated case ready to be run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Case {
    pub name: String,
    pub model: String,
    pub experiment: String,
    pub convention: String,
    pub first_year: String,
    pub last_year: String,
    pub case_root_dir: Option<String>,
    pub pod_list: Vec<String>,
    pub extra: BTreeMap<String, Scalar>,
}

/// Why a case-list entry was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseRejection {
    /// Neither `CASENAME` nor both `model` and `experiment`.
    MissingIdentity,
    MissingField(&'static str),
}

impl fmt::Display for CaseRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseRejection::MissingIdentity => {
                f.write_str("need to specify either CASENAME or model/experiment")
            }
            CaseRejection::MissingField(field) => write!(f, "no value set for {field}"),
        }
    }
}

/// Outcome of resolving the whole case list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseList {
    pub cases: Vec<Case>,
    /// `(1-based entry number, reason)` for every dropped entry.
    pub skipped: Vec<(usize, CaseRejection)>,
    /// Number of entries considered.
    pub received: usize,
}

/// Merge every entry with `overrides` and validate it.
///
/// An empty `entries` list means the overrides alone describe the one case.
pub fn resolve_case_list(
    entries: &[CaseEntry],
    overrides: &CaseEntry,
    pods: &[String],
    origin: SelectorOrigin,
) -> CaseList {
    let fallback = [overrides.clone()];
    let entries = if entries.is_empty() {
        &fallback[..]
    } else {
        entries
    };

    let mut list = CaseList {
        received: entries.len(),
        ..CaseList::default()
    };
    for (index, entry) in entries.iter().enumerate() {
        match merge_case(entry, overrides, pods, origin) {
            Ok(case) => list.cases.push(case),
            Err(reason) => list.skipped.push((index + 1, reason)),
        }
    }
    list
}

/// Merge one entry with the command-line overrides.
///
/// Override values win, except that an entry's own `convention` is kept.
pub fn merge_case(
    entry: &CaseEntry,
    overrides: &CaseEntry,
    pods: &[String],
    origin: SelectorOrigin,
) -> Result<Case, CaseRejection> {
    let mut merged = entry.clone();
    if merged.case_root_dir.is_none()
        && let Some(root_dir) = merged.extra.remove("root_dir")
    {
        merged.case_root_dir = Some(root_dir.to_string());
    }
    apply_overrides(&mut merged, overrides);
    if let Some(convention) = present(&entry.convention) {
        merged.convention = Some(convention.to_string());
    }

    let has_identity = present(&merged.casename).is_some()
        || (present(&merged.model).is_some() && present(&merged.experiment).is_some());
    if !has_identity {
        return Err(CaseRejection::MissingIdentity);
    }

    let convention = present(&merged.convention).map(str::to_string);
    let model = present(&merged.model)
        .map(str::to_string)
        .or_else(|| convention.clone())
        .unwrap_or_default();
    let experiment = present(&merged.experiment)
        .map(str::to_string)
        .unwrap_or_default();
    let name = present(&merged.casename)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{model}_{experiment}"));

    let first_year = year(&merged.firstyr).ok_or(CaseRejection::MissingField("FIRSTYR"))?;
    let last_year = year(&merged.lastyr).ok_or(CaseRejection::MissingField("LASTYR"))?;
    let convention = convention.ok_or(CaseRejection::MissingField("convention"))?;

    let pod_list = case_pod_list(merged.pod_list.as_deref(), pods, origin);

    Ok(Case {
        name,
        model,
        experiment,
        convention,
        first_year,
        last_year,
        case_root_dir: merged.case_root_dir.filter(|dir| !dir.trim().is_empty()),
        pod_list,
        extra: merged.extra,
    })
}

fn apply_overrides(target: &mut CaseEntry, overrides: &CaseEntry) {
    fn take_string(target: &mut Option<String>, value: &Option<String>) {
        if present(value).is_some() {
            target.clone_from(value);
        }
    }
    fn take_scalar(target: &mut Option<Scalar>, value: &Option<Scalar>) {
        if value.as_ref().is_some_and(|v| !v.is_blank()) {
            target.clone_from(value);
        }
    }

    take_string(&mut target.casename, &overrides.casename);
    take_string(&mut target.model, &overrides.model);
    take_string(&mut target.experiment, &overrides.experiment);
    take_string(&mut target.convention, &overrides.convention);
    take_string(&mut target.case_root_dir, &overrides.case_root_dir);
    take_scalar(&mut target.firstyr, &overrides.firstyr);
    take_scalar(&mut target.lastyr, &overrides.lastyr);
    if overrides.pod_list.as_ref().is_some_and(|pods| !pods.is_empty()) {
        target.pod_list.clone_from(&overrides.pod_list);
    }
    for (key, value) in &overrides.extra {
        if !value.is_blank() {
            target.extra.insert(key.clone(), value.clone());
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn year(value: &Option<Scalar>) -> Option<String> {
    value
        .as_ref()
        .filter(|value| !value.is_blank())
        .map(|value| value.to_string())
}
