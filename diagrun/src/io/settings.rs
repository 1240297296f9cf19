//! Run settings stored in `diagrun.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::case::CaseEntry;

/// File name looked up in the code root when `--config` is not given.
pub const DEFAULT_SETTINGS_FILE: &str = "diagrun.toml";

/// Settings file (TOML). Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SettingsFile {
    pub paths: PathSettings,
    pub run: RunSettings,
    /// Model overrides applied to every case-list entry.
    pub model: CaseEntry,
    pub case_list: Vec<CaseEntry>,
    /// Extra environment variables for every POD process.
    pub env: BTreeMap<String, String>,
}

/// Root directories; relative values are anchored at the code root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathSettings {
    pub obs_data_root: String,
    pub model_data_root: String,
    /// Falls back to `output_dir` when unset.
    pub working_dir: Option<String>,
    pub output_dir: String,
    pub diagnostics_dir: String,
    pub conventions_dir: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            obs_data_root: "inputdata/obs_data".to_string(),
            model_data_root: "inputdata/model".to_string(),
            working_dir: None,
            output_dir: "output".to_string(),
            diagnostics_dir: "diagnostics".to_string(),
            conventions_dir: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunSettings {
    /// POD selector: names, realms, `all`, or `example(s)`.
    pub pods: Vec<String>,
    pub keep_temp: bool,
    pub overwrite: bool,
    /// Allow removing a stale working directory before the run.
    pub clean_working_dir: bool,
    /// Dispatcher key; see `orchestrate::DispatcherRegistry`.
    pub environment_manager: String,
    /// Per-POD wall-clock limit. No limit when unset.
    pub pod_timeout_secs: Option<u64>,
    pub dry_run: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            pods: Vec::new(),
            keep_temp: false,
            overwrite: false,
            clean_working_dir: false,
            environment_manager: "subprocess".to_string(),
            pod_timeout_secs: None,
            dry_run: false,
        }
    }
}

impl SettingsFile {
    pub fn validate(&self) -> Result<()> {
        if self.run.environment_manager.trim().is_empty() {
            return Err(anyhow!("run.environment_manager must not be empty"));
        }
        if self.run.pod_timeout_secs == Some(0) {
            return Err(anyhow!("run.pod_timeout_secs must be > 0"));
        }
        if self.paths.output_dir.trim().is_empty() {
            return Err(anyhow!("paths.output_dir must not be empty"));
        }
        if let Some(key) = self.env.keys().find(|key| key.is_empty() || key.contains('=')) {
            return Err(anyhow!("env key {key:?} is not a valid variable name"));
        }
        Ok(())
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `SettingsFile::default()`.
pub fn load_settings(path: &Path) -> Result<SettingsFile> {
    if !path.exists() {
        debug!(path = %path.display(), "settings file missing, using defaults");
        let settings = SettingsFile::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: SettingsFile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Scalar;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(settings, SettingsFile::default());
        assert_eq!(settings.run.environment_manager, "subprocess");
    }

    #[test]
    fn parses_all_sections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_SETTINGS_FILE);
        fs::write(
            &path,
            r#"
[paths]
obs_data_root = "$HOME/obs"
working_dir = "/scratch/wk"

[run]
pods = ["atmos", "ENSO_MSE"]
keep_temp = true
pod_timeout_secs = 600

[model]
convention = "CMIP"

[[case_list]]
CASENAME = "QBOi.EXP1"
FIRSTYR = 1977
LASTYR = 1981
convention = "CESM"
FREQ = "day"

[env]
NCARG_ROOT = "/opt/ncl"
"#,
        )
        .expect("write");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.paths.obs_data_root, "$HOME/obs");
        assert_eq!(settings.paths.working_dir.as_deref(), Some("/scratch/wk"));
        assert_eq!(settings.paths.diagnostics_dir, "diagnostics");
        assert_eq!(settings.run.pods, vec!["atmos", "ENSO_MSE"]);
        assert!(settings.run.keep_temp);
        assert_eq!(settings.run.pod_timeout_secs, Some(600));
        assert_eq!(settings.model.convention.as_deref(), Some("CMIP"));
        assert_eq!(settings.case_list.len(), 1);
        let case = &settings.case_list[0];
        assert_eq!(case.casename.as_deref(), Some("QBOi.EXP1"));
        assert_eq!(case.firstyr, Some(Scalar::Int(1977)));
        assert_eq!(case.extra.get("FREQ"), Some(&Scalar::from("day")));
        assert_eq!(
            settings.env.get("NCARG_ROOT").map(String::as_str),
            Some("/opt/ncl")
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_SETTINGS_FILE);
        fs::write(&path, "[run]\npod_timeout_secs = 0\n").expect("write");
        let err = load_settings(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("pod_timeout_secs"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_SETTINGS_FILE);
        fs::write(&path, "[run\n").expect("write");
        assert!(load_settings(&path).is_err());
    }
}
