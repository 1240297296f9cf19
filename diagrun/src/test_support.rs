//! Test-only helpers: an on-disk code root and a scripted dispatcher.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::configure::RunOptions;
use crate::io::settings::DEFAULT_SETTINGS_FILE;
use crate::orchestrate::{DispatcherRegistry, PodDispatcher, PodJob, PodOutcome};

/// Key under which [`ScriptedDispatcher::register`] installs itself.
pub const SCRIPTED: &str = "scripted";

/// A fieldlist for the `NCAR` convention covering `pr_var` and `ts_var`.
pub const NCAR_FIELDLIST: &str = r#"{
    // test convention
    "convention_name": ["NCAR", "CESM"],
    "axes": {
        "lon": {"axis": "X", "MDTF_envvar": "lon_coord"},
        "lat": {"axis": "Y", "MDTF_envvar": "lat_coord"}
    },
    "var_names": {
        "pr_var": "PRECT",
        "ts_var": "TS"
    },
    "units": {"pr_units": "m/s"}
}"#;

/// Temporary installation root with `diagnostics/`, `data/` and
/// `inputdata/obs_data/`.
pub struct Fixture {
    temp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        for dir in ["diagnostics", "data", "inputdata/obs_data"] {
            fs::create_dir_all(temp.path().join(dir)).expect("create fixture dir");
        }
        Self { temp }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Write `diagnostics/<name>/settings.jsonc`.
    pub fn add_pod(&self, name: &str, settings: &str) -> PathBuf {
        let dir = self.root().join("diagnostics").join(name);
        fs::create_dir_all(&dir).expect("create POD dir");
        let path = dir.join("settings.jsonc");
        fs::write(&path, settings).expect("write POD settings");
        path
    }

    /// Write `data/<file_name>`.
    pub fn add_convention(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.root().join("data").join(file_name);
        fs::write(&path, contents).expect("write fieldlist");
        path
    }

    /// Write `diagrun.toml` at the root.
    pub fn write_settings(&self, contents: &str) -> PathBuf {
        let path = self.root().join(DEFAULT_SETTINGS_FILE);
        fs::write(&path, contents).expect("write settings");
        path
    }

    /// Options equivalent to `diagrun run --code-root <root>`.
    pub fn options(&self) -> RunOptions {
        RunOptions {
            code_root: self.root().to_path_buf(),
            ..RunOptions::default()
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root().join("output")
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// POD `settings.jsonc` contents requesting `vars` (canonical names) daily.
pub fn pod_settings(realm: Value, vars: &[&str]) -> String {
    let varlist: Vec<Value> = vars
        .iter()
        .map(|var| json!({"var_name": var, "freq": "day"}))
        .collect();
    let doc = json!({
        "settings": {
            "long_name": "test POD",
            "description": "POD used in tests",
            "realm": realm,
            "driver": "driver.py"
        },
        "varlist": varlist
    });
    serde_json::to_string_pretty(&doc).expect("serialize POD settings")
}

/// Dispatcher that records every job and returns canned outcomes.
///
/// Each dispatched job also writes one line to its log file, so a run leaves
/// something to copy from the working to the output directory.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDispatcher {
    jobs: Arc<Mutex<Vec<PodJob>>>,
    outcomes: BTreeMap<String, PodOutcome>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `outcome` for `pod` instead of success.
    pub fn with_outcome(mut self, pod: &str, outcome: PodOutcome) -> Self {
        self.outcomes.insert(pod.to_string(), outcome);
        self
    }

    /// Install a handle on this dispatcher under [`SCRIPTED`].
    pub fn register(&self, registry: &mut DispatcherRegistry) {
        let dispatcher = self.clone();
        registry.register(SCRIPTED, move |_| Box::new(dispatcher.clone()));
    }

    /// Jobs dispatched so far, in order.
    pub fn jobs(&self) -> Vec<PodJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PodDispatcher for ScriptedDispatcher {
    fn dispatch(&self, job: &PodJob) -> Result<PodOutcome> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job.clone());
        fs::write(&job.log_path, format!("scripted {}\n", job.pod))?;
        Ok(self
            .outcomes
            .get(&job.pod)
            .cloned()
            .unwrap_or(PodOutcome::Succeeded))
    }
}
