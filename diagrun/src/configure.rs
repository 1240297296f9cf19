//! Single merge point for command-line options, the settings file, the POD
//! registry and the case list.
//!
//! [`ConfigManager::build`] consumes the manager and returns a
//! [`RunConfiguration`] that is only ever read afterwards.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::case::{Case, CaseEntry, resolve_case_list};
use crate::core::selection::{PodSelector, SelectorOrigin, select_pods};
use crate::error::ConfigError;
use crate::io::paths::{PathManager, WorkdirPolicy};
use crate::io::pod_registry::PodRegistry;
use crate::io::settings::{DEFAULT_SETTINGS_FILE, RunSettings, SettingsFile, load_settings};

/// Command-line view of a run; `None`/`false` leave the settings file value.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub code_root: PathBuf,
    /// Settings file; `<code_root>/diagrun.toml` when unset.
    pub config_path: Option<PathBuf>,
    /// POD selector given on the command line.
    pub pods: Option<Vec<String>>,
    pub obs_data_root: Option<String>,
    pub model_data_root: Option<String>,
    pub working_dir: Option<String>,
    pub output_dir: Option<String>,
    pub keep_temp: bool,
    pub overwrite: bool,
    pub clean_working_dir: bool,
    pub dry_run: bool,
    pub environment_manager: Option<String>,
    /// Model overrides (`--casename`, `--convention`, ...).
    pub model: CaseEntry,
}

impl RunOptions {
    pub fn settings_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| self.code_root.join(DEFAULT_SETTINGS_FILE))
    }

    /// Overlay these options onto `settings`.
    fn apply(&self, settings: &mut SettingsFile) {
        let paths = &mut settings.paths;
        for (target, value) in [
            (&mut paths.obs_data_root, &self.obs_data_root),
            (&mut paths.model_data_root, &self.model_data_root),
            (&mut paths.output_dir, &self.output_dir),
        ] {
            if let Some(value) = value {
                target.clone_from(value);
            }
        }
        if self.working_dir.is_some() {
            paths.working_dir.clone_from(&self.working_dir);
        }

        let run = &mut settings.run;
        run.keep_temp |= self.keep_temp;
        run.overwrite |= self.overwrite;
        run.clean_working_dir |= self.clean_working_dir;
        run.dry_run |= self.dry_run;
        if let Some(key) = &self.environment_manager {
            run.environment_manager.clone_from(key);
        }

        overlay_model(&mut settings.model, &self.model);
    }

    fn selector(&self, settings: &SettingsFile) -> PodSelector {
        match &self.pods {
            Some(pods) if !pods.is_empty() => PodSelector::new(pods.clone(), SelectorOrigin::Explicit),
            _ if !settings.run.pods.is_empty() => {
                PodSelector::new(settings.run.pods.clone(), SelectorOrigin::Default)
            }
            _ => PodSelector::unset(),
        }
    }
}

/// Read-only snapshot of everything a run needs.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfiguration {
    pub paths: PathManager,
    pub run: RunSettings,
    pub selector: PodSelector,
    /// Global POD selection; cases may carry their own list.
    pub pod_list: Vec<String>,
    pub cases: Vec<Case>,
    /// Variables exported to every POD process.
    pub global_env: BTreeMap<String, String>,
}

impl RunConfiguration {
    /// Dispatcher key; a dry run always uses `dry_run`.
    pub fn dispatcher_key(&self) -> &str {
        if self.run.dry_run {
            "dry_run"
        } else {
            &self.run.environment_manager
        }
    }

    pub fn workdir_policy(&self) -> WorkdirPolicy {
        WorkdirPolicy {
            keep_temp: self.run.keep_temp,
            clean_working_dir: self.run.clean_working_dir,
        }
    }
}

/// Settings and paths resolved from the command line, before the POD
/// registry is known.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    settings: SettingsFile,
    selector: PodSelector,
    paths: PathManager,
}

impl ConfigManager {
    /// Load the settings file, overlay `options`, and resolve the root paths.
    pub fn new(options: &RunOptions) -> Result<Self> {
        let mut settings = load_settings(&options.settings_path())?;
        options.apply(&mut settings);
        settings.validate()?;
        let selector = options.selector(&settings);
        let paths = PathManager::resolve(&options.code_root, &settings.paths)?;
        debug!(?selector, "resolved POD selector");
        Ok(Self {
            settings,
            selector,
            paths,
        })
    }

    pub fn paths(&self) -> &PathManager {
        &self.paths
    }

    /// Resolve the POD selection and the case list against `registry`.
    ///
    /// Fails if no POD is selected or no case entry survives validation.
    pub fn build(self, registry: &PodRegistry) -> Result<RunConfiguration> {
        let selection = select_pods(
            &self.selector.tokens,
            registry.names(),
            registry.realm_index(),
        );
        for token in &selection.unrecognized {
            warn!(%token, "didn't recognize POD or realm, ignoring");
        }
        if selection.pods.is_empty() {
            return Err(ConfigError::NoPodsSelected {
                requested: self.selector.tokens.iter().cloned().collect(),
            }
            .into());
        }

        let mut list = resolve_case_list(
            &self.settings.case_list,
            &self.settings.model,
            &selection.pods,
            self.selector.origin,
        );
        for (entry, reason) in &list.skipped {
            warn!(entry, %reason, "skipping case_list entry");
        }
        for case in &mut list.cases {
            case.pod_list.retain(|pod| {
                let known = registry.get(pod).is_some();
                if !known {
                    warn!(case = %case.name, %pod, "case requests unknown POD, ignoring");
                }
                known
            });
        }
        list.cases.retain(|case| {
            if case.pod_list.is_empty() {
                warn!(case = %case.name, "case requests no known POD, skipping");
            }
            !case.pod_list.is_empty()
        });
        if list.cases.is_empty() {
            return Err(ConfigError::NoValidCases {
                received: list.received,
            }
            .into());
        }

        let global_env = global_env(&self.paths, &self.settings.env);
        info!(
            pods = selection.pods.len(),
            cases = list.cases.len(),
            "resolved run configuration"
        );
        Ok(RunConfiguration {
            paths: self.paths,
            run: self.settings.run,
            selector: self.selector,
            pod_list: selection.pods,
            cases: list.cases,
            global_env,
        })
    }
}

fn global_env(paths: &PathManager, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("MPLBACKEND".to_string(), "Agg".to_string());
    env.insert(
        "RGB".to_string(),
        paths.code_root.join("shared").join("rgb").display().to_string(),
    );
    env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn overlay_model(target: &mut CaseEntry, cli: &CaseEntry) {
    fn overlay<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
        if value.is_some() {
            target.clone_from(value);
        }
    }
    overlay(&mut target.casename, &cli.casename);
    overlay(&mut target.model, &cli.model);
    overlay(&mut target.experiment, &cli.experiment);
    overlay(&mut target.convention, &cli.convention);
    overlay(&mut target.firstyr, &cli.firstyr);
    overlay(&mut target.lastyr, &cli.lastyr);
    overlay(&mut target.case_root_dir, &cli.case_root_dir);
    overlay(&mut target.pod_list, &cli.pod_list);
    target
        .extra
        .extend(cli.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
}
