//! Sequential execution of the run plan.
//!
//! Cases run in list order and each case's PODs run one after another. A POD
//! that fails, times out, or cannot be prepared is recorded in the
//! [`RunReport`] and the run moves on. A case whose directories cannot be set
//! up marks its unreported PODs as [`PodOutcome::CaseFailed`] and the next
//! case still runs.
//!
//! The [`PodDispatcher`] trait decouples the loop from how a POD is actually
//! launched. Tests register scripted dispatchers that never spawn processes.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, instrument, warn};

use crate::configure::RunConfiguration;
use crate::core::case::Case;
use crate::error::DispatchError;
use crate::io::paths::{ModelPaths, PodPaths, copy_tree};
use crate::io::pod_registry::{PodDescriptor, PodRegistry};
use crate::io::process::run_logged;
use crate::io::settings::RunSettings;
use crate::io::tempdirs::TempDirManager;
use crate::io::translator::VariableTranslator;

/// File written into each case's output directory.
pub const CONFIG_SAVE_FILE: &str = "config_save.json";

/// Everything a dispatcher needs to launch one POD.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PodJob {
    pub case: String,
    pub pod: String,
    /// Interpreter; `None` runs `driver` directly.
    pub program: Option<String>,
    pub driver: PathBuf,
    /// Working directory of the child process (the POD's working dir).
    pub workdir: PathBuf,
    /// Variables added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub log_path: PathBuf,
    pub timeout: Option<Duration>,
}

impl PodJob {
    /// Command line as it would be spawned.
    pub fn command_line(&self) -> String {
        match &self.program {
            Some(program) => format!("{program} {}", self.driver.display()),
            None => self.driver.display().to_string(),
        }
    }
}

/// Result of one POD.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PodOutcome {
    Succeeded,
    Failed { exit_code: Option<i32> },
    TimedOut,
    SpawnError { message: String },
    /// The enclosing case failed before this POD could run.
    CaseFailed { message: String },
    Skipped { reason: String },
}

impl PodOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PodOutcome::Succeeded)
    }
}

impl fmt::Display for PodOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodOutcome::Succeeded => f.write_str("succeeded"),
            PodOutcome::Failed {
                exit_code: Some(code),
            } => write!(f, "failed with exit code {code}"),
            PodOutcome::Failed { exit_code: None } => f.write_str("terminated by signal"),
            PodOutcome::TimedOut => f.write_str("timed out"),
            PodOutcome::SpawnError { message } => write!(f, "could not start: {message}"),
            PodOutcome::CaseFailed { message } => write!(f, "case failed: {message}"),
            PodOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// Abstraction over POD launch backends.
pub trait PodDispatcher {
    /// Run the POD to completion. `Err` means the process could not be started.
    fn dispatch(&self, job: &PodJob) -> Result<PodOutcome>;
}

/// Runs each POD driver as a child process of this one.
#[derive(Debug, Default)]
pub struct SubprocessDispatcher;

impl PodDispatcher for SubprocessDispatcher {
    #[instrument(skip_all, fields(case = %job.case, pod = %job.pod))]
    fn dispatch(&self, job: &PodJob) -> Result<PodOutcome> {
        let mut cmd = match &job.program {
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.arg(&job.driver);
                cmd
            }
            None => Command::new(&job.driver),
        };
        cmd.current_dir(&job.workdir).envs(&job.env);
        info!(command = %job.command_line(), "starting POD");
        let outcome = run_logged(cmd, &job.log_path, job.timeout)?;
        Ok(if outcome.timed_out {
            PodOutcome::TimedOut
        } else if outcome.status.success() {
            PodOutcome::Succeeded
        } else {
            PodOutcome::Failed {
                exit_code: outcome.status.code(),
            }
        })
    }
}

/// Logs what would run and reports success.
#[derive(Debug, Default)]
pub struct DryRunDispatcher;

impl PodDispatcher for DryRunDispatcher {
    fn dispatch(&self, job: &PodJob) -> Result<PodOutcome> {
        info!(
            case = %job.case,
            pod = %job.pod,
            command = %job.command_line(),
            workdir = %job.workdir.display(),
            "dry run: not starting POD"
        );
        Ok(PodOutcome::Succeeded)
    }
}

type DispatcherCtor = Box<dyn Fn(&RunSettings) -> Box<dyn PodDispatcher>>;

/// Maps `environment_manager` keys to dispatcher constructors.
pub struct DispatcherRegistry {
    ctors: BTreeMap<String, DispatcherCtor>,
}

impl Default for DispatcherRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DispatcherRegistry {
    pub fn empty() -> Self {
        Self {
            ctors: BTreeMap::new(),
        }
    }

    /// `subprocess` and `dry_run`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("subprocess", |_| Box::new(SubprocessDispatcher));
        registry.register("dry_run", |_| Box::new(DryRunDispatcher));
        registry
    }

    /// Add or replace the constructor for `key`.
    pub fn register<F>(&mut self, key: &str, ctor: F)
    where
        F: Fn(&RunSettings) -> Box<dyn PodDispatcher> + 'static,
    {
        self.ctors.insert(key.to_string(), Box::new(ctor));
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ctors.keys().map(String::as_str)
    }

    pub fn create(
        &self,
        key: &str,
        settings: &RunSettings,
    ) -> Result<Box<dyn PodDispatcher>, DispatchError> {
        match self.ctors.get(key) {
            Some(ctor) => Ok(ctor(settings)),
            None => Err(DispatchError::UnknownEnvironmentManager {
                key: key.to_string(),
                known: self.keys().map(str::to_string).collect(),
            }),
        }
    }
}

/// One case and the PODs it will run, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCase {
    pub case: Case,
    pub pods: Vec<String>,
}

/// Cases x PODs, in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPlan {
    pub cases: Vec<PlannedCase>,
}

impl RunPlan {
    pub fn pod_count(&self) -> usize {
        self.cases.iter().map(|planned| planned.pods.len()).sum()
    }
}

/// Expand the configuration into the ordered run plan.
pub fn build_plan(config: &RunConfiguration) -> RunPlan {
    RunPlan {
        cases: config
            .cases
            .iter()
            .map(|case| PlannedCase {
                case: case.clone(),
                pods: case.pod_list.clone(),
            })
            .collect(),
    }
}

/// Outcome of one POD in one case.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PodRun {
    pub case: String,
    pub pod: String,
    pub outcome: PodOutcome,
}

/// Per-POD results of a whole run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub runs: Vec<PodRun>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.runs.iter().filter(|run| run.outcome.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.runs
            .iter()
            .filter(|run| matches!(run.outcome, PodOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.runs.len() - self.succeeded() - self.skipped()
    }

    pub fn outcome(&self, case: &str, pod: &str) -> Option<&PodOutcome> {
        self.runs
            .iter()
            .find(|run| run.case == case && run.pod == pod)
            .map(|run| &run.outcome)
    }
}

/// Inputs shared by every case of a run.
pub struct Orchestrator<'a> {
    config: &'a RunConfiguration,
    registry: &'a PodRegistry,
    translator: &'a VariableTranslator,
    tempdirs: &'a TempDirManager,
    dispatcher: &'a dyn PodDispatcher,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a RunConfiguration,
        registry: &'a PodRegistry,
        translator: &'a VariableTranslator,
        tempdirs: &'a TempDirManager,
        dispatcher: &'a dyn PodDispatcher,
    ) -> Self {
        Self {
            config,
            registry,
            translator,
            tempdirs,
            dispatcher,
        }
    }

    /// Run every planned case in order and report every planned POD.
    pub fn run(&self, plan: &RunPlan) -> RunReport {
        let mut report = RunReport::default();
        for planned in &plan.cases {
            let _span = info_span!("case", case = %planned.case.name).entered();
            let reported = report.runs.len();
            if let Err(err) = self.run_case(planned, &mut report) {
                let message = format!("{err:#}");
                error!(error = %message, "case failed, continuing with the next case");
                let missing: Vec<&String> = planned
                    .pods
                    .iter()
                    .filter(|pod| !report.runs[reported..].iter().any(|run| &run.pod == *pod))
                    .collect();
                for pod in missing {
                    report.runs.push(PodRun {
                        case: planned.case.name.clone(),
                        pod: pod.clone(),
                        outcome: PodOutcome::CaseFailed {
                            message: message.clone(),
                        },
                    });
                }
            }
        }
        info!(
            total = report.runs.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "run finished"
        );
        report
    }

    fn run_case(&self, planned: &PlannedCase, report: &mut RunReport) -> Result<()> {
        let case = &planned.case;
        let paths = &self.config.paths;
        let model = paths.model_paths(case, self.config.run.overwrite)?;
        for dir in [&model.model_wk_dir, &model.model_out_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        info!(
            wk_dir = %model.model_wk_dir.display(),
            version = model.version,
            "prepared case directories"
        );

        let case_temp = self
            .tempdirs
            .make_hashed_tempdir(&(case, &model.model_wk_dir))?;
        self.save_config(planned, &model)?;

        for pod in &planned.pods {
            let outcome = self.run_pod(case, &model, &case_temp, pod);
            match &outcome {
                PodOutcome::Succeeded => info!(%pod, "POD succeeded"),
                PodOutcome::Skipped { reason } => warn!(%pod, %reason, "POD skipped"),
                other => error!(%pod, outcome = %other, "POD failed"),
            }
            report.runs.push(PodRun {
                case: case.name.clone(),
                pod: pod.clone(),
                outcome,
            });
        }

        if model.model_wk_dir != model.model_out_dir {
            let copied = copy_tree(&model.model_wk_dir, &model.model_out_dir)?;
            debug!(copied, "copied working directory to output directory");
        }
        if !self.tempdirs.keep_temp() {
            self.tempdirs.rm_tempdir(&case_temp)?;
        }
        Ok(())
    }

    fn run_pod(&self, case: &Case, model: &ModelPaths, case_temp: &Path, pod: &str) -> PodOutcome {
        let Some(descriptor) = self.registry.get(pod) else {
            return PodOutcome::Skipped {
                reason: format!("POD {pod} is not registered"),
            };
        };
        let pod_paths = self.config.paths.pod_paths(pod, model);
        let env = match pod_environment(
            &self.config.global_env,
            case,
            model,
            case_temp,
            descriptor,
            &pod_paths,
            self.translator,
        ) {
            Ok(env) => env,
            Err(reason) => return PodOutcome::Skipped { reason },
        };
        if let Err(err) = fs::create_dir_all(&pod_paths.pod_wk_dir) {
            return PodOutcome::SpawnError {
                message: format!("create {}: {err}", pod_paths.pod_wk_dir.display()),
            };
        }

        let job = PodJob {
            case: case.name.clone(),
            pod: pod.to_string(),
            program: descriptor.program().map(str::to_string),
            driver: pod_paths.pod_code_dir.join(&descriptor.driver),
            log_path: pod_paths.pod_wk_dir.join(format!("{pod}.log")),
            workdir: pod_paths.pod_wk_dir,
            env,
            timeout: self.config.run.pod_timeout_secs.map(Duration::from_secs),
        };
        match self.dispatcher.dispatch(&job) {
            Ok(outcome) => outcome,
            Err(err) => PodOutcome::SpawnError {
                message: format!("{err:#}"),
            },
        }
    }

    fn save_config(&self, planned: &PlannedCase, model: &ModelPaths) -> Result<()> {
        #[derive(Serialize)]
        struct SavedConfig<'a> {
            created_at: String,
            case: &'a Case,
            pods: &'a [String],
            paths: &'a ModelPaths,
            run: &'a RunSettings,
        }

        let saved = SavedConfig {
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            case: &planned.case,
            pods: &planned.pods,
            paths: model,
            run: &self.config.run,
        };
        let path = model.model_out_dir.join(CONFIG_SAVE_FILE);
        let mut payload = serde_json::to_string_pretty(&saved).context("serialize config")?;
        payload.push('\n');
        fs::write(&path, payload).with_context(|| format!("write {}", path.display()))
    }
}

/// Environment added to a POD's inherited one, lowest precedence first:
/// global settings, case, convention axes, POD directories, POD settings, and
/// finally the translated variable names.
///
/// `Err` carries the reason the POD cannot run: an unknown convention, or a
/// required variable with no translatable name or alternate.
pub fn pod_environment(
    global: &BTreeMap<String, String>,
    case: &Case,
    model: &ModelPaths,
    case_temp: &Path,
    descriptor: &PodDescriptor,
    pod_paths: &PodPaths,
    translator: &VariableTranslator,
) -> Result<BTreeMap<String, String>, String> {
    let mut env = global.clone();
    let mut set = |key: &str, value: String| {
        env.insert(key.to_string(), value);
    };

    set("CASENAME", case.name.clone());
    set("model", case.model.clone());
    set("experiment", case.experiment.clone());
    set("convention", case.convention.clone());
    set("FIRSTYR", case.first_year.clone());
    set("LASTYR", case.last_year.clone());
    if let Some(root) = &case.case_root_dir {
        set("CASE_ROOT_DIR", root.clone());
    }
    for (key, value) in &case.extra {
        set(key, value.to_env_value());
    }
    set("MODEL_DATA_DIR", model.model_data_dir.display().to_string());
    set("MODEL_WK_DIR", model.model_wk_dir.display().to_string());
    set("MODEL_OUT_DIR", model.model_out_dir.display().to_string());
    set("CASE_TEMP_DIR", case_temp.display().to_string());

    let axes = translator
        .axes(&case.convention)
        .map_err(|err| err.to_string())?;
    for (name, spec) in axes {
        if let Some(envvar) = &spec.envvar {
            set(envvar, name.clone());
        }
    }

    set("POD_HOME", pod_paths.pod_code_dir.display().to_string());
    set("OBS_DATA", pod_paths.pod_obs_data.display().to_string());
    set("WK_DIR", pod_paths.pod_wk_dir.display().to_string());
    set("DATADIR", pod_paths.pod_wk_dir.display().to_string());
    set("POD_OUT_DIR", pod_paths.pod_out_dir.display().to_string());

    if let Some(vars) = descriptor
        .settings
        .get("pod_env_vars")
        .and_then(|value| value.as_object())
    {
        for (key, value) in vars {
            match value {
                serde_json::Value::String(text) => set(key, text.clone()),
                other => set(key, other.to_string()),
            }
        }
    }

    for var in &descriptor.varlist {
        let candidates = std::iter::once(&var.var_name).chain(var.alternates.iter());
        let found = candidates.clone().find_map(|name| {
            translator
                .from_canonical(&case.convention, name)
                .ok()
                .and_then(|names| names.into_iter().next())
                .map(|translated| (name, translated))
        });
        match found {
            Some((name, translated)) => set(name, translated),
            None if var.is_optional() => {
                debug!(var = %var.var_name, convention = %case.convention, "optional variable unavailable");
            }
            None => {
                let tried: Vec<&str> = candidates.map(String::as_str).collect();
                return Err(format!(
                    "no {} name for required variable {} (tried {})",
                    case.convention,
                    var.var_name,
                    tried.join(", ")
                ));
            }
        }
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Scalar;
    use crate::io::pod_registry::VarRequest;
    use crate::io::translator::ConventionTable;

    fn case(convention: &str) -> Case {
        Case {
            name: "foo".to_string(),
            model: "CESM".to_string(),
            experiment: "hist".to_string(),
            convention: convention.to_string(),
            first_year: "1990".to_string(),
            last_year: "2000".to_string(),
            case_root_dir: None,
            pod_list: vec!["pod".to_string()],
            extra: [("FREQ".to_string(), Scalar::from("mon"))].into_iter().collect(),
        }
    }

    fn model() -> ModelPaths {
        ModelPaths {
            model_data_dir: PathBuf::from("/data/foo"),
            model_wk_dir: PathBuf::from("/wk/diag_foo_1990_2000"),
            model_out_dir: PathBuf::from("/out/diag_foo_1990_2000"),
            version: 0,
        }
    }

    fn pod_paths() -> PodPaths {
        PodPaths {
            pod_code_dir: PathBuf::from("/code/diagnostics/pod"),
            pod_obs_data: PathBuf::from("/obs/pod"),
            pod_wk_dir: PathBuf::from("/wk/diag_foo_1990_2000/pod"),
            pod_out_dir: PathBuf::from("/out/diag_foo_1990_2000/pod"),
        }
    }

    fn var(name: &str, requirement: &str, alternates: &[&str]) -> VarRequest {
        VarRequest {
            var_name: name.to_string(),
            freq: "day".to_string(),
            requirement: requirement.to_string(),
            alternates: alternates.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn descriptor(varlist: Vec<VarRequest>) -> PodDescriptor {
        PodDescriptor {
            name: "pod".to_string(),
            long_name: String::new(),
            description: String::new(),
            realms: vec!["atmos".to_string()],
            driver: "pod.py".to_string(),
            program: None,
            varlist,
            settings: serde_json::from_str(r#"{"pod_env_vars": {"LAG": "5", "N": 3}}"#)
                .expect("settings"),
        }
    }

    fn translator() -> VariableTranslator {
        let mut translator = VariableTranslator::new();
        let table = ConventionTable {
            variables: [
                ("pr_var".to_string(), "PRECT".to_string()),
                ("ua_var".to_string(), "U".to_string()),
            ]
            .into_iter()
            .collect(),
            ..ConventionTable::default()
        };
        translator
            .register(&["NCAR".to_string()], table)
            .expect("register");
        translator
    }

    fn environment(convention: &str, varlist: Vec<VarRequest>) -> Result<BTreeMap<String, String>, String> {
        let global: BTreeMap<String, String> =
            [("MPLBACKEND".to_string(), "Agg".to_string())].into_iter().collect();
        pod_environment(
            &global,
            &case(convention),
            &model(),
            Path::new("/tmp/diagrun_temp_x"),
            &descriptor(varlist),
            &pod_paths(),
            &translator(),
        )
    }

    #[test]
    fn environment_layers_case_and_pod_paths() {
        let env = environment("CF", vec![var("pr_var", "required", &[])]).expect("env");
        assert_eq!(env["MPLBACKEND"], "Agg");
        assert_eq!(env["CASENAME"], "foo");
        assert_eq!(env["FIRSTYR"], "1990");
        assert_eq!(env["FREQ"], "mon");
        assert_eq!(env["MODEL_WK_DIR"], "/wk/diag_foo_1990_2000");
        assert_eq!(env["CASE_TEMP_DIR"], "/tmp/diagrun_temp_x");
        assert_eq!(env["WK_DIR"], env["DATADIR"]);
        assert_eq!(env["POD_HOME"], "/code/diagnostics/pod");
        assert_eq!(env["time_coord"], "time");
        assert_eq!(env["LAG"], "5");
        assert_eq!(env["N"], "3");
        assert_eq!(env["pr_var"], "pr_var");
    }

    #[test]
    fn variables_are_translated_with_alternates() {
        let env = environment(
            "NCAR",
            vec![
                var("pr_var", "required", &[]),
                var("u200_var", "required", &["ua_var"]),
                var("rlut_var", "optional", &[]),
            ],
        )
        .expect("env");
        assert_eq!(env["pr_var"], "PRECT");
        assert_eq!(env["ua_var"], "U");
        assert!(!env.contains_key("u200_var"));
        assert!(!env.contains_key("rlut_var"));
        assert!(!env.contains_key("time_coord"));
    }

    #[test]
    fn missing_required_variable_skips_pod() {
        let reason = environment("NCAR", vec![var("ts_var", "required", &["tos_var"])])
            .expect_err("missing");
        assert!(reason.contains("ts_var"));
        assert!(reason.contains("tos_var"));
    }

    #[test]
    fn unknown_convention_skips_pod() {
        let reason = environment("GFDL", Vec::new()).expect_err("unknown");
        assert!(reason.contains("GFDL"));
    }

    #[test]
    fn registry_builds_known_dispatchers() {
        let registry = DispatcherRegistry::with_builtins();
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["dry_run", "subprocess"]);
        let dispatcher = registry
            .create("dry_run", &RunSettings::default())
            .expect("dry_run");
        let job = PodJob {
            case: "foo".to_string(),
            pod: "pod".to_string(),
            program: Some("python".to_string()),
            driver: PathBuf::from("/code/diagnostics/pod/pod.py"),
            workdir: PathBuf::from("/wk"),
            env: BTreeMap::new(),
            log_path: PathBuf::from("/wk/pod.log"),
            timeout: None,
        };
        assert_eq!(job.command_line(), "python /code/diagnostics/pod/pod.py");
        assert_eq!(dispatcher.dispatch(&job).expect("dispatch"), PodOutcome::Succeeded);
    }

    #[test]
    fn unknown_environment_manager_is_reported() {
        let err = DispatcherRegistry::with_builtins()
            .create("conda", &RunSettings::default())
            .err()
            .expect("unknown key");
        assert_eq!(
            err,
            DispatchError::UnknownEnvironmentManager {
                key: "conda".to_string(),
                known: vec!["dry_run".to_string(), "subprocess".to_string()],
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_dispatcher_maps_exit_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let job = |script: &str| PodJob {
            case: "foo".to_string(),
            pod: "pod".to_string(),
            program: Some("sh".to_string()),
            driver: write_script(temp.path(), script),
            workdir: temp.path().to_path_buf(),
            env: [("GREETING".to_string(), "hello".to_string())].into_iter().collect(),
            log_path: temp.path().join("pod.log"),
            timeout: None,
        };
        let dispatcher = SubprocessDispatcher;
        assert_eq!(
            dispatcher.dispatch(&job("echo $GREETING")).expect("ok"),
            PodOutcome::Succeeded
        );
        let log = fs::read_to_string(temp.path().join("pod.log")).expect("log");
        assert_eq!(log, "hello\n");
        assert_eq!(
            dispatcher.dispatch(&job("exit 4")).expect("fail"),
            PodOutcome::Failed { exit_code: Some(4) }
        );
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join(format!("script_{}.sh", body.len()));
        fs::write(&path, format!("{body}\n")).expect("write script");
        path
    }
}
