//! Process-oriented diagnostics runner.
//!
//! `diagrun run` resolves the settings file and command line into a run plan
//! and executes every selected POD for every case. `diagrun info` lists the
//! installed PODs and realms.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use diagrun::configure::{ConfigManager, RunOptions};
use diagrun::core::case::CaseEntry;
use diagrun::core::types::Scalar;
use diagrun::exit_codes;
use diagrun::io::pod_registry::PodRegistry;
use diagrun::orchestrate::{DispatcherRegistry, RunReport};
use diagrun::session::Session;

#[derive(Parser)]
#[command(
    name = "diagrun",
    version,
    about = "Run process-oriented diagnostics over model output"
)]
struct Cli {
    /// Installation root holding `diagnostics/`, `data/` and `diagrun.toml`.
    #[arg(long, env = "DIAGRUN_CODE_ROOT", default_value = ".", global = true)]
    code_root: PathBuf,
    /// Settings file. Defaults to `<code-root>/diagrun.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the selected PODs on every case.
    Run(RunArgs),
    /// List installed PODs and realms.
    Info {
        /// `topics`, `pods`, `realms`, a realm name, or a POD name.
        #[arg(default_value = "topics")]
        topic: String,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// POD names, realm names, `all`, or `example`. Comma separated or repeated.
    #[arg(short, long, value_delimiter = ',')]
    pods: Vec<String>,
    #[arg(long)]
    obs_data_root: Option<String>,
    #[arg(long)]
    model_data_root: Option<String>,
    #[arg(long, env = "DIAGRUN_WORKING_DIR")]
    working_dir: Option<String>,
    #[arg(long, env = "DIAGRUN_OUTPUT_DIR")]
    output_dir: Option<String>,
    /// Keep scratch directories and the working directory after the run.
    #[arg(long, env = "DIAGRUN_KEEP_TEMP")]
    keep_temp: bool,
    /// Reuse existing output directories instead of bumping their version.
    #[arg(long)]
    overwrite: bool,
    /// Remove the working directory before the run when it differs from the
    /// output directory.
    #[arg(long)]
    clean_working_dir: bool,
    /// Resolve everything and log the commands without starting PODs.
    #[arg(long)]
    dry_run: bool,
    /// Dispatcher used to launch PODs.
    #[arg(long)]
    environment_manager: Option<String>,
    #[arg(long)]
    casename: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    experiment: Option<String>,
    /// Variable naming convention of the model data.
    #[arg(long)]
    convention: Option<String>,
    #[arg(long)]
    firstyr: Option<String>,
    #[arg(long)]
    lastyr: Option<String>,
    #[arg(long)]
    case_root_dir: Option<String>,
}

impl RunArgs {
    fn into_options(self, code_root: PathBuf, config_path: Option<PathBuf>) -> RunOptions {
        RunOptions {
            code_root,
            config_path,
            pods: (!self.pods.is_empty()).then_some(self.pods),
            obs_data_root: self.obs_data_root,
            model_data_root: self.model_data_root,
            working_dir: self.working_dir,
            output_dir: self.output_dir,
            keep_temp: self.keep_temp,
            overwrite: self.overwrite,
            clean_working_dir: self.clean_working_dir,
            dry_run: self.dry_run,
            environment_manager: self.environment_manager,
            model: CaseEntry {
                casename: self.casename,
                model: self.model,
                experiment: self.experiment,
                convention: self.convention,
                firstyr: self.firstyr.as_deref().map(Scalar::from),
                lastyr: self.lastyr.as_deref().map(Scalar::from),
                case_root_dir: self.case_root_dir,
                ..CaseEntry::default()
            },
        }
    }
}

fn main() {
    diagrun::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::CONFIG);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args.into_options(cli.code_root, cli.config)),
        Command::Info { topic } => cmd_info(cli.code_root, cli.config, &topic),
    }
}

fn cmd_run(options: RunOptions) -> Result<()> {
    let session = Session::prepare(&options, &DispatcherRegistry::with_builtins())?;

    let tempdirs = session.tempdirs().clone();
    ctrlc::set_handler(move || {
        warn!("interrupted, removing scratch directories");
        tempdirs.cleanup();
        std::process::exit(exit_codes::INTERRUPTED);
    })
    .context("install signal handler")?;

    let report = session.run();
    print_summary(&report);
    Ok(())
}

fn cmd_info(code_root: PathBuf, config_path: Option<PathBuf>, topic: &str) -> Result<()> {
    let options = RunOptions {
        code_root,
        config_path,
        ..RunOptions::default()
    };
    let manager = ConfigManager::new(&options)?;
    let registry = PodRegistry::load(&manager.paths().diagnostics_dir)
        .context("load POD descriptors")?;
    print!("{}", diagrun::info::render(topic, &registry)?);
    Ok(())
}

fn print_summary(report: &RunReport) {
    for run in &report.runs {
        println!("{} / {}: {}", run.case, run.pod, run.outcome);
    }
    println!(
        "{} succeeded, {} failed, {} skipped",
        report.succeeded(),
        report.failed(),
        report.skipped()
    );
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped(),
        "run finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_pod_list() {
        let cli = Cli::parse_from(["diagrun", "run", "--pods", "atmos,ENSO_MSE", "-p", "example"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.pods, vec!["atmos", "ENSO_MSE", "example"]);
        assert!(!args.dry_run);
    }

    #[test]
    fn parse_info_defaults_to_topics() {
        let cli = Cli::parse_from(["diagrun", "info"]);
        assert!(matches!(cli.command, Command::Info { topic } if topic == "topics"));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["diagrun", "info", "realms", "--code-root", "/opt/diag"]);
        assert_eq!(cli.code_root, PathBuf::from("/opt/diag"));
    }

    #[test]
    fn run_args_become_model_overrides() {
        let cli = Cli::parse_from([
            "diagrun",
            "run",
            "--casename",
            "foo",
            "--firstyr",
            "1990",
            "--lastyr",
            "2000",
            "--convention",
            "CF",
            "--dry-run",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let options = args.into_options(PathBuf::from("/opt/diag"), None);
        assert!(options.pods.is_none());
        assert!(options.dry_run);
        assert_eq!(options.model.casename.as_deref(), Some("foo"));
        assert_eq!(options.model.firstyr, Some(Scalar::from("1990")));
        assert_eq!(options.model.convention.as_deref(), Some("CF"));
        assert_eq!(
            options.settings_path(),
            PathBuf::from("/opt/diag/diagrun.toml")
        );
    }
}
