//! Orchestration for one `diagrun run` invocation.
//!
//! [`Session::prepare`] does all fail-fast work (settings, paths, registry,
//! conventions, case list, dispatcher lookup) before anything is dispatched.
//! [`Session::run`] then executes the plan and always sweeps the scratch
//! directories, whether or not the run succeeded.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::configure::{ConfigManager, RunConfiguration, RunOptions};
use crate::io::pod_registry::PodRegistry;
use crate::io::tempdirs::TempDirManager;
use crate::io::translator::VariableTranslator;
use crate::orchestrate::{
    DispatcherRegistry, Orchestrator, PodDispatcher, RunPlan, RunReport, build_plan,
};

/// A fully resolved run, ready to execute.
pub struct Session {
    config: RunConfiguration,
    registry: PodRegistry,
    translator: VariableTranslator,
    tempdirs: TempDirManager,
    dispatcher: Box<dyn PodDispatcher>,
    plan: RunPlan,
}

impl Session {
    pub fn prepare(options: &RunOptions, dispatchers: &DispatcherRegistry) -> Result<Self> {
        let manager = ConfigManager::new(options)?;
        let registry = PodRegistry::load(&manager.paths().diagnostics_dir)
            .context("load POD descriptors")?;
        let translator = VariableTranslator::load_dir(&manager.paths().conventions_dir)
            .context("load naming conventions")?;
        let config = manager.build(&registry)?;
        let dispatcher = dispatchers.create(config.dispatcher_key(), &config.run)?;
        config.paths.prepare(config.workdir_policy())?;
        let tempdirs = TempDirManager::new(None, config.run.keep_temp)?;
        let plan = build_plan(&config);
        debug!(
            cases = plan.cases.len(),
            pods = plan.pod_count(),
            dispatcher = config.dispatcher_key(),
            "run planned"
        );

        Ok(Self {
            config,
            registry,
            translator,
            tempdirs,
            dispatcher,
            plan,
        })
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Handle on the scratch-directory registry, e.g. for a signal handler.
    pub fn tempdirs(&self) -> &TempDirManager {
        &self.tempdirs
    }

    /// Execute the plan, then clean up scratch directories.
    pub fn run(self) -> RunReport {
        info!(
            cases = self.plan.cases.len(),
            pods = self.plan.pod_count(),
            "starting run"
        );
        let orchestrator = Orchestrator::new(
            &self.config,
            &self.registry,
            &self.translator,
            &self.tempdirs,
            self.dispatcher.as_ref(),
        );
        let report = orchestrator.run(&self.plan);
        self.tempdirs.cleanup();
        report
    }
}
